//! Market resolution
//!
//! A market is a physical store location, keyed by its store number. Every
//! receipt carries a snapshot of the store fields as printed; the market
//! record is the canonical version of those fields, built up across
//! receipts. Enrichment is one-directional: an observation may fill a field
//! the record does not have yet, but never overwrites a populated field.
//! Disagreements surface as warnings instead.

use crate::draft::DraftReceipt;
use crate::receipt::IngestWarning;
use crate::storage::ReceiptStore;
use crate::Result;
use chrono::{DateTime, Utc};

/// Canonical record of a physical store.
#[derive(Debug, Clone)]
pub struct Market {
    pub id: i64,
    pub store_number: String,
    pub name: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub tax_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store fields as observed on a single receipt.
#[derive(Debug, Clone, Default)]
pub struct MarketObservation {
    pub store_number: String,
    pub name: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub tax_id: Option<String>,
}

impl MarketObservation {
    /// Extract the observation from a draft. Returns `None` when the draft
    /// has no usable store number, in which case resolution is skipped and
    /// the normalizer reports the missing field.
    pub fn from_draft(draft: &DraftReceipt) -> Option<Self> {
        let store_number = draft.store_number.as_deref()?.trim();
        if store_number.is_empty() {
            return None;
        }
        Some(Self {
            store_number: store_number.to_string(),
            name: clean(&draft.store_name),
            street: clean(&draft.street),
            postal_code: clean(&draft.postal_code),
            city: clean(&draft.city),
            phone: clean(&draft.phone),
            tax_id: clean(&draft.tax_id),
        })
    }
}

fn clean(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Outcome of resolving one observation against the store.
#[derive(Debug)]
pub struct MarketResolution {
    pub market_id: i64,
    /// True when this observation created the market record
    pub created: bool,
    pub conflicts: Vec<IngestWarning>,
}

/// Look up or create the market for an observation.
///
/// First sighting of a store number inserts a new record. Later sightings
/// patch fields that are still empty; populated fields that disagree with
/// the observation are left untouched and reported as conflicts.
pub fn resolve_market(store: &ReceiptStore, obs: &MarketObservation) -> Result<MarketResolution> {
    match store.find_market(&obs.store_number)? {
        None => {
            let market_id = store.insert_market(obs)?;
            tracing::debug!(store_number = %obs.store_number, market_id, "created market");
            Ok(MarketResolution {
                market_id,
                created: true,
                conflicts: Vec::new(),
            })
        }
        Some(mut market) => {
            let mut conflicts = Vec::new();
            let mut changed = false;

            let fields: [(&'static str, &mut Option<String>, &Option<String>); 6] = [
                ("name", &mut market.name, &obs.name),
                ("street", &mut market.street, &obs.street),
                ("postal_code", &mut market.postal_code, &obs.postal_code),
                ("city", &mut market.city, &obs.city),
                ("phone", &mut market.phone, &obs.phone),
                ("tax_id", &mut market.tax_id, &obs.tax_id),
            ];
            for (field, stored, observed) in fields {
                changed |= merge_field(&obs.store_number, field, stored, observed, &mut conflicts);
            }

            if changed {
                market.updated_at = Utc::now();
                store.update_market(&market)?;
                tracing::debug!(store_number = %obs.store_number, "enriched market record");
            }
            for conflict in &conflicts {
                tracing::warn!("{}", conflict);
            }

            Ok(MarketResolution {
                market_id: market.id,
                created: false,
                conflicts,
            })
        }
    }
}

/// Fill `stored` from `observed` if it is still empty. A populated field
/// that differs from the observation produces a conflict warning.
/// Returns whether `stored` was modified.
fn merge_field(
    store_number: &str,
    field: &'static str,
    stored: &mut Option<String>,
    observed: &Option<String>,
    conflicts: &mut Vec<IngestWarning>,
) -> bool {
    let Some(observed) = observed.as_deref() else {
        return false;
    };
    match stored.as_deref() {
        None | Some("") => {
            *stored = Some(observed.to_string());
            true
        }
        Some(current) if current != observed => {
            conflicts.push(IngestWarning::MarketFieldConflict {
                store_number: store_number.to_string(),
                field,
                stored: current.to_string(),
                observed: observed.to_string(),
            });
            false
        }
        _ => false,
    }
}
