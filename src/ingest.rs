//! Batch ingestion
//!
//! The coordinator drives one draft at a time through market resolution,
//! normalization, and atomic persistence. Drafts are isolated from each
//! other: a bad draft is recorded and the batch continues. All writes for
//! one receipt happen inside one transaction, so a header without items is
//! never observable in the store.

use crate::catalog;
use crate::draft::DraftReceipt;
use crate::market::{self, MarketObservation};
use crate::normalize::{self, NormalizeError, ValidationError};
use crate::receipt::{IngestWarning, ReceiptId};
use crate::storage::ReceiptStore;

pub use crate::normalize::DuplicatePolicy;

/// What happened to one draft.
#[derive(Debug)]
pub enum IngestOutcome {
    /// New receipt persisted
    Inserted {
        receipt_id: ReceiptId,
        warnings: Vec<IngestWarning>,
    },
    /// Prior receipt with the same natural key swapped out
    Replaced {
        receipt_id: ReceiptId,
        warnings: Vec<IngestWarning>,
    },
    /// Natural key already stored; nothing written (reject policy)
    Skipped { existing_id: ReceiptId },
    /// Draft not persisted
    Rejected { reason: RejectReason },
}

impl IngestOutcome {
    pub fn warnings(&self) -> &[IngestWarning] {
        match self {
            IngestOutcome::Inserted { warnings, .. } | IngestOutcome::Replaced { warnings, .. } => {
                warnings
            }
            _ => &[],
        }
    }
}

/// Why a draft was rejected.
#[derive(Debug)]
pub enum RejectReason {
    /// Bad caller input; retrying the same draft cannot succeed
    Validation(ValidationError),
    /// Infrastructure fault; the draft's transaction was rolled back
    Storage(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Validation(e) => write!(f, "{}", e),
            RejectReason::Storage(e) => write!(f, "storage fault: {}", e),
        }
    }
}

/// Outcome of one draft, labeled with where it came from.
#[derive(Debug)]
pub struct IngestEntry {
    pub source: String,
    pub outcome: IngestOutcome,
}

/// Per-draft outcomes of one batch, in input order.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub entries: Vec<IngestEntry>,
}

impl IngestReport {
    pub fn inserted(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Inserted { .. }))
    }

    pub fn replaced(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Replaced { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Skipped { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, IngestOutcome::Rejected { .. }))
    }

    pub fn warning_count(&self) -> usize {
        self.entries.iter().map(|e| e.outcome.warnings().len()).sum()
    }

    fn count(&self, pred: impl Fn(&IngestOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

impl std::fmt::Display for IngestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} drafts: {} inserted, {} replaced, {} skipped, {} rejected, {} warnings",
            self.entries.len(),
            self.inserted(),
            self.replaced(),
            self.skipped(),
            self.rejected(),
            self.warning_count(),
        )
    }
}

/// Drives batches of drafts into the store.
///
/// Owns the store handle for the duration of the batch; no other component
/// touches the connection while a batch runs.
pub struct IngestCoordinator {
    store: ReceiptStore,
    policy: DuplicatePolicy,
}

impl IngestCoordinator {
    pub fn new(store: ReceiptStore, policy: DuplicatePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &ReceiptStore {
        &self.store
    }

    /// Give the store handle back after a batch.
    pub fn into_store(self) -> ReceiptStore {
        self.store
    }

    /// Ingest a batch of drafts, each in its own transaction.
    pub fn ingest_batch(&mut self, drafts: &[DraftReceipt]) -> IngestReport {
        self.ingest_batch_with(drafts, |_, _| {})
    }

    /// Like [`ingest_batch`](Self::ingest_batch), invoking `on_draft` after
    /// each draft (progress reporting).
    pub fn ingest_batch_with(
        &mut self,
        drafts: &[DraftReceipt],
        mut on_draft: impl FnMut(usize, &IngestOutcome),
    ) -> IngestReport {
        let mut report = IngestReport::default();
        for (idx, draft) in drafts.iter().enumerate() {
            let outcome = self.ingest_one(draft);
            match &outcome {
                IngestOutcome::Inserted { receipt_id, warnings } => {
                    tracing::info!(receipt_id, warnings = warnings.len(), "inserted receipt");
                }
                IngestOutcome::Replaced { receipt_id, warnings } => {
                    tracing::info!(receipt_id, warnings = warnings.len(), "replaced receipt");
                }
                IngestOutcome::Skipped { existing_id } => {
                    tracing::info!(existing_id, "skipped duplicate receipt");
                }
                IngestOutcome::Rejected { reason } => {
                    tracing::warn!(source = %draft.source_label(), "rejected draft: {}", reason);
                }
            }
            on_draft(idx, &outcome);
            report.entries.push(IngestEntry {
                source: draft.source_label(),
                outcome,
            });
        }
        report
    }

    fn ingest_one(&mut self, draft: &DraftReceipt) -> IngestOutcome {
        // Market resolution happens before validation; creating the market
        // record is worthwhile even when the receipt itself is rejected.
        // A draft without a store number skips this and fails validation below.
        let mut warnings = Vec::new();
        if let Some(obs) = MarketObservation::from_draft(draft) {
            match market::resolve_market(&self.store, &obs) {
                Ok(resolution) => warnings.extend(resolution.conflicts),
                Err(e) => {
                    return IngestOutcome::Rejected {
                        reason: RejectReason::Storage(e.to_string()),
                    };
                }
            }
        }

        let mut normalized = match normalize::normalize(&self.store, draft, self.policy) {
            Ok(normalized) => normalized,
            Err(NormalizeError::Duplicate { existing_id }) => {
                return IngestOutcome::Skipped { existing_id };
            }
            Err(NormalizeError::Validation(e)) => {
                return IngestOutcome::Rejected {
                    reason: RejectReason::Validation(e),
                };
            }
            Err(NormalizeError::Storage(e)) => {
                return IngestOutcome::Rejected {
                    reason: RejectReason::Storage(e.to_string()),
                };
            }
        };
        warnings.append(&mut normalized.warnings);
        let replaced = normalized.replaces.is_some();

        match self.store.persist(&normalized) {
            Ok(receipt_id) => {
                catalog::record_products(&self.store, &normalized.items);
                if replaced {
                    IngestOutcome::Replaced { receipt_id, warnings }
                } else {
                    IngestOutcome::Inserted { receipt_id, warnings }
                }
            }
            Err(e) => IngestOutcome::Rejected {
                reason: RejectReason::Storage(e.to_string()),
            },
        }
    }
}
