//! Receipt normalization
//!
//! The single pass that turns a loosely-typed draft into a fully-typed
//! [`NormalizedReceipt`]. All coercion and validation happens here, in
//! order: required fields, type coercion, natural-key computation,
//! duplicate check, item and tax normalization, reconciliation.
//!
//! Monetary values are parsed into `Decimal` - never floating point - so
//! that reconciliation comparisons stay exact across additions.

use crate::receipt::{
    IngestWarning, LineKind, NormalizedReceipt, Receipt, ReceiptId, ReceiptItem, ReceiptKey,
    TaxSummary,
};
use crate::storage::ReceiptStore;
use crate::DraftReceipt;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;

/// Absolute tolerance for sum reconciliation, in currency units.
pub fn reconciliation_tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

/// Policy for a draft whose natural key already exists in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Signal the duplicate and leave the stored receipt untouched
    #[default]
    Reject,
    /// Delete the stored receipt (cascading to its rows) and re-ingest
    Replace,
}

/// A draft that cannot become a receipt. Caller input, never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("malformed value `{raw}` for field `{field}`")]
    MalformedField { field: String, raw: String },
}

impl ValidationError {
    fn missing(field: impl Into<String>) -> Self {
        ValidationError::MissingField(field.into())
    }

    fn malformed(field: impl Into<String>, raw: impl Into<String>) -> Self {
        ValidationError::MalformedField {
            field: field.into(),
            raw: raw.into(),
        }
    }
}

/// Why normalization did not produce a receipt.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The natural key already exists and the policy is reject. This is a
    /// steady-state condition (the same PDF seen twice), not a fault.
    #[error("receipt already stored with id {existing_id}")]
    Duplicate { existing_id: ReceiptId },

    #[error(transparent)]
    Storage(#[from] crate::Error),
}

/// Validate and coerce a draft into a receipt bundle ready for persistence.
///
/// The store is consulted only for the duplicate check. Reconciliation
/// mismatches are attached as warnings on the result, not errors.
pub fn normalize(
    store: &ReceiptStore,
    draft: &DraftReceipt,
    policy: DuplicatePolicy,
) -> Result<NormalizedReceipt, NormalizeError> {
    // Required fields
    let store_number = required(&draft.store_number, "store_number")?;
    let register_number = required(&draft.register_number, "register_number")?;
    let receipt_number = required(&draft.receipt_number, "receipt_number")?;
    let raw_date = required(&draft.purchase_date, "purchase_date")?;
    let raw_time = required(&draft.purchase_time, "purchase_time")?;
    let raw_gross = required(&draft.gross_total, "gross_total")?;

    // Coercion of the header
    let purchase_date = parse_date(raw_date)
        .ok_or_else(|| ValidationError::malformed("purchase_date", raw_date))?;
    let purchase_time = parse_time(raw_time)
        .ok_or_else(|| ValidationError::malformed("purchase_time", raw_time))?;
    let gross_total =
        parse_decimal(raw_gross).ok_or_else(|| ValidationError::malformed("gross_total", raw_gross))?;

    let net_total = opt_decimal(&draft.net_total, "net_total")?;
    let tax_total = opt_decimal(&draft.tax_total, "tax_total")?;
    let amount_tendered = opt_decimal(&draft.amount_tendered, "amount_tendered")?;
    let change_given = opt_decimal(&draft.change_given, "change_given")?;
    let bonus_redeemed = opt_decimal(&draft.bonus_redeemed, "bonus_redeemed")?;
    let bonus_collected = opt_decimal(&draft.bonus_collected, "bonus_collected")?;
    let bonus_balance = opt_decimal(&draft.bonus_balance, "bonus_balance")?;
    let device_start = opt_datetime(&draft.device_start, "device_start")?;
    let device_stop = opt_datetime(&draft.device_stop, "device_stop")?;

    // Natural key and duplicate check
    let key = ReceiptKey {
        store_number: store_number.to_string(),
        register_number: register_number.to_string(),
        receipt_number: receipt_number.to_string(),
        purchase_date,
    };

    let mut replaces = None;
    if let Some(existing_id) = store.find_receipt_id(&key)? {
        match policy {
            DuplicatePolicy::Reject => return Err(NormalizeError::Duplicate { existing_id }),
            DuplicatePolicy::Replace => replaces = Some(existing_id),
        }
    }

    // Items
    let mut items = Vec::with_capacity(draft.items.len());
    for (idx, draft_item) in draft.items.iter().enumerate() {
        items.push(normalize_item(idx, draft_item)?);
    }

    // Tax buckets
    let mut taxes = Vec::with_capacity(draft.taxes.len());
    let mut seen_codes = HashSet::new();
    for (idx, entry) in draft.taxes.iter().enumerate() {
        let field = |name: &str| format!("taxes[{}].{}", idx, name);
        let rate_code = entry
            .rate_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ValidationError::missing(field("rate_code")))?
            .to_string();
        if !seen_codes.insert(rate_code.clone()) {
            return Err(ValidationError::malformed(
                field("rate_code"),
                format!("duplicate rate code `{}`", rate_code),
            )
            .into());
        }
        taxes.push(TaxSummary {
            rate_percent: opt_decimal(&entry.rate_percent, &field("rate_percent"))?,
            net: req_decimal(&entry.net, &field("net"))?,
            tax: req_decimal(&entry.tax, &field("tax"))?,
            gross: req_decimal(&entry.gross, &field("gross"))?,
            rate_code,
        });
    }

    let receipt = Receipt {
        key,
        operator: trimmed(&draft.operator),
        purchase_time,
        device_start,
        device_stop,
        store_name: trimmed(&draft.store_name),
        street: trimmed(&draft.street),
        postal_code: trimmed(&draft.postal_code),
        city: trimmed(&draft.city),
        store_tax_id: trimmed(&draft.tax_id),
        gross_total,
        net_total,
        tax_total,
        payment_method: trimmed(&draft.payment_method),
        amount_tendered,
        change_given,
        bonus_redeemed,
        bonus_collected,
        bonus_balance,
        fiscal_signature: trimmed(&draft.fiscal_signature),
        fiscal_counter: trimmed(&draft.fiscal_counter),
        device_serial: trimmed(&draft.device_serial),
        source_file: trimmed(&draft.source_file),
        ingested_at: Utc::now(),
    };

    let mut normalized = NormalizedReceipt {
        receipt,
        items,
        taxes,
        replaces,
        warnings: Vec::new(),
    };
    reconcile(&mut normalized);
    Ok(normalized)
}

fn normalize_item(
    idx: usize,
    draft: &crate::DraftItem,
) -> Result<ReceiptItem, ValidationError> {
    let field = |name: &str| format!("items[{}].{}", idx, name);

    let name = draft
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::missing(field("name")))?
        .to_string();

    // Line kind from the oracle's type tag; anything unrecognized or absent
    // is a regular product line.
    let kind = draft
        .kind
        .as_deref()
        .and_then(|tag| LineKind::from_str(tag).ok())
        .unwrap_or(LineKind::Product);

    let total = req_decimal(&draft.total, &field("total"))?;
    let quantity = match opt_decimal(&draft.quantity, &field("quantity"))? {
        Some(q) => q,
        None => Decimal::ONE,
    };

    let position_nr = match &draft.position {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ValidationError::malformed(field("position"), raw.as_str()))?,
        None => (idx + 1) as u32,
    };

    Ok(ReceiptItem {
        unit_price: opt_decimal(&draft.unit_price, &field("unit_price"))?,
        quantity,
        unit: trimmed(&draft.unit),
        weight: opt_decimal(&draft.weight, &field("weight"))?,
        price_per_unit: opt_decimal(&draft.price_per_unit, &field("price_per_unit"))?,
        total,
        tax_code: trimmed(&draft.tax_code),
        tax_percent: opt_decimal(&draft.tax_percent, &field("tax_percent"))?,
        is_deposit: kind == LineKind::Deposit,
        is_return: kind == LineKind::Return,
        is_discount: draft.is_discount.unwrap_or(false),
        is_counter_service: draft.is_counter_service.unwrap_or(false),
        bonus_ineligible: draft.bonus_ineligible.unwrap_or(false),
        bonus_label: trimmed(&draft.bonus_label),
        bonus_amount: opt_decimal(&draft.bonus_amount, &field("bonus_amount"))?,
        name,
        kind,
        position_nr,
    })
}

/// Compare independently derived sums against the printed gross total and
/// attach a warning for each discrepancy beyond the tolerance.
fn reconcile(normalized: &mut NormalizedReceipt) {
    let tolerance = reconciliation_tolerance();
    let gross_total = normalized.receipt.gross_total;

    if !normalized.items.is_empty() {
        let item_sum = normalized.item_sum();
        let difference = gross_total - item_sum;
        if difference.abs() > tolerance {
            normalized.warnings.push(IngestWarning::ItemSumMismatch {
                item_sum,
                gross_total,
                difference,
            });
        }
    }

    if !normalized.taxes.is_empty() {
        let bucket_sum = normalized.tax_bucket_sum();
        let difference = gross_total - bucket_sum;
        if difference.abs() > tolerance {
            normalized.warnings.push(IngestWarning::TaxSumMismatch {
                bucket_sum,
                gross_total,
                difference,
            });
        }
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, ValidationError> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::missing(name))
}

fn trimmed(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn req_decimal(field: &Option<String>, name: &str) -> Result<Decimal, ValidationError> {
    let raw = field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::missing(name))?;
    parse_decimal(raw).ok_or_else(|| ValidationError::malformed(name, raw))
}

fn opt_decimal(field: &Option<String>, name: &str) -> Result<Option<Decimal>, ValidationError> {
    match field.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_decimal(raw)
            .map(Some)
            .ok_or_else(|| ValidationError::malformed(name, raw)),
    }
}

fn opt_datetime(
    field: &Option<String>,
    name: &str,
) -> Result<Option<NaiveDateTime>, ValidationError> {
    match field.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_datetime(raw)
            .map(Some)
            .ok_or_else(|| ValidationError::malformed(name, raw)),
    }
}

/// Parse a monetary or quantity value the way it appears on receipts.
///
/// Accepts plain decimals, German comma decimals ("12,50"), thousands
/// separators ("1.234,56" / "1,234.56"), and a trailing currency marker.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let mut s = raw.trim();
    for marker in ["€", "EUR", "eur", "Eur"] {
        s = s.strip_suffix(marker).unwrap_or(s).trim_end();
        s = s.strip_prefix(marker).unwrap_or(s).trim_start();
    }
    let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return None;
    }

    let has_comma = s.contains(',');
    let has_dot = s.contains('.');
    let cleaned = if has_comma && has_dot {
        // The rightmost separator is the decimal point
        if s.rfind(',') > s.rfind('.') {
            s.replace('.', "").replace(',', ".")
        } else {
            s.replace(',', "")
        }
    } else if has_comma {
        if s.matches(',').count() > 1 {
            s.replace(',', "")
        } else {
            s.replace(',', ".")
        }
    } else {
        s
    };

    Decimal::from_str(&cleaned).ok()
}

/// Parse a date as printed on receipts: `DD.MM.YYYY` or ISO `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    for format in ["%d.%m.%Y", "%Y-%m-%d", "%d.%m.%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    None
}

/// Parse a time of day: `HH:MM` or `HH:MM:SS`.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(raw, format) {
            return Some(time);
        }
    }
    None
}

/// Parse a fiscal-device timestamp in ISO or receipt-local formats.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%d.%m.%Y %H:%M:%S",
        "%d.%m.%Y %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{DraftItem, DraftTaxEntry};

    fn base_draft() -> DraftReceipt {
        DraftReceipt {
            store_number: Some("4711".into()),
            register_number: Some("2".into()),
            receipt_number: Some("0042".into()),
            purchase_date: Some("14.03.2025".into()),
            purchase_time: Some("18:32".into()),
            gross_total: Some("12,50".into()),
            items: vec![DraftItem {
                name: Some("BIO VOLLMILCH 1L".into()),
                total: Some("12,50".into()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_decimal_locale_forms() {
        assert_eq!(parse_decimal("12,50"), Some(Decimal::new(1250, 2)));
        assert_eq!(parse_decimal("12.50"), Some(Decimal::new(1250, 2)));
        assert_eq!(parse_decimal("1.234,56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_decimal("1,234.56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_decimal("-0,99"), Some(Decimal::new(-99, 2)));
        assert_eq!(parse_decimal("3,99 €"), Some(Decimal::new(399, 2)));
        assert_eq!(parse_decimal("EUR 20,00"), Some(Decimal::new(2000, 2)));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn test_parse_date_forms() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(parse_date("14.03.2025"), Some(expected));
        assert_eq!(parse_date("2025-03-14"), Some(expected));
        assert_eq!(parse_date("14.13.2025"), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_missing_required_field() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let mut draft = base_draft();
        draft.purchase_time = None;

        let err = normalize(&store, &draft, DuplicatePolicy::Reject).unwrap_err();
        match err {
            NormalizeError::Validation(ValidationError::MissingField(field)) => {
                assert_eq!(field, "purchase_time");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_gross_total_names_field_and_value() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let mut draft = base_draft();
        draft.gross_total = Some("abc".into());

        let err = normalize(&store, &draft, DuplicatePolicy::Reject).unwrap_err();
        match err {
            NormalizeError::Validation(ValidationError::MalformedField { field, raw }) => {
                assert_eq!(field, "gross_total");
                assert_eq!(raw, "abc");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_comma_decimal_is_exact() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let normalized = normalize(&store, &base_draft(), DuplicatePolicy::Reject).unwrap();
        assert_eq!(normalized.receipt.gross_total, Decimal::new(1250, 2));
        assert!(normalized.warnings.is_empty());
    }

    #[test]
    fn test_item_defaults() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let mut draft = base_draft();
        draft.items.push(DraftItem {
            name: Some("Leergut".into()),
            kind: Some("return".into()),
            total: Some("-2,50".into()),
            ..Default::default()
        });
        draft.gross_total = Some("10,00".into());

        let normalized = normalize(&store, &draft, DuplicatePolicy::Reject).unwrap();
        let first = &normalized.items[0];
        assert_eq!(first.kind, LineKind::Product);
        assert_eq!(first.quantity, Decimal::ONE);
        assert_eq!(first.position_nr, 1);

        let second = &normalized.items[1];
        assert_eq!(second.kind, LineKind::Return);
        assert!(second.is_return);
        assert_eq!(second.position_nr, 2);
        assert!(normalized.warnings.is_empty());
    }

    #[test]
    fn test_reconciliation_warning_names_discrepancy() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let mut draft = base_draft();
        draft.gross_total = Some("50,00".into());
        draft.items = vec![DraftItem {
            name: Some("Kaffee".into()),
            total: Some("45,00".into()),
            ..Default::default()
        }];

        let normalized = normalize(&store, &draft, DuplicatePolicy::Reject).unwrap();
        assert_eq!(normalized.warnings.len(), 1);
        match &normalized.warnings[0] {
            IngestWarning::ItemSumMismatch { difference, .. } => {
                assert_eq!(*difference, Decimal::new(500, 2));
            }
            other => panic!("unexpected warning: {:?}", other),
        }
    }

    #[test]
    fn test_correction_lines_excluded_from_reconciliation() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let mut draft = base_draft();
        draft.items.push(DraftItem {
            name: Some("KAFFEE STORNO".into()),
            kind: Some("storno".into()),
            total: Some("-3,99".into()),
            ..Default::default()
        });

        let normalized = normalize(&store, &draft, DuplicatePolicy::Reject).unwrap();
        assert_eq!(normalized.item_sum(), Decimal::new(1250, 2));
        assert!(normalized.warnings.is_empty());
    }

    #[test]
    fn test_tax_buckets_reconcile() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let mut draft = base_draft();
        draft.taxes = vec![
            DraftTaxEntry {
                rate_code: Some("A".into()),
                rate_percent: Some("19".into()),
                net: Some("4,20".into()),
                tax: Some("0,80".into()),
                gross: Some("5,00".into()),
            },
            DraftTaxEntry {
                rate_code: Some("B".into()),
                rate_percent: Some("7".into()),
                net: Some("7,01".into()),
                tax: Some("0,49".into()),
                gross: Some("7,50".into()),
            },
        ];

        let normalized = normalize(&store, &draft, DuplicatePolicy::Reject).unwrap();
        assert_eq!(normalized.tax_bucket_sum(), Decimal::new(1250, 2));
        assert!(normalized.warnings.is_empty());
    }

    #[test]
    fn test_duplicate_tax_rate_code_rejected() {
        let store = ReceiptStore::open_in_memory().unwrap();
        let mut draft = base_draft();
        let bucket = DraftTaxEntry {
            rate_code: Some("A".into()),
            net: Some("5,00".into()),
            tax: Some("0,95".into()),
            gross: Some("5,95".into()),
            ..Default::default()
        };
        draft.taxes = vec![bucket.clone(), bucket];

        let err = normalize(&store, &draft, DuplicatePolicy::Reject).unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::Validation(ValidationError::MalformedField { .. })
        ));
    }
}
