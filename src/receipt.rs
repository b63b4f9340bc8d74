//! Typed receipt model
//!
//! Everything in this module is fully typed: money is `Decimal`, dates are
//! `chrono` values. Drafts only become these records by passing through the
//! normalizer, so no stringly data crosses past this point.

use crate::Error;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Database row id of a persisted receipt.
pub type ReceiptId = i64;

/// Kind of a line on a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// A regular purchased article
    Product,
    /// Container deposit charged with a purchase (Pfand)
    Deposit,
    /// Returned deposit or returned goods (negative line)
    Return,
    /// Cashier correction of an earlier line (Storno)
    Correction,
}

impl LineKind {
    /// Get the string representation of the line kind
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::Product => "product",
            LineKind::Deposit => "deposit",
            LineKind::Return => "return",
            LineKind::Correction => "correction",
        }
    }

    /// Get all line kinds
    pub fn all() -> &'static [LineKind] {
        &[
            LineKind::Product,
            LineKind::Deposit,
            LineKind::Return,
            LineKind::Correction,
        ]
    }

    /// Whether lines of this kind count towards the receipt total
    pub fn counts_towards_total(&self) -> bool {
        !matches!(self, LineKind::Correction)
    }
}

impl FromStr for LineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "product" | "article" | "artikel" | "item" => Ok(LineKind::Product),
            "deposit" | "pfand" => Ok(LineKind::Deposit),
            "return" | "leergut" | "refund" | "ruecknahme" | "rücknahme" => Ok(LineKind::Return),
            "correction" | "storno" | "void" => Ok(LineKind::Correction),
            other => Err(Error::Parse(format!("unknown line kind: {}", other))),
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Natural key of a physical receipt.
///
/// One fiscal transaction is identified by where it happened (store and
/// register), its receipt number, and the day it was printed. Receipt
/// numbers roll over, so the date is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptKey {
    pub store_number: String,
    pub register_number: String,
    pub receipt_number: String,
    pub purchase_date: NaiveDate,
}

impl fmt::Display for ReceiptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "store {} register {} receipt {} on {}",
            self.store_number, self.register_number, self.receipt_number, self.purchase_date
        )
    }
}

/// One physical transaction, fully typed.
///
/// Store fields are the snapshot as printed on *this* receipt. They are
/// intentionally duplicated from the market record so that the history
/// stays accurate if a store is later renamed or moves.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub key: ReceiptKey,
    pub operator: Option<String>,
    pub purchase_time: NaiveTime,
    pub device_start: Option<NaiveDateTime>,
    pub device_stop: Option<NaiveDateTime>,

    // Store snapshot
    pub store_name: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub store_tax_id: Option<String>,

    // Totals
    pub gross_total: Decimal,
    pub net_total: Option<Decimal>,
    pub tax_total: Option<Decimal>,

    // Payment
    pub payment_method: Option<String>,
    pub amount_tendered: Option<Decimal>,
    pub change_given: Option<Decimal>,

    // Loyalty program
    pub bonus_redeemed: Option<Decimal>,
    pub bonus_collected: Option<Decimal>,
    pub bonus_balance: Option<Decimal>,

    // Fiscal device fields, verbatim
    pub fiscal_signature: Option<String>,
    pub fiscal_counter: Option<String>,
    pub device_serial: Option<String>,

    pub source_file: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

/// One line on a receipt.
#[derive(Debug, Clone)]
pub struct ReceiptItem {
    pub name: String,
    pub kind: LineKind,
    pub unit_price: Option<Decimal>,
    pub quantity: Decimal,
    pub unit: Option<String>,
    pub weight: Option<Decimal>,
    pub price_per_unit: Option<Decimal>,
    pub total: Decimal,
    pub tax_code: Option<String>,
    pub tax_percent: Option<Decimal>,
    pub is_deposit: bool,
    pub is_return: bool,
    pub is_discount: bool,
    pub is_counter_service: bool,
    pub bonus_ineligible: bool,
    pub bonus_label: Option<String>,
    pub bonus_amount: Option<Decimal>,
    /// Position on the printed receipt, 1-based
    pub position_nr: u32,
}

/// One tax-rate bucket on a receipt.
#[derive(Debug, Clone)]
pub struct TaxSummary {
    pub rate_code: String,
    pub rate_percent: Option<Decimal>,
    pub net: Decimal,
    pub tax: Decimal,
    pub gross: Decimal,
}

/// A warning attached to a successfully normalized receipt.
///
/// Warnings are expected in steady state - extraction is imperfect - so
/// they never block persistence, but they must stay visible to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestWarning {
    /// Sum of item totals disagrees with the printed gross total
    ItemSumMismatch {
        item_sum: Decimal,
        gross_total: Decimal,
        difference: Decimal,
    },
    /// Sum of tax-bucket gross amounts disagrees with the printed gross total
    TaxSumMismatch {
        bucket_sum: Decimal,
        gross_total: Decimal,
        difference: Decimal,
    },
    /// A market field on this receipt disagrees with the stored market record
    MarketFieldConflict {
        store_number: String,
        field: &'static str,
        stored: String,
        observed: String,
    },
}

impl fmt::Display for IngestWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestWarning::ItemSumMismatch {
                item_sum,
                gross_total,
                difference,
            } => write!(
                f,
                "item totals sum to {} but receipt total is {} (off by {})",
                item_sum, gross_total, difference
            ),
            IngestWarning::TaxSumMismatch {
                bucket_sum,
                gross_total,
                difference,
            } => write!(
                f,
                "tax buckets sum to {} but receipt total is {} (off by {})",
                bucket_sum, gross_total, difference
            ),
            IngestWarning::MarketFieldConflict {
                store_number,
                field,
                stored,
                observed,
            } => write!(
                f,
                "store {}: receipt says {} = `{}` but market record has `{}`",
                store_number, field, observed, stored
            ),
        }
    }
}

/// A validated receipt bundle, ready for atomic persistence.
#[derive(Debug, Clone)]
pub struct NormalizedReceipt {
    pub receipt: Receipt,
    pub items: Vec<ReceiptItem>,
    pub taxes: Vec<TaxSummary>,
    /// Id of an existing receipt with the same natural key that this one
    /// replaces (set only under the replace policy)
    pub replaces: Option<ReceiptId>,
    pub warnings: Vec<IngestWarning>,
}

impl NormalizedReceipt {
    /// Sum of line totals that count towards the receipt total.
    pub fn item_sum(&self) -> Decimal {
        self.items
            .iter()
            .filter(|i| i.kind.counts_towards_total())
            .map(|i| i.total)
            .sum()
    }

    /// Sum of gross amounts across all tax buckets.
    pub fn tax_bucket_sum(&self) -> Decimal {
        self.taxes.iter().map(|t| t.gross).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_kind_roundtrip() {
        for kind in LineKind::all() {
            let s = kind.as_str();
            let parsed: LineKind = s.parse().unwrap();
            assert_eq!(*kind, parsed);
        }
    }

    #[test]
    fn test_line_kind_aliases() {
        assert_eq!(LineKind::from_str("Pfand").unwrap(), LineKind::Deposit);
        assert_eq!(LineKind::from_str("STORNO").unwrap(), LineKind::Correction);
        assert_eq!(LineKind::from_str("leergut").unwrap(), LineKind::Return);
        assert_eq!(LineKind::from_str("artikel").unwrap(), LineKind::Product);
        assert!(LineKind::from_str("coupon").is_err());
    }

    #[test]
    fn test_corrections_do_not_count_towards_total() {
        assert!(LineKind::Product.counts_towards_total());
        assert!(LineKind::Deposit.counts_towards_total());
        assert!(LineKind::Return.counts_towards_total());
        assert!(!LineKind::Correction.counts_towards_total());
    }

    #[test]
    fn test_receipt_key_display() {
        let key = ReceiptKey {
            store_number: "4711".into(),
            register_number: "2".into(),
            receipt_number: "0042".into(),
            purchase_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
        };
        assert_eq!(
            key.to_string(),
            "store 4711 register 2 receipt 0042 on 2025-03-14"
        );
    }
}
