//! Draft records - the extraction-oracle boundary
//!
//! A draft is the loosely-typed output of the external PDF/AI extraction
//! step. Nothing about its shape is guaranteed: fields may be missing,
//! numbers may arrive as JSON strings with locale formatting, and extra
//! fields may appear. Everything here is optional and stringly; the
//! normalizer is the only component that turns drafts into typed records.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;

/// One receipt as emitted by the extraction oracle, prior to validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftReceipt {
    // Store identity as printed on this receipt
    #[serde(deserialize_with = "scalar_opt")]
    pub store_number: Option<String>,
    pub store_name: Option<String>,
    pub street: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub tax_id: Option<String>,

    // Transaction identity
    #[serde(deserialize_with = "scalar_opt")]
    pub receipt_number: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub register_number: Option<String>,
    pub operator: Option<String>,
    pub purchase_date: Option<String>,
    pub purchase_time: Option<String>,
    pub device_start: Option<String>,
    pub device_stop: Option<String>,

    // Totals and payment
    #[serde(deserialize_with = "scalar_opt")]
    pub gross_total: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub net_total: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub tax_total: Option<String>,
    pub payment_method: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub amount_tendered: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub change_given: Option<String>,

    // Loyalty program
    #[serde(deserialize_with = "scalar_opt")]
    pub bonus_redeemed: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub bonus_collected: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub bonus_balance: Option<String>,

    // Fiscal device fields, stored verbatim
    pub fiscal_signature: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub fiscal_counter: Option<String>,
    pub device_serial: Option<String>,

    /// Name of the PDF this draft was extracted from
    pub source_file: Option<String>,

    pub items: Vec<DraftItem>,
    pub taxes: Vec<DraftTaxEntry>,
}

/// One line on a draft receipt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftItem {
    pub name: Option<String>,
    /// Line type tag from the oracle ("product", "deposit", "return", ...)
    pub kind: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub unit_price: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub quantity: Option<String>,
    pub unit: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub weight: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub price_per_unit: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub total: Option<String>,
    pub tax_code: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub tax_percent: Option<String>,
    #[serde(deserialize_with = "bool_opt")]
    pub is_discount: Option<bool>,
    #[serde(deserialize_with = "bool_opt")]
    pub is_counter_service: Option<bool>,
    #[serde(deserialize_with = "bool_opt")]
    pub bonus_ineligible: Option<bool>,
    pub bonus_label: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub bonus_amount: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub position: Option<String>,
}

/// One tax-rate bucket on a draft receipt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftTaxEntry {
    pub rate_code: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub rate_percent: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub net: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub tax: Option<String>,
    #[serde(deserialize_with = "scalar_opt")]
    pub gross: Option<String>,
}

impl DraftReceipt {
    /// Parse a single draft from a JSON string.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Label used in reports when referring to this draft.
    pub fn source_label(&self) -> String {
        match (&self.source_file, &self.receipt_number) {
            (Some(f), _) => f.clone(),
            (None, Some(n)) => format!("receipt {}", n),
            (None, None) => "<unnamed draft>".to_string(),
        }
    }
}

/// Load drafts from a JSON file (single object or array) or from a
/// directory of `*.json` files.
///
/// Drafts with no `source_file` inherit the name of the file they came from.
pub fn load_drafts(path: &Path) -> Result<Vec<DraftReceipt>> {
    if path.is_dir() {
        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect();
        entries.sort();

        let mut drafts = Vec::new();
        for file in entries {
            drafts.extend(load_draft_file(&file)?);
        }
        Ok(drafts)
    } else {
        load_draft_file(path)
    }
}

fn load_draft_file(path: &Path) -> Result<Vec<DraftReceipt>> {
    let source_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let contents = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| Error::Draft {
        source_name: source_name.clone(),
        reason: e.to_string(),
    })?;

    let mut drafts: Vec<DraftReceipt> = match value {
        Value::Array(_) => {
            serde_json::from_value(value).map_err(|e| Error::Draft {
                source_name: source_name.clone(),
                reason: e.to_string(),
            })?
        }
        Value::Object(_) => {
            let draft = serde_json::from_value(value).map_err(|e| Error::Draft {
                source_name: source_name.clone(),
                reason: e.to_string(),
            })?;
            vec![draft]
        }
        other => {
            return Err(Error::Draft {
                source_name,
                reason: format!("expected object or array, got {}", json_type_name(&other)),
            });
        }
    };

    for draft in &mut drafts {
        if draft.source_file.is_none() {
            draft.source_file = Some(source_name.clone());
        }
    }
    Ok(drafts)
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accept a JSON string, number, or bool and keep it as a raw string.
///
/// Extraction output is inconsistent about scalar types ("12,50" vs 12.5),
/// so the boundary keeps everything stringly and defers parsing to the
/// normalizer.
fn scalar_opt<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected scalar, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Accept a JSON bool, 0/1 number, or "true"/"false" string.
fn bool_opt<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => Ok(Some(n.as_i64().unwrap_or(0) != 0)),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" | "" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!("expected bool, got `{}`", other))),
        },
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected bool, got {}",
            json_type_name(&other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_fields_accept_numbers_and_strings() {
        let draft = DraftReceipt::from_json(
            r#"{"store_number": 4711, "gross_total": "12,50", "receipt_number": "0042"}"#,
        )
        .unwrap();

        assert_eq!(draft.store_number.as_deref(), Some("4711"));
        assert_eq!(draft.gross_total.as_deref(), Some("12,50"));
        assert_eq!(draft.receipt_number.as_deref(), Some("0042"));
    }

    #[test]
    fn test_empty_strings_become_none() {
        let draft = DraftReceipt::from_json(r#"{"gross_total": "  ", "store_number": ""}"#).unwrap();
        assert!(draft.gross_total.is_none());
        assert!(draft.store_number.is_none());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let draft = DraftReceipt::from_json(
            r#"{"store_number": "1", "oracle_confidence": 0.93, "model": "gpt"}"#,
        )
        .unwrap();
        assert_eq!(draft.store_number.as_deref(), Some("1"));
    }

    #[test]
    fn test_loose_bools() {
        let item: DraftItem =
            serde_json::from_str(r#"{"name": "Pfand", "is_discount": "no", "bonus_ineligible": 1}"#)
                .unwrap();
        assert_eq!(item.is_discount, Some(false));
        assert_eq!(item.bonus_ineligible, Some(true));
    }

    #[test]
    fn test_load_drafts_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"receipt_number": "1", "items": []}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"[{"receipt_number": "2"}, {"receipt_number": "3", "source_file": "orig.pdf"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let drafts = load_drafts(dir.path()).unwrap();
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[0].source_file.as_deref(), Some("a.json"));
        assert_eq!(drafts[2].source_file.as_deref(), Some("orig.pdf"));
    }

    #[test]
    fn test_malformed_json_is_a_draft_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.json");
        std::fs::write(&file, "{not json").unwrap();

        let err = load_drafts(&file).unwrap_err();
        assert!(matches!(err, Error::Draft { .. }));
    }
}
