//! Product catalog
//!
//! A deduplicated side table of product names with inferred attributes.
//! Population is opportunistic: it happens after a receipt is persisted,
//! outside its transaction, and a failure here never changes the ingest
//! outcome. The other tables do not depend on it.

use crate::receipt::{LineKind, ReceiptItem};
use crate::storage::{NewProduct, ReceiptStore};

/// Record the product lines of a freshly persisted receipt. Best-effort:
/// failures are logged and swallowed.
pub fn record_products(store: &ReceiptStore, items: &[ReceiptItem]) {
    for item in items {
        if item.kind != LineKind::Product || item.is_discount {
            continue;
        }
        let product = infer_product(&item.name, item.tax_code.as_deref());
        if let Err(e) = store.upsert_product(&product) {
            tracing::warn!(name = %item.name, "catalog update failed: {}", e);
        }
    }
}

/// Derive catalog attributes from an item name as printed on the receipt.
pub fn infer_product(name: &str, tax_code: Option<&str>) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        category: infer_category(name),
        brand: infer_brand(name),
        organic: is_organic(name),
        typical_tax_code: tax_code.map(str::to_string),
    }
}

/// Receipt names are uppercase and abbreviated; a keyword match covers the
/// common categories well enough for spend reports.
fn infer_category(name: &str) -> Option<String> {
    let upper = name.to_uppercase();
    let category = if contains_any(&upper, &["MILCH", "JOGHURT", "QUARK", "KAESE", "KÄSE", "BUTTER", "SAHNE"]) {
        "dairy"
    } else if contains_any(&upper, &["BROT", "BROETCHEN", "BRÖTCHEN", "TOAST", "CROISSANT"]) {
        "bakery"
    } else if contains_any(&upper, &["APFEL", "BANANE", "TOMATE", "GURKE", "SALAT", "PAPRIKA", "ZWIEBEL", "KARTOFFEL"]) {
        "produce"
    } else if contains_any(&upper, &["WASSER", "SAFT", "COLA", "LIMO", "BIER", "WEIN", "KAFFEE", "TEE"]) {
        "beverages"
    } else if contains_any(&upper, &["HAEHNCHEN", "HÄHNCHEN", "SCHINKEN", "SALAMI", "WURST", "HACK", "LACHS"]) {
        "meat & fish"
    } else if contains_any(&upper, &["SCHOKO", "KEKS", "GUMMI", "CHIPS", "RIEGEL", "BONBON"]) {
        "snacks"
    } else {
        return None;
    };
    Some(category.to_string())
}

/// Store brands appear as a leading token on the receipt line.
fn infer_brand(name: &str) -> Option<String> {
    let upper = name.to_uppercase();
    for brand in ["JA!", "REWE BIO", "REWE", "GUT&GUENSTIG", "EDEKA", "ALNATURA"] {
        if upper.starts_with(brand) {
            return Some(brand.to_string());
        }
    }
    None
}

fn is_organic(name: &str) -> bool {
    name.to_uppercase()
        .split(|c: char| !c.is_alphanumeric() && c != '!')
        .any(|token| token == "BIO")
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
