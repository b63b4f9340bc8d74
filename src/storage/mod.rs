//! Storage Layer - SQLite-backed persistence
//!
//! System of record is a single SQLite file with tables:
//! - markets(store_number, name, street, postal_code, city, phone, tax_id, ...)
//! - receipts(natural key + store snapshot + totals + fiscal fields)
//! - receipt_items(receipt_id, name, kind, prices, flags, position_nr)
//! - tax_summaries(receipt_id, rate_code, net, tax, gross)
//! - products(name, category, brand, organic, typical_tax_code)

pub mod schema;
pub mod sqlite;

pub use sqlite::{NewProduct, ReceiptStore, StoreStats};
