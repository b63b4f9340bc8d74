//! SQLite storage implementation
//!
//! One `ReceiptStore` owns the connection for the duration of a batch; no
//! other component holds a raw handle. Referential integrity is enabled on
//! every connection, and each receipt is written inside its own
//! transaction so a partial receipt is never observable.

use crate::market::{Market, MarketObservation};
use crate::receipt::{
    LineKind, NormalizedReceipt, Receipt, ReceiptId, ReceiptItem, ReceiptKey, TaxSummary,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;

use super::schema;

/// SQLite-backed store for markets, receipts, and the product catalog.
pub struct ReceiptStore {
    conn: Connection,
}

impl ReceiptStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Enable referential integrity and apply the schema idempotently
    fn initialize(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a unit of work inside one transaction: commit on success,
    /// rollback on error or early drop.
    pub fn run_in_transaction<T, F>(&mut self, unit_of_work: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let out = unit_of_work(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ========== Market Operations ==========

    /// Get a market by its store number
    pub fn find_market(&self, store_number: &str) -> Result<Option<Market>> {
        self.conn
            .query_row(
                "SELECT id, store_number, name, street, postal_code, city, phone, tax_id,
                        latitude, longitude, created_at, updated_at
                 FROM markets WHERE store_number = ?1",
                [store_number],
                row_to_market,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert a market on first sighting of its store number
    pub fn insert_market(&self, obs: &MarketObservation) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO markets (store_number, name, street, postal_code, city, phone, tax_id,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                obs.store_number,
                obs.name,
                obs.street,
                obs.postal_code,
                obs.city,
                obs.phone,
                obs.tax_id,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Write back an enriched market record
    pub fn update_market(&self, market: &Market) -> Result<()> {
        self.conn.execute(
            "UPDATE markets
             SET name = ?2, street = ?3, postal_code = ?4, city = ?5, phone = ?6, tax_id = ?7,
                 latitude = ?8, longitude = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                market.id,
                market.name,
                market.street,
                market.postal_code,
                market.city,
                market.phone,
                market.tax_id,
                market.latitude,
                market.longitude,
                market.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Count all markets
    pub fn count_markets(&self) -> Result<usize> {
        self.count_table("markets")
    }

    // ========== Receipt Operations ==========

    /// Look up a receipt id by its natural key
    pub fn find_receipt_id(&self, key: &ReceiptKey) -> Result<Option<ReceiptId>> {
        self.conn
            .query_row(
                "SELECT id FROM receipts
                 WHERE store_number = ?1 AND register_number = ?2
                   AND receipt_number = ?3 AND purchase_date = ?4",
                params![
                    key.store_number,
                    key.register_number,
                    key.receipt_number,
                    key.purchase_date.to_string(),
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Persist a normalized receipt atomically: header, items, and tax rows
    /// land together or not at all. When the bundle replaces a prior
    /// receipt, the old rows are removed in the same transaction (items and
    /// tax rows go with it via cascade).
    pub fn persist(&mut self, normalized: &NormalizedReceipt) -> Result<ReceiptId> {
        let tx = self.conn.transaction()?;

        if let Some(prior_id) = normalized.replaces {
            tx.execute("DELETE FROM receipts WHERE id = ?1", [prior_id])?;
        }

        let receipt_id = insert_receipt_row(&tx, &normalized.receipt)?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO receipt_items (
                    receipt_id, name, kind, unit_price, quantity, unit, weight, price_per_unit,
                    total, tax_code, tax_percent, is_deposit, is_return, is_discount,
                    is_counter_service, bonus_ineligible, bonus_label, bonus_amount, position_nr
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            )?;
            for item in &normalized.items {
                stmt.execute(params![
                    receipt_id,
                    item.name,
                    item.kind.as_str(),
                    item.unit_price.map(|d| d.to_string()),
                    item.quantity.to_string(),
                    item.unit,
                    item.weight.map(|d| d.to_string()),
                    item.price_per_unit.map(|d| d.to_string()),
                    item.total.to_string(),
                    item.tax_code,
                    item.tax_percent.map(|d| d.to_string()),
                    item.is_deposit,
                    item.is_return,
                    item.is_discount,
                    item.is_counter_service,
                    item.bonus_ineligible,
                    item.bonus_label,
                    item.bonus_amount.map(|d| d.to_string()),
                    item.position_nr,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO tax_summaries (receipt_id, rate_code, rate_percent, net, tax, gross)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for bucket in &normalized.taxes {
                stmt.execute(params![
                    receipt_id,
                    bucket.rate_code,
                    bucket.rate_percent.map(|d| d.to_string()),
                    bucket.net.to_string(),
                    bucket.tax.to_string(),
                    bucket.gross.to_string(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(receipt_id)
    }

    /// Get a receipt header by id
    pub fn get_receipt(&self, id: ReceiptId) -> Result<Option<Receipt>> {
        self.conn
            .query_row(
                &format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?1"),
                [id],
                row_to_receipt,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get all items of a receipt, in printed order
    pub fn get_items(&self, receipt_id: ReceiptId) -> Result<Vec<ReceiptItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, kind, unit_price, quantity, unit, weight, price_per_unit, total,
                    tax_code, tax_percent, is_deposit, is_return, is_discount,
                    is_counter_service, bonus_ineligible, bonus_label, bonus_amount, position_nr
             FROM receipt_items WHERE receipt_id = ?1 ORDER BY position_nr",
        )?;
        let items = stmt
            .query_map([receipt_id], row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Get all tax buckets of a receipt
    pub fn get_tax_summaries(&self, receipt_id: ReceiptId) -> Result<Vec<TaxSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT rate_code, rate_percent, net, tax, gross
             FROM tax_summaries WHERE receipt_id = ?1 ORDER BY rate_code",
        )?;
        let buckets = stmt
            .query_map([receipt_id], row_to_tax)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(buckets)
    }

    /// Delete a receipt; its item and tax rows cascade.
    /// Returns whether a row was deleted.
    pub fn delete_receipt(&self, id: ReceiptId) -> Result<bool> {
        let changed = self.conn.execute("DELETE FROM receipts WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Count all receipts
    pub fn count_receipts(&self) -> Result<usize> {
        self.count_table("receipts")
    }

    /// Count all receipt items
    pub fn count_items(&self) -> Result<usize> {
        self.count_table("receipt_items")
    }

    /// Count all tax summary rows
    pub fn count_tax_rows(&self) -> Result<usize> {
        self.count_table("tax_summaries")
    }

    // ========== Product Catalog Operations ==========

    /// Insert or enrich a catalog entry. Inference fields only fill gaps;
    /// an existing non-null value wins over a new observation.
    pub fn upsert_product(&self, product: &NewProduct) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO products (name, category, brand, organic, typical_tax_code, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(name) DO UPDATE SET
                 category = COALESCE(products.category, excluded.category),
                 brand = COALESCE(products.brand, excluded.brand),
                 organic = MAX(products.organic, excluded.organic),
                 typical_tax_code = COALESCE(products.typical_tax_code, excluded.typical_tax_code),
                 last_seen = excluded.last_seen",
            params![
                product.name,
                product.category,
                product.brand,
                product.organic,
                product.typical_tax_code,
                now,
            ],
        )?;
        Ok(())
    }

    /// Count all catalog entries
    pub fn count_products(&self) -> Result<usize> {
        self.count_table("products")
    }

    fn count_table(&self, table: &str) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            markets: self.count_markets()?,
            receipts: self.count_receipts()?,
            items: self.count_items()?,
            tax_rows: self.count_tax_rows()?,
            products: self.count_products()?,
        })
    }
}

/// New catalog entry derived from an item name.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub organic: bool,
    pub typical_tax_code: Option<String>,
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub markets: usize,
    pub receipts: usize,
    pub items: usize,
    pub tax_rows: usize,
    pub products: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Store statistics:")?;
        writeln!(f, "  Markets: {}", self.markets)?;
        writeln!(f, "  Receipts: {}", self.receipts)?;
        writeln!(f, "  Items: {}", self.items)?;
        writeln!(f, "  Tax rows: {}", self.tax_rows)?;
        writeln!(f, "  Products: {}", self.products)
    }
}

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const RECEIPT_COLUMNS: &str = "store_number, register_number, receipt_number, purchase_date, \
    purchase_time, operator, device_start, device_stop, store_name, street, postal_code, city, \
    store_tax_id, gross_total, net_total, tax_total, payment_method, amount_tendered, \
    change_given, bonus_redeemed, bonus_collected, bonus_balance, fiscal_signature, \
    fiscal_counter, device_serial, source_file, ingested_at";

fn insert_receipt_row(conn: &Connection, receipt: &Receipt) -> Result<ReceiptId> {
    conn.execute(
        &format!(
            "INSERT INTO receipts ({RECEIPT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)"
        ),
        params![
            receipt.key.store_number,
            receipt.key.register_number,
            receipt.key.receipt_number,
            receipt.key.purchase_date.to_string(),
            receipt.purchase_time.to_string(),
            receipt.operator,
            receipt.device_start.map(|dt| dt.format(DATETIME_FORMAT).to_string()),
            receipt.device_stop.map(|dt| dt.format(DATETIME_FORMAT).to_string()),
            receipt.store_name,
            receipt.street,
            receipt.postal_code,
            receipt.city,
            receipt.store_tax_id,
            receipt.gross_total.to_string(),
            receipt.net_total.map(|d| d.to_string()),
            receipt.tax_total.map(|d| d.to_string()),
            receipt.payment_method,
            receipt.amount_tendered.map(|d| d.to_string()),
            receipt.change_given.map(|d| d.to_string()),
            receipt.bonus_redeemed.map(|d| d.to_string()),
            receipt.bonus_collected.map(|d| d.to_string()),
            receipt.bonus_balance.map(|d| d.to_string()),
            receipt.fiscal_signature,
            receipt.fiscal_counter,
            receipt.device_serial,
            receipt.source_file,
            receipt.ingested_at.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ========== Row Mapping ==========

fn row_to_market(row: &Row) -> rusqlite::Result<Market> {
    Ok(Market {
        id: row.get(0)?,
        store_number: row.get(1)?,
        name: row.get(2)?,
        street: row.get(3)?,
        postal_code: row.get(4)?,
        city: row.get(5)?,
        phone: row.get(6)?,
        tax_id: row.get(7)?,
        latitude: row.get(8)?,
        longitude: row.get(9)?,
        created_at: utc_col(row, 10)?,
        updated_at: utc_col(row, 11)?,
    })
}

fn row_to_receipt(row: &Row) -> rusqlite::Result<Receipt> {
    Ok(Receipt {
        key: ReceiptKey {
            store_number: row.get(0)?,
            register_number: row.get(1)?,
            receipt_number: row.get(2)?,
            purchase_date: date_col(row, 3)?,
        },
        purchase_time: time_col(row, 4)?,
        operator: row.get(5)?,
        device_start: opt_datetime_col(row, 6)?,
        device_stop: opt_datetime_col(row, 7)?,
        store_name: row.get(8)?,
        street: row.get(9)?,
        postal_code: row.get(10)?,
        city: row.get(11)?,
        store_tax_id: row.get(12)?,
        gross_total: decimal_col(row, 13)?,
        net_total: opt_decimal_col(row, 14)?,
        tax_total: opt_decimal_col(row, 15)?,
        payment_method: row.get(16)?,
        amount_tendered: opt_decimal_col(row, 17)?,
        change_given: opt_decimal_col(row, 18)?,
        bonus_redeemed: opt_decimal_col(row, 19)?,
        bonus_collected: opt_decimal_col(row, 20)?,
        bonus_balance: opt_decimal_col(row, 21)?,
        fiscal_signature: row.get(22)?,
        fiscal_counter: row.get(23)?,
        device_serial: row.get(24)?,
        source_file: row.get(25)?,
        ingested_at: utc_col(row, 26)?,
    })
}

fn row_to_item(row: &Row) -> rusqlite::Result<ReceiptItem> {
    let kind_str: String = row.get(1)?;
    let kind = LineKind::from_str(&kind_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
    })?;
    Ok(ReceiptItem {
        name: row.get(0)?,
        kind,
        unit_price: opt_decimal_col(row, 2)?,
        quantity: decimal_col(row, 3)?,
        unit: row.get(4)?,
        weight: opt_decimal_col(row, 5)?,
        price_per_unit: opt_decimal_col(row, 6)?,
        total: decimal_col(row, 7)?,
        tax_code: row.get(8)?,
        tax_percent: opt_decimal_col(row, 9)?,
        is_deposit: row.get(10)?,
        is_return: row.get(11)?,
        is_discount: row.get(12)?,
        is_counter_service: row.get(13)?,
        bonus_ineligible: row.get(14)?,
        bonus_label: row.get(15)?,
        bonus_amount: opt_decimal_col(row, 16)?,
        position_nr: row.get(17)?,
    })
}

fn row_to_tax(row: &Row) -> rusqlite::Result<TaxSummary> {
    Ok(TaxSummary {
        rate_code: row.get(0)?,
        rate_percent: opt_decimal_col(row, 1)?,
        net: decimal_col(row, 2)?,
        tax: decimal_col(row, 3)?,
        gross: decimal_col(row, 4)?,
    })
}

// ========== Column Helpers ==========
//
// Monetary columns hold exact decimal text and calendar columns ISO text,
// so reading them back is a parse that can only fail on a corrupted store.

pub(crate) fn decimal_col(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_decimal_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Decimal::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn date_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_datetime_col(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn utc_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::IngestWarning;
    use crate::Error;

    fn sample_normalized(receipt_number: &str, totals: &[(&str, i64)]) -> NormalizedReceipt {
        let items = totals
            .iter()
            .enumerate()
            .map(|(idx, (name, cents))| ReceiptItem {
                name: name.to_string(),
                kind: LineKind::Product,
                unit_price: None,
                quantity: Decimal::ONE,
                unit: None,
                weight: None,
                price_per_unit: None,
                total: Decimal::new(*cents, 2),
                tax_code: Some("B".to_string()),
                tax_percent: Some(Decimal::new(7, 0)),
                is_deposit: false,
                is_return: false,
                is_discount: false,
                is_counter_service: false,
                bonus_ineligible: false,
                bonus_label: None,
                bonus_amount: None,
                position_nr: (idx + 1) as u32,
            })
            .collect::<Vec<_>>();
        let gross: Decimal = items.iter().map(|i| i.total).sum();

        NormalizedReceipt {
            receipt: Receipt {
                key: ReceiptKey {
                    store_number: "4711".to_string(),
                    register_number: "2".to_string(),
                    receipt_number: receipt_number.to_string(),
                    purchase_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
                },
                operator: None,
                purchase_time: NaiveTime::from_hms_opt(18, 32, 0).unwrap(),
                device_start: None,
                device_stop: None,
                store_name: Some("Markt Nord".to_string()),
                street: None,
                postal_code: None,
                city: Some("Bremen".to_string()),
                store_tax_id: None,
                gross_total: gross,
                net_total: None,
                tax_total: None,
                payment_method: Some("EC-KARTE".to_string()),
                amount_tendered: None,
                change_given: None,
                bonus_redeemed: None,
                bonus_collected: None,
                bonus_balance: None,
                fiscal_signature: None,
                fiscal_counter: None,
                device_serial: None,
                source_file: Some("test.pdf".to_string()),
                ingested_at: Utc::now(),
            },
            taxes: vec![TaxSummary {
                rate_code: "B".to_string(),
                rate_percent: Some(Decimal::new(7, 0)),
                net: gross - Decimal::new(50, 2),
                tax: Decimal::new(50, 2),
                gross,
            }],
            items,
            replaces: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.db");
        {
            let mut store = ReceiptStore::open(&path).unwrap();
            store.persist(&sample_normalized("1", &[("Milch", 119)])).unwrap();
        }
        // Reopening applies the DDL again without clobbering data
        let store = ReceiptStore::open(&path).unwrap();
        assert_eq!(store.count_receipts().unwrap(), 1);
    }

    #[test]
    fn test_persist_and_fetch_roundtrip() {
        let mut store = ReceiptStore::open_in_memory().unwrap();
        let normalized = sample_normalized("0042", &[("Milch", 119), ("Brot", 249)]);
        let id = store.persist(&normalized).unwrap();

        let receipt = store.get_receipt(id).unwrap().unwrap();
        assert_eq!(receipt.key, normalized.receipt.key);
        assert_eq!(receipt.gross_total, Decimal::new(368, 2));
        assert_eq!(receipt.payment_method.as_deref(), Some("EC-KARTE"));

        let items = store.get_items(id).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Milch");
        assert_eq!(items[0].total, Decimal::new(119, 2));
        assert_eq!(items[1].position_nr, 2);

        let taxes = store.get_tax_summaries(id).unwrap();
        assert_eq!(taxes.len(), 1);
        assert_eq!(taxes[0].gross, Decimal::new(368, 2));
    }

    #[test]
    fn test_natural_key_unique_in_store() {
        let mut store = ReceiptStore::open_in_memory().unwrap();
        let normalized = sample_normalized("0042", &[("Milch", 119)]);
        store.persist(&normalized).unwrap();

        // Same natural key, no replace id: the store constraint fires
        let err = store.persist(&normalized).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.count_receipts().unwrap(), 1);
    }

    #[test]
    fn test_failed_persist_leaves_no_partial_rows() {
        let mut store = ReceiptStore::open_in_memory().unwrap();
        store.persist(&sample_normalized("0042", &[("Milch", 119)])).unwrap();

        // Duplicate key fails at the header insert, after which nothing of
        // the second bundle may be visible
        let items_before = store.count_items().unwrap();
        let _ = store.persist(&sample_normalized("0042", &[("Brot", 249)]));
        assert_eq!(store.count_items().unwrap(), items_before);
        assert_eq!(store.count_tax_rows().unwrap(), 1);
    }

    #[test]
    fn test_replace_swaps_rows_atomically() {
        let mut store = ReceiptStore::open_in_memory().unwrap();
        let first = sample_normalized("0042", &[("Milch", 119), ("Brot", 249)]);
        let prior_id = store.persist(&first).unwrap();

        let mut second = sample_normalized("0042", &[("Kaffee", 599)]);
        second.replaces = Some(prior_id);
        let new_id = store.persist(&second).unwrap();

        assert_ne!(prior_id, new_id);
        assert_eq!(store.count_receipts().unwrap(), 1);
        let items = store.get_items(new_id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Kaffee");
        // No orphans from the replaced receipt
        assert_eq!(store.count_items().unwrap(), 1);
        assert_eq!(store.count_tax_rows().unwrap(), 1);
    }

    #[test]
    fn test_cascade_delete_scoped_to_one_receipt() {
        let mut store = ReceiptStore::open_in_memory().unwrap();
        let a = store.persist(&sample_normalized("1", &[("Milch", 119)])).unwrap();
        let b = store.persist(&sample_normalized("2", &[("Brot", 249), ("Butter", 329)])).unwrap();

        assert!(store.delete_receipt(a).unwrap());
        assert_eq!(store.count_receipts().unwrap(), 1);
        assert_eq!(store.count_items().unwrap(), 2);
        assert_eq!(store.get_items(b).unwrap().len(), 2);
        assert_eq!(store.count_tax_rows().unwrap(), 1);

        // Deleting again is a no-op
        assert!(!store.delete_receipt(a).unwrap());
    }

    #[test]
    fn test_find_receipt_id_by_natural_key() {
        let mut store = ReceiptStore::open_in_memory().unwrap();
        let normalized = sample_normalized("0042", &[("Milch", 119)]);
        let id = store.persist(&normalized).unwrap();

        assert_eq!(store.find_receipt_id(&normalized.receipt.key).unwrap(), Some(id));

        let mut other_key = normalized.receipt.key.clone();
        other_key.receipt_number = "9999".to_string();
        assert_eq!(store.find_receipt_id(&other_key).unwrap(), None);
    }

    #[test]
    fn test_run_in_transaction_rolls_back_on_error() {
        let mut store = ReceiptStore::open_in_memory().unwrap();
        let result: Result<()> = store.run_in_transaction(|tx| {
            tx.execute(
                "INSERT INTO markets (store_number, created_at, updated_at) VALUES ('1', '', '')",
                [],
            )?;
            Err(Error::Parse("forced failure".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.count_markets().unwrap(), 0);
    }

    #[test]
    fn test_product_upsert_enriches_without_overwrite() {
        let store = ReceiptStore::open_in_memory().unwrap();
        store
            .upsert_product(&NewProduct {
                name: "BIO VOLLMILCH 1L".to_string(),
                category: None,
                brand: None,
                organic: true,
                typical_tax_code: Some("B".to_string()),
            })
            .unwrap();
        store
            .upsert_product(&NewProduct {
                name: "BIO VOLLMILCH 1L".to_string(),
                category: Some("dairy".to_string()),
                brand: None,
                organic: false,
                typical_tax_code: Some("A".to_string()),
            })
            .unwrap();

        assert_eq!(store.count_products().unwrap(), 1);
        let (category, organic, tax_code): (Option<String>, bool, Option<String>) = store
            .conn()
            .query_row(
                "SELECT category, organic, typical_tax_code FROM products WHERE name = ?1",
                ["BIO VOLLMILCH 1L"],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(category.as_deref(), Some("dairy"));
        assert!(organic);
        assert_eq!(tax_code.as_deref(), Some("B"));
    }

    #[test]
    fn test_warnings_do_not_block_persistence() {
        let mut store = ReceiptStore::open_in_memory().unwrap();
        let mut normalized = sample_normalized("7", &[("Milch", 119)]);
        normalized.warnings.push(IngestWarning::ItemSumMismatch {
            item_sum: Decimal::new(119, 2),
            gross_total: Decimal::new(500, 2),
            difference: Decimal::new(381, 2),
        });
        assert!(store.persist(&normalized).is_ok());
    }
}
