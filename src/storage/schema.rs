//! Database schema definitions
//!
//! The uniqueness and cascade rules here are load-bearing: the natural key
//! of a receipt and the ownership of its item/tax rows are enforced by the
//! store itself, not only by application logic.

/// SQL to create the markets table
pub const CREATE_MARKETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS markets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    store_number TEXT NOT NULL UNIQUE,
    name TEXT,
    street TEXT,
    postal_code TEXT,
    city TEXT,
    phone TEXT,
    tax_id TEXT,
    latitude REAL,
    longitude REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the receipts table
///
/// Store fields are the snapshot as printed on the receipt; monetary
/// columns hold exact decimal text, dates and times ISO text.
pub const CREATE_RECEIPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS receipts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    store_number TEXT NOT NULL,
    register_number TEXT NOT NULL,
    receipt_number TEXT NOT NULL,
    purchase_date TEXT NOT NULL,
    purchase_time TEXT NOT NULL,
    operator TEXT,
    device_start TEXT,
    device_stop TEXT,
    store_name TEXT,
    street TEXT,
    postal_code TEXT,
    city TEXT,
    store_tax_id TEXT,
    gross_total TEXT NOT NULL,
    net_total TEXT,
    tax_total TEXT,
    payment_method TEXT,
    amount_tendered TEXT,
    change_given TEXT,
    bonus_redeemed TEXT,
    bonus_collected TEXT,
    bonus_balance TEXT,
    fiscal_signature TEXT,
    fiscal_counter TEXT,
    device_serial TEXT,
    source_file TEXT,
    ingested_at TEXT NOT NULL,
    UNIQUE(store_number, register_number, receipt_number, purchase_date)
)
"#;

/// SQL to create the receipt_items table
pub const CREATE_RECEIPT_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS receipt_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    receipt_id INTEGER NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    unit_price TEXT,
    quantity TEXT NOT NULL,
    unit TEXT,
    weight TEXT,
    price_per_unit TEXT,
    total TEXT NOT NULL,
    tax_code TEXT,
    tax_percent TEXT,
    is_deposit INTEGER NOT NULL DEFAULT 0,
    is_return INTEGER NOT NULL DEFAULT 0,
    is_discount INTEGER NOT NULL DEFAULT 0,
    is_counter_service INTEGER NOT NULL DEFAULT 0,
    bonus_ineligible INTEGER NOT NULL DEFAULT 0,
    bonus_label TEXT,
    bonus_amount TEXT,
    position_nr INTEGER NOT NULL
)
"#;

/// SQL to create the tax_summaries table
pub const CREATE_TAX_SUMMARIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tax_summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    receipt_id INTEGER NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
    rate_code TEXT NOT NULL,
    rate_percent TEXT,
    net TEXT NOT NULL,
    tax TEXT NOT NULL,
    gross TEXT NOT NULL,
    UNIQUE(receipt_id, rate_code)
)
"#;

/// SQL to create the products catalog table
/// Best-effort side table, populated opportunistically from item names
pub const CREATE_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    category TEXT,
    brand TEXT,
    organic INTEGER NOT NULL DEFAULT 0,
    typical_tax_code TEXT,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_receipts_date ON receipts(purchase_date)",
    "CREATE INDEX IF NOT EXISTS idx_receipts_store ON receipts(store_number)",
    "CREATE INDEX IF NOT EXISTS idx_items_receipt ON receipt_items(receipt_id)",
    "CREATE INDEX IF NOT EXISTS idx_items_name ON receipt_items(name)",
    "CREATE INDEX IF NOT EXISTS idx_tax_receipt ON tax_summaries(receipt_id)",
];

/// All schema creation statements, in dependency order
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_MARKETS_TABLE,
        CREATE_RECEIPTS_TABLE,
        CREATE_RECEIPT_ITEMS_TABLE,
        CREATE_TAX_SUMMARIES_TABLE,
        CREATE_PRODUCTS_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
