//! # Kassenbuch - Grocery Receipt Ledger
//!
//! Turns loosely-typed receipt drafts (the output of an external PDF/AI
//! extraction step) into a consistent, deduplicated relational spend history.
//!
//! Kassenbuch provides:
//! - A tolerant draft boundary for extraction-oracle output
//! - A normalizer that coerces, validates, and reconciles draft receipts
//! - Market resolution with one-directional field enrichment
//! - Atomic per-receipt persistence into an embedded SQLite store
//! - Spend-history queries over the accumulated receipts

pub mod catalog;
pub mod config;
pub mod draft;
pub mod ingest;
pub mod market;
pub mod normalize;
pub mod queries;
pub mod receipt;
pub mod storage;
pub mod ui;

// Re-exports for convenient access
pub use draft::{DraftItem, DraftReceipt, DraftTaxEntry};
pub use ingest::{DuplicatePolicy, IngestCoordinator, IngestOutcome, IngestReport};
pub use market::{MarketResolution, resolve_market};
pub use normalize::{NormalizeError, ValidationError, normalize};
pub use receipt::{IngestWarning, LineKind, NormalizedReceipt, Receipt, ReceiptKey};
pub use storage::ReceiptStore;

/// Result type alias for kassenbuch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for kassenbuch operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable draft {source_name}: {reason}")]
    Draft { source_name: String, reason: String },

    #[error("parse error: {0}")]
    Parse(String),
}
