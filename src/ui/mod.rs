pub mod output;
pub mod table;
pub mod theme;

pub use output::{dim, error, header, section, success, warn};
pub use table::{metrics_table, render};
pub use theme::{theme, Theme};
