use tabled::{settings::Style, Table, Tabled};

/// Render typed report rows as a rounded table.
pub fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Render label/value pairs (store stats, ingest summaries).
pub fn metrics_table(rows: &[(&str, String)]) -> String {
    let rows: Vec<MetricRow> = rows
        .iter()
        .map(|(metric, value)| MetricRow {
            metric: metric.to_string(),
            value: value.clone(),
        })
        .collect();
    render(&rows)
}
