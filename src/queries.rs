//! Spend-history queries
//!
//! Read-side reports over the accumulated receipts. Row grouping happens
//! in SQL where it is exact (counts, joins); monetary sums are computed
//! here in `Decimal` so report totals reconcile with the stored values.

use crate::storage::sqlite::{date_col, decimal_col};
use crate::storage::ReceiptStore;
use crate::Result;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tabled::Tabled;

/// Aggregated purchases of one product name.
#[derive(Debug, Tabled)]
pub struct ItemStat {
    #[tabled(rename = "Item")]
    pub name: String,
    #[tabled(rename = "Times")]
    pub purchase_count: usize,
    #[tabled(rename = "Qty")]
    pub total_quantity: Decimal,
    #[tabled(rename = "Total")]
    pub total_spent: Decimal,
    #[tabled(rename = "Avg/Unit")]
    pub avg_unit_price: Decimal,
}

/// Spending in one calendar month.
#[derive(Debug, Tabled)]
pub struct MonthlySpend {
    #[tabled(rename = "Month")]
    pub month: String,
    #[tabled(rename = "Receipts")]
    pub receipt_count: usize,
    #[tabled(rename = "Total")]
    pub total_spent: Decimal,
    #[tabled(rename = "Avg/Receipt")]
    pub avg_receipt: Decimal,
}

/// Spending at one market.
#[derive(Debug, Tabled)]
pub struct MarketSpend {
    #[tabled(rename = "Store")]
    pub store_number: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "City")]
    pub city: String,
    #[tabled(rename = "Receipts")]
    pub receipt_count: usize,
    #[tabled(rename = "Total")]
    pub total_spent: Decimal,
}

/// One receipt in the top-receipts report.
#[derive(Debug, Tabled)]
pub struct TopReceipt {
    #[tabled(rename = "Date")]
    pub purchase_date: String,
    #[tabled(rename = "Time")]
    pub purchase_time: String,
    #[tabled(rename = "Receipt")]
    pub receipt_number: String,
    #[tabled(rename = "Store")]
    pub store_name: String,
    #[tabled(rename = "Items")]
    pub item_count: usize,
    #[tabled(rename = "Total")]
    pub gross_total: Decimal,
}

/// Most frequently purchased items, by purchase count then spend.
/// Correction lines are excluded.
pub fn top_items(store: &ReceiptStore, limit: usize) -> Result<Vec<ItemStat>> {
    let mut stmt = store.conn().prepare(
        "SELECT name, quantity, total FROM receipt_items WHERE kind != 'correction'",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, decimal_col(row, 1)?, decimal_col(row, 2)?))
    })?;

    let mut grouped: BTreeMap<String, (usize, Decimal, Decimal)> = BTreeMap::new();
    for row in rows {
        let (name, quantity, total) = row?;
        let entry = grouped.entry(name).or_insert((0, Decimal::ZERO, Decimal::ZERO));
        entry.0 += 1;
        entry.1 += quantity;
        entry.2 += total;
    }

    let mut stats: Vec<ItemStat> = grouped
        .into_iter()
        .map(|(name, (purchase_count, total_quantity, total_spent))| ItemStat {
            name,
            purchase_count,
            total_quantity,
            total_spent,
            avg_unit_price: if total_quantity.is_zero() {
                Decimal::ZERO
            } else {
                (total_spent / total_quantity).round_dp(2)
            },
        })
        .collect();
    stats.sort_by(|a, b| {
        b.purchase_count
            .cmp(&a.purchase_count)
            .then(b.total_spent.cmp(&a.total_spent))
    });
    stats.truncate(limit);
    Ok(stats)
}

/// Total spending grouped by calendar month, newest first.
pub fn spending_by_month(store: &ReceiptStore) -> Result<Vec<MonthlySpend>> {
    let mut stmt = store
        .conn()
        .prepare("SELECT purchase_date, gross_total FROM receipts")?;
    let rows = stmt.query_map([], |row| Ok((date_col(row, 0)?, decimal_col(row, 1)?)))?;

    let mut grouped: BTreeMap<String, (usize, Decimal)> = BTreeMap::new();
    for row in rows {
        let (date, gross) = row?;
        let month = date.format("%Y-%m").to_string();
        let entry = grouped.entry(month).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 += gross;
    }

    Ok(grouped
        .into_iter()
        .rev()
        .map(|(month, (receipt_count, total_spent))| MonthlySpend {
            month,
            receipt_count,
            total_spent,
            avg_receipt: (total_spent / Decimal::from(receipt_count)).round_dp(2),
        })
        .collect())
}

/// Total spending grouped by market, biggest first. Store name and city
/// come from the canonical market record, falling back to the receipt
/// snapshot when the record has no value.
pub fn spending_by_market(store: &ReceiptStore) -> Result<Vec<MarketSpend>> {
    let mut stmt = store.conn().prepare(
        "SELECT r.store_number,
                COALESCE(m.name, r.store_name, '-'),
                COALESCE(m.city, r.city, '-'),
                r.gross_total
         FROM receipts r
         LEFT JOIN markets m ON m.store_number = r.store_number",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            decimal_col(row, 3)?,
        ))
    })?;

    let mut grouped: BTreeMap<String, MarketSpend> = BTreeMap::new();
    for row in rows {
        let (store_number, name, city, gross) = row?;
        let entry = grouped.entry(store_number.clone()).or_insert(MarketSpend {
            store_number,
            name,
            city,
            receipt_count: 0,
            total_spent: Decimal::ZERO,
        });
        entry.receipt_count += 1;
        entry.total_spent += gross;
    }

    let mut spends: Vec<MarketSpend> = grouped.into_values().collect();
    spends.sort_by(|a, b| b.total_spent.cmp(&a.total_spent));
    Ok(spends)
}

/// Most expensive receipts with their item counts.
pub fn top_receipts(store: &ReceiptStore, limit: usize) -> Result<Vec<TopReceipt>> {
    let mut stmt = store.conn().prepare(
        "SELECT r.purchase_date, r.purchase_time, r.receipt_number,
                COALESCE(r.store_name, '-'), r.gross_total, COUNT(i.id)
         FROM receipts r
         LEFT JOIN receipt_items i ON i.receipt_id = r.id
         GROUP BY r.id
         ORDER BY CAST(r.gross_total AS REAL) DESC
         LIMIT ?1",
    )?;
    let receipts = stmt
        .query_map([limit as i64], |row| {
            Ok(TopReceipt {
                purchase_date: row.get(0)?,
                purchase_time: row.get(1)?,
                receipt_number: row.get(2)?,
                store_name: row.get(3)?,
                gross_total: decimal_col(row, 4)?,
                item_count: row.get::<_, i64>(5)? as usize,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{DraftItem, DraftReceipt};
    use crate::ingest::{DuplicatePolicy, IngestCoordinator};

    fn draft(receipt_number: &str, date: &str, items: &[(&str, &str)]) -> DraftReceipt {
        let gross: Decimal = items
            .iter()
            .map(|(_, total)| crate::normalize::parse_decimal(total).unwrap())
            .sum();
        DraftReceipt {
            store_number: Some("4711".into()),
            store_name: Some("Markt Nord".into()),
            city: Some("Bremen".into()),
            register_number: Some("2".into()),
            receipt_number: Some(receipt_number.into()),
            purchase_date: Some(date.into()),
            purchase_time: Some("12:00".into()),
            gross_total: Some(gross.to_string()),
            items: items
                .iter()
                .map(|(name, total)| DraftItem {
                    name: Some((*name).into()),
                    total: Some((*total).into()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn populated_store() -> ReceiptStore {
        let mut coordinator = IngestCoordinator::new(
            ReceiptStore::open_in_memory().unwrap(),
            DuplicatePolicy::Reject,
        );
        let report = coordinator.ingest_batch(&[
            draft("1", "14.03.2025", &[("Milch", "1,19"), ("Brot", "2,49")]),
            draft("2", "21.03.2025", &[("Milch", "1,19")]),
            draft("3", "02.04.2025", &[("Kaffee", "5,99"), ("Milch", "1,29")]),
        ]);
        assert_eq!(report.inserted(), 3);
        coordinator.into_store()
    }

    #[test]
    fn test_top_items_aggregates_exactly() {
        let store = populated_store();
        let stats = top_items(&store, 10).unwrap();

        assert_eq!(stats[0].name, "Milch");
        assert_eq!(stats[0].purchase_count, 3);
        assert_eq!(stats[0].total_spent, Decimal::new(367, 2));
        assert_eq!(stats[0].total_quantity, Decimal::from(3));
    }

    #[test]
    fn test_top_items_respects_limit() {
        let store = populated_store();
        assert_eq!(top_items(&store, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_spending_by_month_newest_first() {
        let store = populated_store();
        let months = spending_by_month(&store).unwrap();

        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, "2025-04");
        assert_eq!(months[0].total_spent, Decimal::new(728, 2));
        assert_eq!(months[1].month, "2025-03");
        assert_eq!(months[1].receipt_count, 2);
        assert_eq!(months[1].total_spent, Decimal::new(487, 2));
    }

    #[test]
    fn test_spending_by_market_uses_canonical_name() {
        let store = populated_store();
        let markets = spending_by_market(&store).unwrap();

        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].store_number, "4711");
        assert_eq!(markets[0].name, "Markt Nord");
        assert_eq!(markets[0].receipt_count, 3);
    }

    #[test]
    fn test_top_receipts_ordered_by_total() {
        let store = populated_store();
        let top = top_receipts(&store, 2).unwrap();

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].receipt_number, "3");
        assert_eq!(top[0].gross_total, Decimal::new(728, 2));
        assert_eq!(top[0].item_count, 2);
        assert_eq!(top[1].receipt_number, "1");
    }
}
