use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;

use crate::application::LedgerService;
use crate::domain::{LocationId, format_cents};
use crate::storage::MovementFilter;

/// Exporter for dumping ledger data as CSV, for spreadsheets and audits.
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export the full movement log to CSV, with location names resolved.
    pub async fn export_movements_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let movements = self.service.list_movements(&MovementFilter::default()).await?;
        let names = self.location_names().await?;
        let resolve = |id: Option<LocationId>| -> String {
            id.map(|id| {
                names
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| id.to_string())
            })
            .unwrap_or_default()
        };

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "id",
            "movement_date",
            "movement_type",
            "from_location",
            "to_location",
            "amount",
            "reference_type",
            "reference_id",
            "description",
            "actor_id",
            "reverses",
        ])?;

        let mut count = 0;
        for movement in &movements {
            csv_writer.write_record([
                movement.id.to_string(),
                movement.movement_date.to_rfc3339(),
                movement.movement_type.to_string(),
                resolve(movement.from_location),
                resolve(movement.to_location),
                format_cents(movement.amount_cents),
                movement.reference_type.to_string(),
                movement.reference_id.clone().unwrap_or_default(),
                movement.description.clone().unwrap_or_default(),
                movement.actor_id.clone(),
                movement
                    .reverses
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export active locations and their cached balances to CSV.
    pub async fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let locations = self.service.list_locations(false).await?;

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(["location", "type", "balance"])?;

        let mut count = 0;
        for location in &locations {
            csv_writer.write_record([
                location.name.as_str(),
                location.location_type.as_str(),
                &format_cents(location.balance_cents),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export all monthly summaries to CSV.
    pub async fn export_summaries_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let summaries = self.service.list_summaries().await?;

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "month",
            "total_revenue",
            "total_cost",
            "total_expenses",
            "gross_profit",
            "net_profit",
            "profit_margin",
            "invoice_count",
            "expense_count",
            "last_calculated",
        ])?;

        let mut count = 0;
        for summary in &summaries {
            csv_writer.write_record([
                summary.month.to_string(),
                format_cents(summary.total_revenue_cents),
                format_cents(summary.total_cost_cents),
                format_cents(summary.total_expenses_cents),
                format_cents(summary.gross_profit_cents),
                format_cents(summary.net_profit_cents),
                format!("{:.2}", summary.profit_margin),
                summary.invoice_count.to_string(),
                summary.expense_count.to_string(),
                summary.last_calculated.to_rfc3339(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    async fn location_names(&self) -> Result<HashMap<LocationId, String>> {
        let locations = self.service.list_locations(true).await?;
        Ok(locations.into_iter().map(|l| (l.id, l.name)).collect())
    }
}
