use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Cents, FinancialSummary, LocationId, LocationType, MoneyLocation, MoneyMovement, MonthKey,
    MovementId, MovementType, ReferenceType, balance_deltas,
};

use super::MIGRATION_001_INITIAL;

const MOVEMENT_COLUMNS: &str = "id, from_location_id, to_location_id, amount_cents, movement_date, recorded_at, movement_type, reference_type, reference_id, description, actor_id, reverses";

const LOCATION_COLUMNS: &str =
    "id, name, localized_name, location_type, balance_cents, is_active, created_at";

/// Result of appending a movement under the idempotency guard.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// The movement was written and balances updated
    Recorded(MoneyMovement),
    /// An earlier movement already carries this reference; nothing changed
    Duplicate(MoneyMovement),
}

/// Filter for querying the movement log.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub location: Option<LocationId>,
    pub movement_type: Option<MovementType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Repository for the ledger tables. All writes to cached balances happen
/// inside `append_movement`'s transaction; nothing else touches them.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database. The pool is capped at one connection so
    /// recorder transactions serialize instead of tripping over SQLite's
    /// single-writer lock under concurrent calls.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Location operations
    // ========================

    /// Save a new location.
    pub async fn save_location(&self, location: &MoneyLocation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO locations (id, name, localized_name, location_type, balance_cents, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(location.id.to_string())
        .bind(&location.name)
        .bind(&location.localized_name)
        .bind(location.location_type.as_str())
        .bind(location.balance_cents)
        .bind(location.is_active)
        .bind(location.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save location")?;
        Ok(())
    }

    /// Get a location by ID.
    pub async fn get_location(&self, id: LocationId) -> Result<Option<MoneyLocation>> {
        let row = sqlx::query(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch location")?;

        row.as_ref().map(Self::row_to_location).transpose()
    }

    /// Get a location by exact name.
    pub async fn get_location_by_name(&self, name: &str) -> Result<Option<MoneyLocation>> {
        let row = sqlx::query(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch location by name")?;

        row.as_ref().map(Self::row_to_location).transpose()
    }

    /// Find an active location whose name contains the given pattern
    /// (case-insensitive). Oldest match wins so the mapping is stable.
    pub async fn find_active_by_name_pattern(
        &self,
        pattern: &str,
    ) -> Result<Option<MoneyLocation>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {LOCATION_COLUMNS} FROM locations
            WHERE is_active = 1 AND name LIKE ? COLLATE NOCASE
            ORDER BY created_at, name
            LIMIT 1
            "#
        ))
        .bind(format!("%{}%", pattern))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to search locations by name")?;

        row.as_ref().map(Self::row_to_location).transpose()
    }

    /// Find the oldest active location of the given type.
    pub async fn find_active_by_type(
        &self,
        location_type: LocationType,
    ) -> Result<Option<MoneyLocation>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {LOCATION_COLUMNS} FROM locations
            WHERE is_active = 1 AND location_type = ?
            ORDER BY created_at, name
            LIMIT 1
            "#
        ))
        .bind(location_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to search locations by type")?;

        row.as_ref().map(Self::row_to_location).transpose()
    }

    /// List locations (optionally including deactivated ones).
    pub async fn list_locations(&self, include_inactive: bool) -> Result<Vec<MoneyLocation>> {
        let query = if include_inactive {
            format!("SELECT {LOCATION_COLUMNS} FROM locations ORDER BY name")
        } else {
            format!(
                "SELECT {LOCATION_COLUMNS} FROM locations WHERE is_active = 1 ORDER BY name"
            )
        };

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list locations")?;

        rows.iter().map(Self::row_to_location).collect()
    }

    /// Deactivate a location (locations are never deleted).
    pub async fn deactivate_location(&self, id: LocationId) -> Result<()> {
        sqlx::query("UPDATE locations SET is_active = 0 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to deactivate location")?;
        Ok(())
    }

    fn row_to_location(row: &SqliteRow) -> Result<MoneyLocation> {
        let id_str: String = row.get("id");
        let type_str: String = row.get("location_type");
        let created_at_str: String = row.get("created_at");

        Ok(MoneyLocation {
            id: Uuid::parse_str(&id_str).context("Invalid location ID")?,
            name: row.get("name"),
            localized_name: row.get("localized_name"),
            location_type: LocationType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid location type: {}", type_str))?,
            balance_cents: row.get("balance_cents"),
            is_active: row.get::<i32, _>("is_active") != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    // ========================
    // Movement log
    // ========================

    /// Append a movement and apply its balance deltas, all inside one
    /// transaction: the idempotency lookup, the insert and the cached-balance
    /// updates either all land or none do.
    pub async fn append_movement(&self, movement: &MoneyMovement) -> Result<AppendOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin recording transaction")?;

        if let Some((ref_type, ref_id, movement_type)) = movement.idempotency_key() {
            let existing = sqlx::query(&format!(
                r#"
                SELECT {MOVEMENT_COLUMNS} FROM movements
                WHERE reference_type = ? AND reference_id = ? AND movement_type = ?
                "#
            ))
            .bind(ref_type.as_str())
            .bind(ref_id)
            .bind(movement_type.as_str())
            .fetch_optional(&mut *tx)
            .await
            .context("Failed idempotency lookup")?;

            if let Some(row) = existing {
                // Dropping the transaction rolls it back; nothing was written.
                return Ok(AppendOutcome::Duplicate(Self::row_to_movement(&row)?));
            }
        }

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO movements ({MOVEMENT_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        ))
        .bind(movement.id.to_string())
        .bind(movement.from_location.map(|id| id.to_string()))
        .bind(movement.to_location.map(|id| id.to_string()))
        .bind(movement.amount_cents)
        .bind(movement.movement_date.to_rfc3339())
        .bind(movement.recorded_at.to_rfc3339())
        .bind(movement.movement_type.as_str())
        .bind(movement.reference_type.as_str())
        .bind(&movement.reference_id)
        .bind(&movement.description)
        .bind(&movement.actor_id)
        .bind(movement.reverses.map(|id| id.to_string()))
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            // A concurrent retry of the same reference can slip past the
            // lookup; the unique index turns that into a conflict resolved as
            // a duplicate rather than a double credit.
            let unique_violation = err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation());
            if unique_violation {
                if let Some((ref_type, ref_id, movement_type)) = movement.idempotency_key() {
                    drop(tx);
                    if let Some(existing) = self
                        .find_movement_by_reference(ref_type, ref_id, movement_type)
                        .await?
                    {
                        return Ok(AppendOutcome::Duplicate(existing));
                    }
                }
            }
            return Err(anyhow::Error::new(err).context("Failed to append movement"));
        }

        for (location_id, delta) in balance_deltas(movement) {
            let result = sqlx::query(
                "UPDATE locations SET balance_cents = balance_cents + ? WHERE id = ?",
            )
            .bind(delta)
            .bind(location_id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to update cached balance")?;

            if result.rows_affected() != 1 {
                bail!("Movement references unknown location {}", location_id);
            }
        }

        tx.commit()
            .await
            .context("Failed to commit recording transaction")?;

        Ok(AppendOutcome::Recorded(movement.clone()))
    }

    /// Get a movement by ID.
    pub async fn get_movement(&self, id: MovementId) -> Result<Option<MoneyMovement>> {
        let row = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch movement")?;

        row.as_ref().map(Self::row_to_movement).transpose()
    }

    /// Idempotency guard lookup outside a recording transaction.
    pub async fn find_movement_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: &str,
        movement_type: MovementType,
    ) -> Result<Option<MoneyMovement>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS} FROM movements
            WHERE reference_type = ? AND reference_id = ? AND movement_type = ?
            "#
        ))
        .bind(reference_type.as_str())
        .bind(reference_id)
        .bind(movement_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find movement by reference")?;

        row.as_ref().map(Self::row_to_movement).transpose()
    }

    /// Find the movement that reverses the given one, if any.
    pub async fn find_reversal_of(&self, id: MovementId) -> Result<Option<MoneyMovement>> {
        let row = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE reverses = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find reversal")?;

        row.as_ref().map(Self::row_to_movement).transpose()
    }

    /// List movements with optional filters, in recording order.
    pub async fn list_movements(&self, filter: &MovementFilter) -> Result<Vec<MoneyMovement>> {
        let mut query = format!("SELECT {MOVEMENT_COLUMNS} FROM movements WHERE 1=1");

        let location_str = filter.location.map(|id| id.to_string());
        let from_date_str = filter.from_date.map(|dt| dt.to_rfc3339());
        let to_date_str = filter.to_date.map(|dt| dt.to_rfc3339());

        if location_str.is_some() {
            query.push_str(" AND (from_location_id = ? OR to_location_id = ?)");
        }
        if filter.movement_type.is_some() {
            query.push_str(" AND movement_type = ?");
        }
        if from_date_str.is_some() {
            query.push_str(" AND movement_date >= ?");
        }
        if to_date_str.is_some() {
            query.push_str(" AND movement_date <= ?");
        }

        query.push_str(" ORDER BY recorded_at, id");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        let mut sql_query = sqlx::query(&query);
        if let Some(ref loc) = location_str {
            sql_query = sql_query.bind(loc).bind(loc);
        }
        if let Some(mt) = filter.movement_type {
            sql_query = sql_query.bind(mt.as_str());
        }
        if let Some(ref fd) = from_date_str {
            sql_query = sql_query.bind(fd);
        }
        if let Some(ref td) = to_date_str {
            sql_query = sql_query.bind(td);
        }

        let rows = sql_query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list movements")?;

        rows.iter().map(Self::row_to_movement).collect()
    }

    /// Count all movements in the log.
    pub async fn count_movements(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM movements")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count movements")?;
        Ok(row.get("count"))
    }

    /// Recompute one location's balance from the full movement log.
    pub async fn compute_balance_from_log(&self, location_id: LocationId) -> Result<Cents> {
        let id_str = location_id.to_string();

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN to_location_id = ? THEN amount_cents ELSE 0 END), 0) -
                COALESCE(SUM(CASE WHEN from_location_id = ? THEN amount_cents ELSE 0 END), 0) as balance
            FROM movements
            WHERE from_location_id = ? OR to_location_id = ?
            "#,
        )
        .bind(&id_str)
        .bind(&id_str)
        .bind(&id_str)
        .bind(&id_str)
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute balance from log")?;

        Ok(row.get("balance"))
    }

    /// Recompute all balances from the log in one query. Locations with no
    /// movements are absent from the map.
    pub async fn compute_all_balances_from_log(&self) -> Result<HashMap<LocationId, Cents>> {
        let rows = sqlx::query(
            r#"
            SELECT location_id, SUM(amount) as balance
            FROM (
                SELECT to_location_id as location_id, amount_cents as amount
                FROM movements WHERE to_location_id IS NOT NULL
                UNION ALL
                SELECT from_location_id as location_id, -amount_cents as amount
                FROM movements WHERE from_location_id IS NOT NULL
            )
            GROUP BY location_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to compute balances from log")?;

        let mut balances = HashMap::new();
        for row in rows {
            let id_str: String = row.get("location_id");
            let balance: Cents = row.get("balance");
            let id = Uuid::parse_str(&id_str).context("Invalid location ID")?;
            balances.insert(id, balance);
        }
        Ok(balances)
    }

    fn row_to_movement(row: &SqliteRow) -> Result<MoneyMovement> {
        let id_str: String = row.get("id");
        let from_str: Option<String> = row.get("from_location_id");
        let to_str: Option<String> = row.get("to_location_id");
        let movement_date_str: String = row.get("movement_date");
        let recorded_at_str: String = row.get("recorded_at");
        let movement_type_str: String = row.get("movement_type");
        let reference_type_str: String = row.get("reference_type");
        let reverses_str: Option<String> = row.get("reverses");

        Ok(MoneyMovement {
            id: Uuid::parse_str(&id_str).context("Invalid movement ID")?,
            from_location: from_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid from_location ID")?,
            to_location: to_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid to_location ID")?,
            amount_cents: row.get("amount_cents"),
            movement_date: DateTime::parse_from_rfc3339(&movement_date_str)
                .context("Invalid movement_date")?
                .with_timezone(&Utc),
            recorded_at: DateTime::parse_from_rfc3339(&recorded_at_str)
                .context("Invalid recorded_at")?
                .with_timezone(&Utc),
            movement_type: MovementType::from_str(&movement_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid movement type: {}", movement_type_str))?,
            reference_type: ReferenceType::from_str(&reference_type_str).ok_or_else(|| {
                anyhow::anyhow!("Invalid reference type: {}", reference_type_str)
            })?,
            reference_id: row.get("reference_id"),
            description: row.get("description"),
            actor_id: row.get("actor_id"),
            reverses: reverses_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid reverses ID")?,
        })
    }

    // ========================
    // Aggregation sources (host-owned tables)
    // ========================

    /// Sum paid invoices dated in the range: (total revenue, invoice count).
    pub async fn sum_paid_invoices(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(Cents, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total_cents), 0) as revenue, COUNT(*) as count
            FROM invoices
            WHERE payment_status = 'paid' AND date >= ? AND date < ?
            "#,
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to read invoices")?;

        Ok((row.get("revenue"), row.get("count")))
    }

    /// Sum line-item costs (cost price x quantity) of paid invoices in the range.
    pub async fn sum_invoice_item_costs(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(ii.cost_price_cents * ii.quantity), 0) as cost
            FROM invoice_items ii
            JOIN invoices i ON i.id = ii.invoice_id
            WHERE i.payment_status = 'paid' AND i.date >= ? AND i.date < ?
            "#,
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to read invoice items")?;

        Ok(row.get("cost"))
    }

    /// Sum approved/paid expenses dated in the range: (total, expense count).
    pub async fn sum_expenses(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(Cents, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0) as total, COUNT(*) as count
            FROM expenses
            WHERE status IN ('approved', 'paid') AND date >= ? AND date < ?
            "#,
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to read expenses")?;

        Ok((row.get("total"), row.get("count")))
    }

    // ========================
    // Summary rollup
    // ========================

    /// Upsert the summary row for its month.
    pub async fn upsert_summary(&self, summary: &FinancialSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO financial_summaries (
                month_year, total_revenue_cents, total_cost_cents, total_expenses_cents,
                gross_profit_cents, net_profit_cents, profit_margin,
                invoice_count, expense_count, last_calculated
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(month_year) DO UPDATE SET
                total_revenue_cents = excluded.total_revenue_cents,
                total_cost_cents = excluded.total_cost_cents,
                total_expenses_cents = excluded.total_expenses_cents,
                gross_profit_cents = excluded.gross_profit_cents,
                net_profit_cents = excluded.net_profit_cents,
                profit_margin = excluded.profit_margin,
                invoice_count = excluded.invoice_count,
                expense_count = excluded.expense_count,
                last_calculated = excluded.last_calculated
            "#,
        )
        .bind(summary.month.to_string())
        .bind(summary.total_revenue_cents)
        .bind(summary.total_cost_cents)
        .bind(summary.total_expenses_cents)
        .bind(summary.gross_profit_cents)
        .bind(summary.net_profit_cents)
        .bind(summary.profit_margin)
        .bind(summary.invoice_count)
        .bind(summary.expense_count)
        .bind(summary.last_calculated.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to upsert summary")?;
        Ok(())
    }

    /// Get the summary row for a month, if it has been calculated.
    pub async fn get_summary(&self, month: MonthKey) -> Result<Option<FinancialSummary>> {
        let row = sqlx::query(
            r#"
            SELECT month_year, total_revenue_cents, total_cost_cents, total_expenses_cents,
                   gross_profit_cents, net_profit_cents, profit_margin,
                   invoice_count, expense_count, last_calculated
            FROM financial_summaries
            WHERE month_year = ?
            "#,
        )
        .bind(month.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch summary")?;

        row.as_ref().map(Self::row_to_summary).transpose()
    }

    /// List all summary rows, oldest month first.
    pub async fn list_summaries(&self) -> Result<Vec<FinancialSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT month_year, total_revenue_cents, total_cost_cents, total_expenses_cents,
                   gross_profit_cents, net_profit_cents, profit_margin,
                   invoice_count, expense_count, last_calculated
            FROM financial_summaries
            ORDER BY month_year
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list summaries")?;

        rows.iter().map(Self::row_to_summary).collect()
    }

    fn row_to_summary(row: &SqliteRow) -> Result<FinancialSummary> {
        let month_str: String = row.get("month_year");
        let last_calculated_str: String = row.get("last_calculated");

        Ok(FinancialSummary {
            month: month_str.parse().context("Invalid month key")?,
            total_revenue_cents: row.get("total_revenue_cents"),
            total_cost_cents: row.get("total_cost_cents"),
            total_expenses_cents: row.get("total_expenses_cents"),
            gross_profit_cents: row.get("gross_profit_cents"),
            net_profit_cents: row.get("net_profit_cents"),
            profit_margin: row.get("profit_margin"),
            invoice_count: row.get("invoice_count"),
            expense_count: row.get("expense_count"),
            last_calculated: DateTime::parse_from_rfc3339(&last_calculated_str)
                .context("Invalid last_calculated timestamp")?
                .with_timezone(&Utc),
        })
    }
}
