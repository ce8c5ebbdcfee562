// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use cassa::application::LedgerService;
use cassa::domain::{LocationType, MoneyLocation};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(db_path(&temp_dir).to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

pub fn db_path(temp_dir: &TempDir) -> std::path::PathBuf {
    temp_dir.path().join("test.db")
}

/// Raw connection to the same database, for seeding host-owned tables and
/// simulating writes that bypass the recorder.
pub async fn raw_pool(temp_dir: &TempDir) -> Result<SqlitePool> {
    let path: &Path = &db_path(temp_dir);
    let pool = SqlitePool::connect(&format!("sqlite:{}", path.display())).await?;
    Ok(pool)
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Test fixture: the standard repair-shop location set
pub struct StandardLocations {
    pub register: MoneyLocation,
    pub bank: MoneyLocation,
    pub wallet: MoneyLocation,
}

impl StandardLocations {
    /// Create the usual trio: Cash Register, Bank Account, Wallet
    pub async fn create(service: &LedgerService) -> Result<Self> {
        let register = service
            .create_location("Cash Register".into(), LocationType::Cash, None)
            .await?;
        let bank = service
            .create_location("Bank Account".into(), LocationType::BankAccount, None)
            .await?;
        let wallet = service
            .create_location("Wallet".into(), LocationType::DigitalWallet, None)
            .await?;
        Ok(Self {
            register,
            bank,
            wallet,
        })
    }

    /// Fund the register with an opening deposit
    pub async fn fund_register(&self, service: &LedgerService, amount_cents: i64) -> Result<()> {
        service
            .record_deposit(self.register.id, amount_cents, Utc::now(), None, "test")
            .await?;
        Ok(())
    }
}

/// Create the host-owned invoice/expense tables the aggregator reads.
pub async fn create_source_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            total_cents INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoice_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id TEXT NOT NULL REFERENCES invoices(id),
            cost_price_cents INTEGER NOT NULL,
            quantity INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            amount_cents INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert an invoice with line items. `date` is YYYY-MM-DD.
pub async fn insert_invoice(
    pool: &SqlitePool,
    id: &str,
    date: &str,
    payment_status: &str,
    total_cents: i64,
    items: &[(i64, i64)], // (cost_price_cents, quantity)
) -> Result<()> {
    sqlx::query("INSERT INTO invoices (id, date, payment_status, total_cents) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(parse_date(date).to_rfc3339())
        .bind(payment_status)
        .bind(total_cents)
        .execute(pool)
        .await?;

    for (cost_price_cents, quantity) in items {
        sqlx::query(
            "INSERT INTO invoice_items (invoice_id, cost_price_cents, quantity) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(cost_price_cents)
        .bind(quantity)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Insert an expense. `date` is YYYY-MM-DD.
pub async fn insert_expense(
    pool: &SqlitePool,
    id: &str,
    date: &str,
    status: &str,
    amount_cents: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO expenses (id, date, status, amount_cents) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(parse_date(date).to_rfc3339())
        .bind(status)
        .bind(amount_cents)
        .execute(pool)
        .await?;
    Ok(())
}
