use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{LedgerService, LocationSelector};
use crate::domain::{LocationType, format_cents, parse_cents};
use crate::io::Exporter;
use crate::storage::MovementFilter;

/// Cassa - repair-shop money ledger
#[derive(Parser)]
#[command(name = "cassa")]
#[command(about = "Tracks where the shop's money sits and every movement between locations")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "cassa.db")]
    pub database: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Money location management
    #[command(subcommand)]
    Location(LocationCommands),

    /// Move money between two locations
    Transfer {
        /// Amount (e.g., "250.00" or "250")
        amount: String,

        /// Source location name
        #[arg(long)]
        from: String,

        /// Destination location name
        #[arg(long)]
        to: String,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,

        /// Date of the movement (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Record money entering a location
    Deposit {
        amount: String,

        /// Destination location name
        #[arg(long)]
        to: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        date: Option<String>,
    },

    /// Record money leaving a location
    Withdraw {
        amount: String,

        /// Source location name
        #[arg(long)]
        from: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        date: Option<String>,
    },

    /// Record a customer payment against an invoice reference
    Payment {
        amount: String,

        /// Invoice reference (idempotency key, e.g. the invoice id)
        #[arg(long)]
        reference: String,

        /// Location the money landed in; resolved from the label when the
        /// exact name doesn't match
        #[arg(long)]
        location: String,
    },

    /// Record an expense paid against an expense reference
    Expense {
        amount: String,

        /// Expense reference (idempotency key)
        #[arg(long)]
        reference: String,

        /// Location the money was paid from
        #[arg(long)]
        location: String,
    },

    /// List movements
    Movements {
        /// Filter by location name
        #[arg(long)]
        location: Option<String>,

        /// Maximum number of movements to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Void a movement with an offsetting one
    Reverse {
        /// Movement ID to reverse
        id: String,
    },

    /// Show balance for a location or all locations
    Balance {
        /// Location name (omit for all locations)
        location: Option<String>,
    },

    /// Show or recalculate a monthly summary
    Summary {
        /// Month in YYYY-MM form (defaults to the current month)
        month: Option<String>,

        /// Force recalculation even if the row exists
        #[arg(long)]
        refresh: bool,
    },

    /// Check cached balances against the movement log
    Reconcile,

    /// Export data as CSV to stdout
    Export {
        /// What to export: movements, balances or summaries
        what: String,
    },
}

#[derive(Subcommand)]
pub enum LocationCommands {
    /// Register a new location
    Add {
        /// Location name
        name: String,

        /// Location type: cash, bank_account, digital_wallet or other
        #[arg(short = 't', long, default_value = "cash")]
        location_type: String,

        /// Display name in the shop's local language
        #[arg(long)]
        localized_name: Option<String>,
    },

    /// List locations
    List {
        /// Include deactivated locations
        #[arg(long)]
        all: bool,
    },

    /// Deactivate a location
    Deactivate {
        /// Location name
        name: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Initialized ledger database at {}", self.database);
                Ok(())
            }
            command => {
                let service = LedgerService::connect(&self.database).await?;
                run_command(&service, command).await
            }
        }
    }
}

async fn run_command(service: &LedgerService, command: Commands) -> Result<()> {
    match command {
        Commands::Init => unreachable!("handled in Cli::run"),

        Commands::Location(cmd) => run_location_command(service, cmd).await,

        Commands::Transfer {
            amount,
            from,
            to,
            description,
            date,
        } => {
            let amount_cents = parse_cents(&amount)?;
            let from_location = service.get_location_by_name(&from).await?;
            let to_location = service.get_location_by_name(&to).await?;
            let date = parse_date_or_now(date.as_deref())?;

            let outcome = service
                .record_transfer(
                    from_location.id,
                    to_location.id,
                    amount_cents,
                    date,
                    description,
                    "cli",
                )
                .await?;

            println!(
                "Transferred {} from {} to {}",
                format_cents(outcome.movement.amount_cents),
                outcome.from_name,
                outcome.to_name
            );
            Ok(())
        }

        Commands::Deposit {
            amount,
            to,
            description,
            date,
        } => {
            let amount_cents = parse_cents(&amount)?;
            let location = service.get_location_by_name(&to).await?;
            let date = parse_date_or_now(date.as_deref())?;

            let movement = service
                .record_deposit(location.id, amount_cents, date, description, "cli")
                .await?;

            println!(
                "Deposited {} into {}",
                format_cents(movement.amount_cents),
                location.name
            );
            Ok(())
        }

        Commands::Withdraw {
            amount,
            from,
            description,
            date,
        } => {
            let amount_cents = parse_cents(&amount)?;
            let location = service.get_location_by_name(&from).await?;
            let date = parse_date_or_now(date.as_deref())?;

            let movement = service
                .record_withdrawal(location.id, amount_cents, date, description, "cli")
                .await?;

            println!(
                "Withdrew {} from {}",
                format_cents(movement.amount_cents),
                location.name
            );
            Ok(())
        }

        Commands::Payment {
            amount,
            reference,
            location,
        } => {
            let amount_cents = parse_cents(&amount)?;
            let location = service
                .find_active_location(&LocationSelector::Name(location))
                .await?;

            let outcome = service
                .record_payment_received(location.id, amount_cents, &reference, Utc::now(), "cli")
                .await?;

            if outcome.already_recorded {
                println!("Payment {} was already recorded, nothing changed", reference);
            } else {
                println!(
                    "Recorded payment of {} into {} (ref {})",
                    format_cents(outcome.movement.amount_cents),
                    location.name,
                    reference
                );
            }
            Ok(())
        }

        Commands::Expense {
            amount,
            reference,
            location,
        } => {
            let amount_cents = parse_cents(&amount)?;
            let location = service
                .find_active_location(&LocationSelector::Name(location))
                .await?;

            let outcome = service
                .record_expense_paid(location.id, amount_cents, &reference, Utc::now(), "cli")
                .await?;

            if outcome.already_recorded {
                println!("Expense {} was already recorded, nothing changed", reference);
            } else {
                println!(
                    "Recorded expense of {} from {} (ref {})",
                    format_cents(outcome.movement.amount_cents),
                    location.name,
                    reference
                );
            }
            Ok(())
        }

        Commands::Movements { location, limit } => {
            let location_id = match location {
                Some(name) => Some(service.get_location_by_name(&name).await?.id),
                None => None,
            };

            let filter = MovementFilter {
                location: location_id,
                limit,
                ..MovementFilter::default()
            };
            let movements = service.list_movements(&filter).await?;

            for m in &movements {
                println!(
                    "{}  {}  {:<16}  {:>12}  {}",
                    m.id,
                    m.movement_date.format("%Y-%m-%d"),
                    m.movement_type.to_string(),
                    format_cents(m.amount_cents),
                    m.description.as_deref().unwrap_or("")
                );
            }
            println!("{} movement(s)", movements.len());
            Ok(())
        }

        Commands::Reverse { id } => {
            let movement_id = Uuid::parse_str(&id).context("Invalid movement ID")?;
            let outcome = service.reverse(movement_id, "cli").await?;

            println!(
                "Reversed movement {} with {} ({})",
                outcome.original.id,
                outcome.reversal.id,
                format_cents(outcome.reversal.amount_cents)
            );
            Ok(())
        }

        Commands::Balance { location } => {
            match location {
                Some(name) => {
                    let location = service.get_location_by_name(&name).await?;
                    println!(
                        "{}: {}",
                        location.name,
                        format_cents(location.balance_cents)
                    );
                }
                None => {
                    let locations = service.list_locations(false).await?;
                    for location in &locations {
                        println!(
                            "{:<24} {:<16} {:>12}",
                            location.name,
                            location.location_type.to_string(),
                            format_cents(location.balance_cents)
                        );
                    }
                }
            }
            Ok(())
        }

        Commands::Summary { month, refresh } => {
            let summary = match month {
                Some(month_str) => {
                    let month = month_str.parse().context("Invalid month (expected YYYY-MM)")?;
                    if refresh {
                        service.calculate_for_month(month).await?
                    } else {
                        match service.get_summary(month).await? {
                            Some(existing) => existing,
                            None => service.calculate_for_month(month).await?,
                        }
                    }
                }
                None => {
                    if refresh {
                        let month = crate::domain::MonthKey::containing(Utc::now());
                        service.calculate_for_month(month).await?
                    } else {
                        service.get_current_month().await?
                    }
                }
            };

            println!("Summary for {}", summary.month);
            println!("  Revenue:       {:>12}", format_cents(summary.total_revenue_cents));
            println!("  Cost:          {:>12}", format_cents(summary.total_cost_cents));
            println!("  Expenses:      {:>12}", format_cents(summary.total_expenses_cents));
            println!("  Gross profit:  {:>12}", format_cents(summary.gross_profit_cents));
            println!("  Net profit:    {:>12}", format_cents(summary.net_profit_cents));
            println!("  Margin:        {:>11.2}%", summary.profit_margin);
            println!(
                "  {} invoice(s), {} expense(s), calculated {}",
                summary.invoice_count,
                summary.expense_count,
                summary.last_calculated.format("%Y-%m-%d %H:%M")
            );
            Ok(())
        }

        Commands::Reconcile => {
            let report = service.reconcile().await?;

            if report.is_consistent() {
                println!(
                    "All {} location(s) consistent with {} movement(s)",
                    report.entries.len(),
                    report.movement_count
                );
            } else {
                for entry in report.drifted() {
                    println!(
                        "DRIFT {}: cached {} but log says {}",
                        entry.location_name,
                        format_cents(entry.cached_cents),
                        format_cents(entry.computed_cents)
                    );
                }
                anyhow::bail!("cached balances drifted from the movement log");
            }
            Ok(())
        }

        Commands::Export { what } => {
            let exporter = Exporter::new(service);
            let stdout = std::io::stdout();
            let count = match what.as_str() {
                "movements" => exporter.export_movements_csv(stdout.lock()).await?,
                "balances" => exporter.export_balances_csv(stdout.lock()).await?,
                "summaries" => exporter.export_summaries_csv(stdout.lock()).await?,
                other => anyhow::bail!(
                    "unknown export target '{}' (expected movements, balances or summaries)",
                    other
                ),
            };
            eprintln!("Exported {} row(s)", count);
            Ok(())
        }
    }
}

async fn run_location_command(service: &LedgerService, command: LocationCommands) -> Result<()> {
    match command {
        LocationCommands::Add {
            name,
            location_type,
            localized_name,
        } => {
            let location_type = LocationType::from_str(&location_type)
                .with_context(|| format!("Unknown location type '{}'", location_type))?;

            let location = service
                .create_location(name, location_type, localized_name)
                .await?;

            println!("Created {} ({})", location.name, location.location_type);
            Ok(())
        }

        LocationCommands::List { all } => {
            let locations = service.list_locations(all).await?;
            for location in &locations {
                let status = if location.is_active { "" } else { " [inactive]" };
                println!(
                    "{:<24} {:<16} {:>12}{}",
                    location.name,
                    location.location_type.to_string(),
                    format_cents(location.balance_cents),
                    status
                );
            }
            Ok(())
        }

        LocationCommands::Deactivate { name } => {
            let location = service.deactivate_location(&name).await?;
            println!("Deactivated {}", location.name);
            Ok(())
        }
    }
}

fn parse_date_or_now(date: Option<&str>) -> Result<DateTime<Utc>> {
    match date {
        None => Ok(Utc::now()),
        Some(s) => {
            let naive = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{}' (expected YYYY-MM-DD)", s))?;
            Ok(naive
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always valid")
                .and_utc())
        }
    }
}
