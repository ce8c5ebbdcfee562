use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{
    Cents, FinancialSummary, LocationId, LocationType, MoneyLocation, MoneyMovement, MonthKey,
    MonthTotals, MovementId, MovementType, ReconciliationReport, ReferenceType,
    build_reconciliation_report,
};
use crate::storage::{AppendOutcome, MovementFilter, Repository};

use super::LedgerError;

/// Application service for the ledger: the location registry, the movement
/// recorder with its idempotency guard, the event hooks the invoice/expense
/// lifecycles call, and the monthly summary aggregator. This is the only
/// interface that mutates balances.
pub struct LedgerService {
    repo: Repository,
}

/// Selector for resolving a location without knowing its id.
#[derive(Debug, Clone)]
pub enum LocationSelector {
    /// Case-insensitive name fragment ("cash", "InstaPay")
    Name(String),
    Type(LocationType),
}

/// Result of recording a guarded (payment/expense) movement.
#[derive(Debug, Clone)]
pub struct MovementOutcome {
    pub movement: MoneyMovement,
    /// True when a retried event resolved to the existing movement and
    /// nothing was written
    pub already_recorded: bool,
}

/// Result of recording a transfer.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub movement: MoneyMovement,
    pub from_name: String,
    pub to_name: String,
}

/// Result of reversing a movement.
#[derive(Debug, Clone)]
pub struct ReversalOutcome {
    pub reversal: MoneyMovement,
    pub original: MoneyMovement,
}

/// Event raised by the invoicing side when an invoice transitions to paid.
#[derive(Debug, Clone)]
pub struct InvoicePaid {
    pub invoice_id: String,
    pub amount_cents: Cents,
    /// Payment-method label as the invoice carries it ("Cash", "InstaPay"...)
    pub payment_method: String,
    pub paid_at: DateTime<Utc>,
    pub actor_id: String,
}

/// Event raised by the expense side when an expense is paid out.
#[derive(Debug, Clone)]
pub struct ExpensePaid {
    pub expense_id: String,
    pub amount_cents: Cents,
    pub payment_method: String,
    pub paid_at: DateTime<Utc>,
    pub actor_id: String,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Location registry
    // ========================

    /// Register a new money location.
    pub async fn create_location(
        &self,
        name: String,
        location_type: LocationType,
        localized_name: Option<String>,
    ) -> Result<MoneyLocation, LedgerError> {
        if self.repo.get_location_by_name(&name).await?.is_some() {
            return Err(LedgerError::LocationAlreadyExists(name));
        }

        let mut location = MoneyLocation::new(name, location_type);
        if let Some(localized) = localized_name {
            location = location.with_localized_name(localized);
        }

        self.repo.save_location(&location).await?;
        info!(location = %location.name, kind = %location.location_type, "location created");
        Ok(location)
    }

    /// Get a location by id.
    pub async fn get_location(&self, id: LocationId) -> Result<MoneyLocation, LedgerError> {
        self.repo
            .get_location(id)
            .await?
            .ok_or_else(|| LedgerError::LocationNotFound(id.to_string()))
    }

    /// Get a location by exact name.
    pub async fn get_location_by_name(&self, name: &str) -> Result<MoneyLocation, LedgerError> {
        self.repo
            .get_location_by_name(name)
            .await?
            .ok_or_else(|| LedgerError::LocationNotFound(name.to_string()))
    }

    /// List locations.
    pub async fn list_locations(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<MoneyLocation>, LedgerError> {
        Ok(self.repo.list_locations(include_inactive).await?)
    }

    /// Deactivate a location. Locations are never deleted; an inactive one
    /// keeps its history and balance but rejects new movements.
    pub async fn deactivate_location(&self, name: &str) -> Result<MoneyLocation, LedgerError> {
        let location = self.get_location_by_name(name).await?;
        self.repo.deactivate_location(location.id).await?;
        info!(location = %location.name, "location deactivated");
        Ok(location)
    }

    /// Cached balance of a location.
    pub async fn get_balance(&self, id: LocationId) -> Result<Cents, LedgerError> {
        Ok(self.get_location(id).await?.balance_cents)
    }

    /// Resolve an active location by name fragment or type.
    pub async fn find_active_location(
        &self,
        selector: &LocationSelector,
    ) -> Result<MoneyLocation, LedgerError> {
        let found = match selector {
            LocationSelector::Name(pattern) => {
                self.repo.find_active_by_name_pattern(pattern).await?
            }
            LocationSelector::Type(location_type) => {
                self.repo.find_active_by_type(*location_type).await?
            }
        };
        found.ok_or_else(|| match selector {
            LocationSelector::Name(pattern) => LedgerError::LocationNotFound(pattern.clone()),
            LocationSelector::Type(t) => LedgerError::LocationNotFound(t.to_string()),
        })
    }

    /// Fallback for unrecognized payment methods: create a zero-balance
    /// location named after the label, with the type inferred from it.
    pub async fn get_or_create_default(&self, label: &str) -> Result<MoneyLocation, LedgerError> {
        if let Some(existing) = self.repo.get_location_by_name(label).await? {
            if existing.is_active {
                return Ok(existing);
            }
            return Err(LedgerError::LocationInactive(existing.name));
        }

        let location = MoneyLocation::default_for_label(label);
        self.repo.save_location(&location).await?;
        warn!(
            label,
            location = %location.name,
            kind = %location.location_type,
            "no location matched payment method, created default"
        );
        Ok(location)
    }

    /// Map a payment-method label to the location the money landed in:
    /// name match first, then type match, then the created default.
    pub async fn resolve_payment_location(
        &self,
        label: &str,
    ) -> Result<MoneyLocation, LedgerError> {
        if let Some(location) = self.repo.find_active_by_name_pattern(label).await? {
            return Ok(location);
        }
        let inferred = LocationType::infer_from_label(label);
        if let Some(location) = self.repo.find_active_by_type(inferred).await? {
            return Ok(location);
        }
        self.get_or_create_default(label).await
    }

    // ========================
    // Movement recorder
    // ========================

    /// Record a manual transfer between two locations. Either both balances
    /// move or neither does.
    pub async fn record_transfer(
        &self,
        from: LocationId,
        to: LocationId,
        amount_cents: Cents,
        movement_date: DateTime<Utc>,
        description: Option<String>,
        actor_id: &str,
    ) -> Result<TransferOutcome, LedgerError> {
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(amount_cents));
        }
        if from == to {
            return Err(LedgerError::TransferFailed(anyhow::anyhow!(
                "source and destination are the same location"
            )));
        }

        let from_location = self.require_active(from).await?;
        let to_location = self.require_active(to).await?;

        let mut movement =
            MoneyMovement::transfer(from, to, amount_cents, movement_date, actor_id);
        if let Some(desc) = description {
            movement = movement.with_description(desc);
        }

        let movement = match self.repo.append_movement(&movement).await {
            Ok(AppendOutcome::Recorded(m)) | Ok(AppendOutcome::Duplicate(m)) => m,
            Err(err) => return Err(LedgerError::TransferFailed(err)),
        };

        info!(
            movement = %movement.id,
            from = %from_location.name,
            to = %to_location.name,
            amount_cents,
            "transfer recorded"
        );

        Ok(TransferOutcome {
            movement,
            from_name: from_location.name,
            to_name: to_location.name,
        })
    }

    /// Record money entering a location from outside the ledger.
    pub async fn record_deposit(
        &self,
        to: LocationId,
        amount_cents: Cents,
        movement_date: DateTime<Utc>,
        description: Option<String>,
        actor_id: &str,
    ) -> Result<MoneyMovement, LedgerError> {
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(amount_cents));
        }
        let location = self.require_active(to).await?;

        let mut movement = MoneyMovement::deposit(to, amount_cents, movement_date, actor_id);
        if let Some(desc) = description {
            movement = movement.with_description(desc);
        }

        let movement = self.append_unguarded(movement).await?;
        info!(movement = %movement.id, location = %location.name, amount_cents, "deposit recorded");
        Ok(movement)
    }

    /// Record money leaving a location to outside the ledger.
    pub async fn record_withdrawal(
        &self,
        from: LocationId,
        amount_cents: Cents,
        movement_date: DateTime<Utc>,
        description: Option<String>,
        actor_id: &str,
    ) -> Result<MoneyMovement, LedgerError> {
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(amount_cents));
        }
        let location = self.require_active(from).await?;

        let mut movement = MoneyMovement::withdrawal(from, amount_cents, movement_date, actor_id);
        if let Some(desc) = description {
            movement = movement.with_description(desc);
        }

        let movement = self.append_unguarded(movement).await?;
        info!(movement = %movement.id, location = %location.name, amount_cents, "withdrawal recorded");
        Ok(movement)
    }

    /// Record a customer payment credited to a location. Safe to retry: a
    /// movement already keyed to this invoice reference makes the call a
    /// no-op returning the existing record.
    pub async fn record_payment_received(
        &self,
        location: LocationId,
        amount_cents: Cents,
        invoice_reference: &str,
        paid_at: DateTime<Utc>,
        actor_id: &str,
    ) -> Result<MovementOutcome, LedgerError> {
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(amount_cents));
        }

        // Guard first: a retried event must stay a no-op even if the
        // location has been deactivated since the original recording.
        if let Some(existing) = self
            .repo
            .find_movement_by_reference(
                ReferenceType::Invoice,
                invoice_reference,
                MovementType::PaymentReceived,
            )
            .await?
        {
            info!(
                movement = %existing.id,
                reference = invoice_reference,
                "payment already recorded, skipping"
            );
            return Ok(MovementOutcome {
                movement: existing,
                already_recorded: true,
            });
        }

        let destination = self.require_active(location).await?;

        let movement = MoneyMovement::payment_received(
            location,
            amount_cents,
            invoice_reference,
            paid_at,
            actor_id,
        );

        match self.repo.append_movement(&movement).await? {
            AppendOutcome::Recorded(movement) => {
                info!(
                    movement = %movement.id,
                    location = %destination.name,
                    reference = invoice_reference,
                    amount_cents,
                    "payment recorded"
                );
                Ok(MovementOutcome {
                    movement,
                    already_recorded: false,
                })
            }
            AppendOutcome::Duplicate(existing) => {
                info!(
                    movement = %existing.id,
                    reference = invoice_reference,
                    "payment already recorded, skipping"
                );
                Ok(MovementOutcome {
                    movement: existing,
                    already_recorded: true,
                })
            }
        }
    }

    /// Record an expense paid out of a location. Same retry guarantee as
    /// `record_payment_received`, keyed on the expense reference.
    pub async fn record_expense_paid(
        &self,
        location: LocationId,
        amount_cents: Cents,
        expense_reference: &str,
        paid_at: DateTime<Utc>,
        actor_id: &str,
    ) -> Result<MovementOutcome, LedgerError> {
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(amount_cents));
        }

        if let Some(existing) = self
            .repo
            .find_movement_by_reference(
                ReferenceType::Expense,
                expense_reference,
                MovementType::ExpensePaid,
            )
            .await?
        {
            info!(
                movement = %existing.id,
                reference = expense_reference,
                "expense already recorded, skipping"
            );
            return Ok(MovementOutcome {
                movement: existing,
                already_recorded: true,
            });
        }

        let source = self.require_active(location).await?;

        let movement = MoneyMovement::expense_paid(
            location,
            amount_cents,
            expense_reference,
            paid_at,
            actor_id,
        );

        match self.repo.append_movement(&movement).await? {
            AppendOutcome::Recorded(movement) => {
                info!(
                    movement = %movement.id,
                    location = %source.name,
                    reference = expense_reference,
                    amount_cents,
                    "expense recorded"
                );
                Ok(MovementOutcome {
                    movement,
                    already_recorded: false,
                })
            }
            AppendOutcome::Duplicate(existing) => {
                info!(
                    movement = %existing.id,
                    reference = expense_reference,
                    "expense already recorded, skipping"
                );
                Ok(MovementOutcome {
                    movement: existing,
                    already_recorded: true,
                })
            }
        }
    }

    /// Void a movement's effect with an equal-and-opposite movement. The
    /// original row is never touched; a movement can only be reversed once.
    pub async fn reverse(
        &self,
        movement_id: MovementId,
        actor_id: &str,
    ) -> Result<ReversalOutcome, LedgerError> {
        let original = self
            .repo
            .get_movement(movement_id)
            .await?
            .ok_or_else(|| LedgerError::MovementNotFound(movement_id.to_string()))?;

        if self.repo.find_reversal_of(movement_id).await?.is_some() {
            return Err(LedgerError::AlreadyReversed(movement_id.to_string()));
        }

        let offsetting = original.create_offsetting(actor_id);
        let reversal = self.append_unguarded(offsetting).await?;

        info!(
            original = %original.id,
            reversal = %reversal.id,
            amount_cents = reversal.amount_cents,
            "movement reversed"
        );

        Ok(ReversalOutcome { reversal, original })
    }

    /// Movements of non-idempotent types can't come back as duplicates.
    async fn append_unguarded(
        &self,
        movement: MoneyMovement,
    ) -> Result<MoneyMovement, LedgerError> {
        match self.repo.append_movement(&movement).await? {
            AppendOutcome::Recorded(m) | AppendOutcome::Duplicate(m) => Ok(m),
        }
    }

    async fn require_active(&self, id: LocationId) -> Result<MoneyLocation, LedgerError> {
        let location = self.get_location(id).await?;
        if !location.is_active {
            return Err(LedgerError::LocationInactive(location.name));
        }
        Ok(location)
    }

    // ========================
    // Event hooks
    // ========================

    /// Hook for the invoice lifecycle: called when an invoice transitions to
    /// paid. Errors must fail the triggering transition; a ledger that
    /// silently drifts from its invoices is worthless.
    pub async fn on_invoice_paid(
        &self,
        event: InvoicePaid,
    ) -> Result<MovementOutcome, LedgerError> {
        let location = self.resolve_payment_location(&event.payment_method).await?;
        self.record_payment_received(
            location.id,
            event.amount_cents,
            &event.invoice_id,
            event.paid_at,
            &event.actor_id,
        )
        .await
    }

    /// Hook for the expense lifecycle: called when an expense is paid out.
    pub async fn on_expense_paid(
        &self,
        event: ExpensePaid,
    ) -> Result<MovementOutcome, LedgerError> {
        let location = self.resolve_payment_location(&event.payment_method).await?;
        self.record_expense_paid(
            location.id,
            event.amount_cents,
            &event.expense_id,
            event.paid_at,
            &event.actor_id,
        )
        .await
    }

    // ========================
    // Movement log queries
    // ========================

    /// Get a movement by id.
    pub async fn get_movement(&self, id: MovementId) -> Result<MoneyMovement, LedgerError> {
        self.repo
            .get_movement(id)
            .await?
            .ok_or_else(|| LedgerError::MovementNotFound(id.to_string()))
    }

    /// List movements with optional filters.
    pub async fn list_movements(
        &self,
        filter: &MovementFilter,
    ) -> Result<Vec<MoneyMovement>, LedgerError> {
        Ok(self.repo.list_movements(filter).await?)
    }

    // ========================
    // Reconciliation
    // ========================

    /// Recompute every location's balance from the movement log and compare
    /// against the cached column. Catches drift from any write path that
    /// bypassed the recorder.
    pub async fn reconcile(&self) -> Result<ReconciliationReport, LedgerError> {
        let locations = self.repo.list_locations(true).await?;
        let computed = self.repo.compute_all_balances_from_log().await?;
        let movement_count = self.repo.count_movements().await?;

        let report = build_reconciliation_report(&locations, &computed, movement_count);

        for entry in report.drifted() {
            warn!(
                location = %entry.location_name,
                cached_cents = entry.cached_cents,
                computed_cents = entry.computed_cents,
                "cached balance drifted from movement log"
            );
        }

        Ok(report)
    }

    // ========================
    // Summary aggregator
    // ========================

    /// Recompute the month's profit/loss from the invoice/expense tables and
    /// upsert the rollup row. A full recompute, never an increment: the same
    /// source data always produces the identical row.
    pub async fn calculate_for_month(
        &self,
        month: MonthKey,
    ) -> Result<FinancialSummary, LedgerError> {
        let (from, to) = month.range();

        let (revenue_cents, invoice_count) =
            self.repo.sum_paid_invoices(from, to).await.map_err(|source| {
                LedgerError::AggregationSourceUnavailable {
                    month,
                    source_table: "invoices",
                    source,
                }
            })?;

        let cost_cents = self
            .repo
            .sum_invoice_item_costs(from, to)
            .await
            .map_err(|source| LedgerError::AggregationSourceUnavailable {
                month,
                source_table: "invoice_items",
                source,
            })?;

        let (expenses_cents, expense_count) =
            self.repo.sum_expenses(from, to).await.map_err(|source| {
                LedgerError::AggregationSourceUnavailable {
                    month,
                    source_table: "expenses",
                    source,
                }
            })?;

        let summary = FinancialSummary::from_totals(
            month,
            MonthTotals {
                revenue_cents,
                cost_cents,
                expenses_cents,
                invoice_count,
                expense_count,
            },
            Utc::now(),
        );

        self.repo.upsert_summary(&summary).await?;

        info!(
            month = %month,
            revenue_cents,
            net_profit_cents = summary.net_profit_cents,
            "monthly summary recalculated"
        );

        Ok(summary)
    }

    /// Cache-aside read of the current month: returns the stored row, or
    /// computes it on first read. Never refreshes a row that exists; callers
    /// needing freshness call `calculate_for_month` explicitly.
    pub async fn get_current_month(&self) -> Result<FinancialSummary, LedgerError> {
        let month = MonthKey::containing(Utc::now());
        if let Some(existing) = self.repo.get_summary(month).await? {
            return Ok(existing);
        }
        self.calculate_for_month(month).await
    }

    /// Stored summary for a month, if it has been calculated.
    pub async fn get_summary(
        &self,
        month: MonthKey,
    ) -> Result<Option<FinancialSummary>, LedgerError> {
        Ok(self.repo.get_summary(month).await?)
    }

    /// All calculated summaries, oldest first.
    pub async fn list_summaries(&self) -> Result<Vec<FinancialSummary>, LedgerError> {
        Ok(self.repo.list_summaries().await?)
    }
}
