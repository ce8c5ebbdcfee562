use std::collections::HashMap;

use super::{Cents, LocationId, MoneyLocation, MoneyMovement};

/// Net effect of a movement on cached balances: (location, signed delta),
/// ordered by ascending location id so concurrent writers always touch rows
/// in the same order.
pub fn balance_deltas(movement: &MoneyMovement) -> Vec<(LocationId, Cents)> {
    let mut deltas = Vec::with_capacity(2);
    if let Some(from) = movement.from_location {
        deltas.push((from, -movement.amount_cents));
    }
    if let Some(to) = movement.to_location {
        deltas.push((to, movement.amount_cents));
    }
    deltas.sort_by_key(|(id, _)| *id);
    deltas
}

/// Balance of a single location derived from movement history.
/// Balance = sum of incoming amounts - sum of outgoing amounts.
pub fn compute_balance(location_id: LocationId, movements: &[MoneyMovement]) -> Cents {
    movements.iter().fold(0, |balance, m| {
        let mut balance = balance;
        if m.to_location == Some(location_id) {
            balance += m.amount_cents;
        }
        if m.from_location == Some(location_id) {
            balance -= m.amount_cents;
        }
        balance
    })
}

/// Balances of all locations touched by the given movements.
pub fn compute_all_balances(movements: &[MoneyMovement]) -> HashMap<LocationId, Cents> {
    let mut balances: HashMap<LocationId, Cents> = HashMap::new();
    for m in movements {
        if let Some(from) = m.from_location {
            *balances.entry(from).or_insert(0) -= m.amount_cents;
        }
        if let Some(to) = m.to_location {
            *balances.entry(to).or_insert(0) += m.amount_cents;
        }
    }
    balances
}

/// One location's cached balance checked against the movement log.
#[derive(Debug, Clone)]
pub struct ReconciliationEntry {
    pub location_id: LocationId,
    pub location_name: String,
    pub cached_cents: Cents,
    pub computed_cents: Cents,
}

impl ReconciliationEntry {
    pub fn drift_cents(&self) -> Cents {
        self.cached_cents - self.computed_cents
    }

    pub fn is_consistent(&self) -> bool {
        self.cached_cents == self.computed_cents
    }
}

/// Result of recomputing every cached balance from the full log.
#[derive(Debug, Clone)]
pub struct ReconciliationReport {
    pub entries: Vec<ReconciliationEntry>,
    pub movement_count: i64,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.entries.iter().all(ReconciliationEntry::is_consistent)
    }

    pub fn drifted(&self) -> impl Iterator<Item = &ReconciliationEntry> {
        self.entries.iter().filter(|e| !e.is_consistent())
    }
}

/// Compare cached balances against log-derived ones. Locations absent from
/// the computed map have never seen a movement and must cache zero.
pub fn build_reconciliation_report(
    locations: &[MoneyLocation],
    computed: &HashMap<LocationId, Cents>,
    movement_count: i64,
) -> ReconciliationReport {
    let entries = locations
        .iter()
        .map(|loc| ReconciliationEntry {
            location_id: loc.id,
            location_name: loc.name.clone(),
            cached_cents: loc.balance_cents,
            computed_cents: computed.get(&loc.id).copied().unwrap_or(0),
        })
        .collect();

    ReconciliationReport {
        entries,
        movement_count,
    }
}
