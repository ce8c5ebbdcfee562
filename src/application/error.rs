use thiserror::Error;

use crate::domain::{Cents, MonthKey};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(Cents),

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Location is inactive: {0}")]
    LocationInactive(String),

    #[error("Location already exists: {0}")]
    LocationAlreadyExists(String),

    #[error("Movement not found: {0}")]
    MovementNotFound(String),

    #[error("Movement {0} has already been reversed")]
    AlreadyReversed(String),

    #[error("Transfer failed, transaction rolled back")]
    TransferFailed(#[source] anyhow::Error),

    #[error("Aggregation source '{source_table}' unavailable for month {month}")]
    AggregationSourceUnavailable {
        month: MonthKey,
        source_table: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid month key: {0}")]
    InvalidMonth(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
