use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type LocationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    /// Physical cash register / drawer
    Cash,
    /// Bank account
    BankAccount,
    /// Digital wallet (mobile money, InstaPay and friends)
    DigitalWallet,
    /// Anything that doesn't fit the above
    Other,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Cash => "cash",
            LocationType::BankAccount => "bank_account",
            LocationType::DigitalWallet => "digital_wallet",
            LocationType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cash" => Some(LocationType::Cash),
            "bank_account" => Some(LocationType::BankAccount),
            "digital_wallet" => Some(LocationType::DigitalWallet),
            "other" => Some(LocationType::Other),
            _ => None,
        }
    }

    /// Guess a location type from a free-form payment-method label coming
    /// from the invoicing side ("Cash", "Vodafone Wallet", "Bank transfer"...).
    pub fn infer_from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        if label.contains("cash") {
            LocationType::Cash
        } else if label.contains("wallet") || label.contains("instapay") {
            LocationType::DigitalWallet
        } else if label.contains("bank") || label.contains("transfer") || label.contains("account")
        {
            LocationType::BankAccount
        } else {
            LocationType::Other
        }
    }
}

impl std::fmt::Display for LocationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A place money physically sits. The `balance_cents` column is a cache of
/// the movement log's net effect for this location; only the recorder
/// mutates it, and reconciliation checks it against the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyLocation {
    pub id: LocationId,
    pub name: String,
    /// Display name in the shop's local language, if different
    pub localized_name: Option<String>,
    pub location_type: LocationType,
    pub balance_cents: Cents,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl MoneyLocation {
    pub fn new(name: String, location_type: LocationType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            localized_name: None,
            location_type,
            balance_cents: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Zero-balance fallback location for an unrecognized payment method.
    pub fn default_for_label(label: &str) -> Self {
        Self::new(label.to_string(), LocationType::infer_from_label(label))
    }

    pub fn with_localized_name(mut self, name: impl Into<String>) -> Self {
        self.localized_name = Some(name.into());
        self
    }
}
