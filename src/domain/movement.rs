use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, LocationId};

pub type MovementId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Money moved between two locations
    Transfer,
    /// Money entered a location from outside the ledger
    Deposit,
    /// Money left a location to outside the ledger
    Withdrawal,
    /// Customer payment landed in a location
    PaymentReceived,
    /// Expense was paid out of a location
    ExpensePaid,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Transfer => "transfer",
            MovementType::Deposit => "deposit",
            MovementType::Withdrawal => "withdrawal",
            MovementType::PaymentReceived => "payment_received",
            MovementType::ExpensePaid => "expense_paid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "transfer" => Some(MovementType::Transfer),
            "deposit" => Some(MovementType::Deposit),
            "withdrawal" => Some(MovementType::Withdrawal),
            "payment_received" => Some(MovementType::PaymentReceived),
            "expense_paid" => Some(MovementType::ExpensePaid),
            _ => None,
        }
    }

    /// Types driven by retried external events, guarded against double
    /// application per reference.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            MovementType::PaymentReceived | MovementType::ExpensePaid
        )
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Invoice,
    Expense,
    Manual,
    Other,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Invoice => "invoice",
            ReferenceType::Expense => "expense",
            ReferenceType::Manual => "manual",
            ReferenceType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "invoice" => Some(ReferenceType::Invoice),
            "expense" => Some(ReferenceType::Expense),
            "manual" => Some(ReferenceType::Manual),
            "other" => Some(ReferenceType::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable fact: money moved. Movements are never updated or deleted;
/// corrections are new offsetting movements linked through `reverses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyMovement {
    pub id: MovementId,
    /// Source location (balance decreases). None for money entering the ledger.
    pub from_location: Option<LocationId>,
    /// Destination location (balance increases). None for money leaving.
    pub to_location: Option<LocationId>,
    /// Amount in cents, always positive
    pub amount_cents: Cents,
    /// When the money actually moved
    pub movement_date: DateTime<Utc>,
    /// When this row was written
    pub recorded_at: DateTime<Utc>,
    pub movement_type: MovementType,
    pub reference_type: ReferenceType,
    /// Id of the business object that caused this movement (invoice id,
    /// expense id). The idempotency guard keys on it.
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub actor_id: String,
    /// If this movement voids another one, the original's id
    pub reverses: Option<MovementId>,
}

impl MoneyMovement {
    fn base(
        movement_type: MovementType,
        reference_type: ReferenceType,
        amount_cents: Cents,
        movement_date: DateTime<Utc>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_location: None,
            to_location: None,
            amount_cents,
            movement_date,
            recorded_at: Utc::now(),
            movement_type,
            reference_type,
            reference_id: None,
            description: None,
            actor_id: actor_id.into(),
            reverses: None,
        }
    }

    /// Manual transfer between two locations.
    pub fn transfer(
        from: LocationId,
        to: LocationId,
        amount_cents: Cents,
        movement_date: DateTime<Utc>,
        actor_id: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(
            MovementType::Transfer,
            ReferenceType::Manual,
            amount_cents,
            movement_date,
            actor_id,
        );
        m.from_location = Some(from);
        m.to_location = Some(to);
        m
    }

    /// Manual deposit into a location.
    pub fn deposit(
        to: LocationId,
        amount_cents: Cents,
        movement_date: DateTime<Utc>,
        actor_id: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(
            MovementType::Deposit,
            ReferenceType::Manual,
            amount_cents,
            movement_date,
            actor_id,
        );
        m.to_location = Some(to);
        m
    }

    /// Manual withdrawal out of a location.
    pub fn withdrawal(
        from: LocationId,
        amount_cents: Cents,
        movement_date: DateTime<Utc>,
        actor_id: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(
            MovementType::Withdrawal,
            ReferenceType::Manual,
            amount_cents,
            movement_date,
            actor_id,
        );
        m.from_location = Some(from);
        m
    }

    /// Customer payment for an invoice, credited to a location.
    pub fn payment_received(
        to: LocationId,
        amount_cents: Cents,
        invoice_reference: impl Into<String>,
        movement_date: DateTime<Utc>,
        actor_id: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(
            MovementType::PaymentReceived,
            ReferenceType::Invoice,
            amount_cents,
            movement_date,
            actor_id,
        );
        m.to_location = Some(to);
        m.reference_id = Some(invoice_reference.into());
        m
    }

    /// Expense paid out of a location.
    pub fn expense_paid(
        from: LocationId,
        amount_cents: Cents,
        expense_reference: impl Into<String>,
        movement_date: DateTime<Utc>,
        actor_id: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(
            MovementType::ExpensePaid,
            ReferenceType::Expense,
            amount_cents,
            movement_date,
            actor_id,
        );
        m.from_location = Some(from);
        m.reference_id = Some(expense_reference.into());
        m
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }

    /// Guard key for retried external events: only idempotent movement types
    /// with a reference carry one.
    pub fn idempotency_key(&self) -> Option<(ReferenceType, &str, MovementType)> {
        if !self.movement_type.is_idempotent() {
            return None;
        }
        self.reference_id
            .as_deref()
            .map(|r| (self.reference_type, r, self.movement_type))
    }

    /// Shape invariants every movement must satisfy before it is written.
    pub fn validate(&self) -> Result<(), MovementShapeError> {
        if self.amount_cents <= 0 {
            return Err(MovementShapeError::NonPositiveAmount(self.amount_cents));
        }
        let shape_ok = match self.movement_type {
            MovementType::Transfer => self.from_location.is_some() && self.to_location.is_some(),
            MovementType::Deposit | MovementType::PaymentReceived => {
                self.from_location.is_none() && self.to_location.is_some()
            }
            MovementType::Withdrawal | MovementType::ExpensePaid => {
                self.from_location.is_some() && self.to_location.is_none()
            }
        };
        if !shape_ok {
            return Err(MovementShapeError::LocationShapeMismatch(
                self.movement_type,
            ));
        }
        if self.from_location.is_some() && self.from_location == self.to_location {
            return Err(MovementShapeError::SameLocation);
        }
        Ok(())
    }

    /// Build the equal-and-opposite movement that voids this one. Locations
    /// swap sides; the type is derived from the resulting shape so the shape
    /// invariant still holds.
    pub fn create_offsetting(&self, actor_id: impl Into<String>) -> Self {
        let movement_type = match (self.to_location, self.from_location) {
            (Some(_), Some(_)) => MovementType::Transfer,
            (Some(_), None) => MovementType::Withdrawal,
            (None, Some(_)) => MovementType::Deposit,
            (None, None) => unreachable!("movement with no locations"),
        };
        Self {
            id: Uuid::new_v4(),
            from_location: self.to_location,
            to_location: self.from_location,
            amount_cents: self.amount_cents,
            movement_date: Utc::now(),
            recorded_at: Utc::now(),
            movement_type,
            reference_type: self.reference_type,
            reference_id: self.reference_id.clone(),
            description: Some(format!(
                "Reversal of: {}",
                self.description.as_deref().unwrap_or("(no description)")
            )),
            actor_id: actor_id.into(),
            reverses: Some(self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovementShapeError {
    NonPositiveAmount(Cents),
    LocationShapeMismatch(MovementType),
    SameLocation,
}

impl std::fmt::Display for MovementShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MovementShapeError::NonPositiveAmount(amount) => {
                write!(f, "movement amount must be positive, got {}", amount)
            }
            MovementShapeError::LocationShapeMismatch(mt) => {
                write!(f, "locations don't match movement type {}", mt)
            }
            MovementShapeError::SameLocation => {
                write!(f, "source and destination are the same location")
            }
        }
    }
}

impl std::error::Error for MovementShapeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> LocationId {
        Uuid::new_v4()
    }

    #[test]
    fn test_type_roundtrip() {
        for mt in [
            MovementType::Transfer,
            MovementType::Deposit,
            MovementType::Withdrawal,
            MovementType::PaymentReceived,
            MovementType::ExpensePaid,
        ] {
            assert_eq!(MovementType::from_str(mt.as_str()), Some(mt));
        }
        for rt in [
            ReferenceType::Invoice,
            ReferenceType::Expense,
            ReferenceType::Manual,
            ReferenceType::Other,
        ] {
            assert_eq!(ReferenceType::from_str(rt.as_str()), Some(rt));
        }
    }

    #[test]
    fn test_constructors_produce_valid_shapes() {
        let (a, b) = (loc(), loc());
        let now = Utc::now();

        assert!(MoneyMovement::transfer(a, b, 5000, now, "u1").validate().is_ok());
        assert!(MoneyMovement::deposit(a, 5000, now, "u1").validate().is_ok());
        assert!(MoneyMovement::withdrawal(a, 5000, now, "u1").validate().is_ok());
        assert!(
            MoneyMovement::payment_received(a, 5000, "INV-1", now, "u1")
                .validate()
                .is_ok()
        );
        assert!(
            MoneyMovement::expense_paid(a, 5000, "EXP-1", now, "u1")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_validate_rejects_bad_amounts() {
        let (a, b) = (loc(), loc());
        let m = MoneyMovement::transfer(a, b, 0, Utc::now(), "u1");
        assert_eq!(
            m.validate(),
            Err(MovementShapeError::NonPositiveAmount(0))
        );
        let m = MoneyMovement::deposit(a, -500, Utc::now(), "u1");
        assert!(matches!(
            m.validate(),
            Err(MovementShapeError::NonPositiveAmount(-500))
        ));
    }

    #[test]
    fn test_validate_rejects_self_transfer() {
        let a = loc();
        let m = MoneyMovement::transfer(a, a, 5000, Utc::now(), "u1");
        assert_eq!(m.validate(), Err(MovementShapeError::SameLocation));
    }

    #[test]
    fn test_validate_rejects_shape_mismatch() {
        let (a, b) = (loc(), loc());
        let mut m = MoneyMovement::payment_received(a, 5000, "INV-1", Utc::now(), "u1");
        m.from_location = Some(b);
        assert!(matches!(
            m.validate(),
            Err(MovementShapeError::LocationShapeMismatch(
                MovementType::PaymentReceived
            ))
        ));
    }

    #[test]
    fn test_idempotency_key() {
        let a = loc();
        let payment = MoneyMovement::payment_received(a, 5000, "INV-7", Utc::now(), "u1");
        assert_eq!(
            payment.idempotency_key(),
            Some((
                ReferenceType::Invoice,
                "INV-7",
                MovementType::PaymentReceived
            ))
        );

        let manual = MoneyMovement::deposit(a, 5000, Utc::now(), "u1");
        assert_eq!(manual.idempotency_key(), None);
    }

    #[test]
    fn test_offsetting_payment_becomes_withdrawal() {
        let a = loc();
        let original =
            MoneyMovement::payment_received(a, 5000, "INV-1", Utc::now(), "u1").with_description("repair fee");

        let offset = original.create_offsetting("u2");

        assert_eq!(offset.movement_type, MovementType::Withdrawal);
        assert_eq!(offset.from_location, Some(a));
        assert_eq!(offset.to_location, None);
        assert_eq!(offset.amount_cents, 5000);
        assert_eq!(offset.reverses, Some(original.id));
        assert_eq!(offset.reference_id.as_deref(), Some("INV-1"));
        assert!(offset.validate().is_ok());
        assert!(offset.is_reversal());
    }

    #[test]
    fn test_offsetting_expense_becomes_deposit() {
        let a = loc();
        let original = MoneyMovement::expense_paid(a, 2500, "EXP-3", Utc::now(), "u1");
        let offset = original.create_offsetting("u1");

        assert_eq!(offset.movement_type, MovementType::Deposit);
        assert_eq!(offset.to_location, Some(a));
        assert!(offset.validate().is_ok());
    }

    #[test]
    fn test_offsetting_transfer_swaps_sides() {
        let (a, b) = (loc(), loc());
        let original = MoneyMovement::transfer(a, b, 10000, Utc::now(), "u1");
        let offset = original.create_offsetting("u1");

        assert_eq!(offset.movement_type, MovementType::Transfer);
        assert_eq!(offset.from_location, Some(b));
        assert_eq!(offset.to_location, Some(a));
        assert!(offset.validate().is_ok());
    }

    #[test]
    fn test_offsetting_is_not_guarded() {
        // A reversal of a payment must not collide with the original's
        // idempotency key, otherwise it could never be written.
        let a = loc();
        let original = MoneyMovement::payment_received(a, 5000, "INV-1", Utc::now(), "u1");
        let offset = original.create_offsetting("u1");
        assert_eq!(offset.idempotency_key(), None);
    }
}
