//! Core types used throughout the system
//!
//! Identifier types shared by the ledger, the transaction state machine and
//! the DMT subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User ID - globally unique, immutable after assignment.
///
/// Resolved upstream from the bearer credential. One wallet per user, so the
/// wallet is addressed by the same value.
pub type UserId = u64;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique id
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Transaction ID - ULID-based, monotonic and sortable.
    ///
    /// Doubles as the provider idempotency key for remittance submissions.
    TransactionId
);

ulid_id!(
    /// Remitter ID
    RemitterId
);

ulid_id!(
    /// Beneficiary ID
    BeneficiaryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_parse_roundtrip() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!("not-a-ulid".parse::<RemitterId>().is_err());
    }

    #[test]
    fn test_ids_serialize_as_strings() {
        let id = BeneficiaryId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
