//! Strongly-typed identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a login session (the liveness key in the session store).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

/// Identifier of a committed transaction record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid identifier: {name}: {reason}")]
pub struct InvalidId {
    pub name: &'static str,
    pub reason: String,
}

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal, $ctor:expr) => {
        impl $t {
            pub fn new() -> Self {
                Self($ctor)
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s).map_err(|e| InvalidId {
                    name: $name,
                    reason: e.to_string(),
                })?;
                Ok(Self(uuid))
            }
        }
    };
}

// Session ids are bearer-adjacent secrets: fully random, no embedded timestamp.
impl_uuid_newtype!(SessionId, "SessionId", Uuid::new_v4());
// Transaction ids are time-ordered so history sorts naturally.
impl_uuid_newtype!(TransactionId, "TransactionId", Uuid::now_v7());
