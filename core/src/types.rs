//! Domain types shared by every crate in the flash sale workspace.
//!
//! Identifiers are `u64` newtypes so they cannot be swapped by accident in
//! function signatures like `start_seckill(client, item)`. The intent message
//! that travels over the queue is defined here as well, because both the
//! admission path (producer) and the reconciliation path (consumer) depend on
//! its exact wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// The raw identifier value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            /// Parses a path segment such as the `:id` in `/seckill/:id`.
            ///
            /// Zero is rejected: the catalog never hands out id 0.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().parse::<u64>() {
                    Ok(0) => Err(ParseIdError(format!("{} cannot be zero", stringify!($name)))),
                    Ok(id) => Ok(Self(id)),
                    Err(e) => Err(ParseIdError(format!("{}: {e}", stringify!($name)))),
                }
            }
        }
    };
}

numeric_id!(
    /// Verified identifier of the client attempting a purchase.
    ///
    /// Supplied by the authentication layer and trusted as-is.
    ClientId
);

numeric_id!(
    /// Identifier of a sale item in the catalog.
    ItemId
);

/// Durable identifier of an order row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Wrap a database-assigned order id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw database id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sale item as recorded by the durable store.
///
/// `stock` is the authoritative count. It only moves through the
/// reconciliation transaction (and through catalog creation).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Catalog identifier
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Authoritative remaining stock
    pub stock: i64,
    /// Price in the smallest currency unit
    pub price_cents: i64,
    /// When the item was created
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created by reconciliation, awaiting payment
    Pending,
    /// Paid by the client
    Paid,
    /// Cancelled
    Cancelled,
}

impl OrderStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable order.
///
/// At most one order exists per `(client_id, item_id)`; that uniqueness is
/// what makes redelivered intents harmless.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Database identifier
    pub id: OrderId,
    /// Purchasing client
    pub client_id: ClientId,
    /// Purchased item
    pub item_id: ItemId,
    /// Current status
    pub status: OrderStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// Error raised when an intent payload cannot be encoded or decoded.
#[derive(Error, Debug)]
#[error("Invalid seckill intent payload: {0}")]
pub struct IntentCodecError(#[from] serde_json::Error);

/// A successful reservation on its way to durable reconciliation.
///
/// # Wire format
///
/// A JSON object with exactly two integer fields:
///
/// ```json
/// {"client_id": 7, "item_id": 42}
/// ```
///
/// There is no version field. Unknown fields are rejected so a producer
/// running a newer shape cannot be half-understood by an older consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeckillIntent {
    /// Client holding the reservation
    pub client_id: ClientId,
    /// Reserved item
    pub item_id: ItemId,
}

impl SeckillIntent {
    /// Build an intent for a reservation.
    #[must_use]
    pub const fn new(client_id: ClientId, item_id: ItemId) -> Self {
        Self { client_id, item_id }
    }

    /// Encode to the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`IntentCodecError`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, IntentCodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`IntentCodecError`] for malformed payloads, missing or
    /// extra fields, and non-integer identifiers.
    pub fn decode(bytes: &[u8]) -> Result<Self, IntentCodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for SeckillIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client {} / item {}", self.client_id, self.item_id)
    }
}
