//! Domain identifier types with validation
//!
//! Newtype wrappers keep destination, channel, queue and qualifier names from
//! being mixed up at call sites. All string identifiers reject blank values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new ", $label, ", rejecting blank values")]
            pub fn new(id: impl Into<String>) -> Result<Self, String> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(format!("{} cannot be empty", $label));
                }
                Ok(Self(id))
            }

            /// Returns the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes self and returns the inner String
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a configured export destination
    ///
    /// ```
    /// use conduit::domain::ids::DestinationId;
    /// use std::str::FromStr;
    ///
    /// let id = DestinationId::from_str("invoices-csv").unwrap();
    /// assert_eq!(id.as_str(), "invoices-csv");
    /// ```
    DestinationId,
    "Destination ID"
);

string_id!(
    /// Identifier of an asynchronous delivery channel
    ChannelId,
    "Channel ID"
);

string_id!(
    /// Identifier of an asynchronous delivery queue
    QueueId,
    "Queue ID"
);

string_id!(
    /// Logical name of a bucket series (e.g. "INVOICES")
    Qualifier,
    "Qualifier"
);

/// Sink identifier
///
/// Allocated by the persistence layer at session open; monotonically
/// increasing per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkId(i64);

impl SinkId {
    /// Wrap a raw sink key
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw key value
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SinkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| format!("Invalid sink ID '{s}': {e}"))
    }
}
