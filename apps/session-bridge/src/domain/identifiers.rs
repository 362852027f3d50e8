//! Strongly-typed identifiers for session entities.
//!
//! Broker ids are plain integers on the wire; wrapping them keeps contract
//! ids, order ids, and request ids from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw broker integer.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Get the raw integer value.
            #[must_use]
            pub const fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    InstrumentId,
    "Broker-assigned contract id. Globally unique and immutable."
);
define_id!(OrderId, "Locally assigned order id, strictly increasing.");
define_id!(
    RequestId,
    "Correlation id for a request whose replies arrive asynchronously."
);
