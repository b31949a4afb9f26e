//! Chat and user identifiers.
//!
//! The hub is inconsistent about id encoding: typing events carry the chat id as a
//! string while read receipts carry it as a number. Both forms normalize to the same
//! integer id, so equality holds regardless of which direction an id came from.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Either JSON representation the hub uses for an id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(i64),
    Text(String),
}

impl TryFrom<WireId> for i64 {
    type Error = String;

    fn try_from(value: WireId) -> Result<Self, Self::Error> {
        match value {
            WireId::Number(n) => Ok(n),
            WireId::Text(s) => s
                .trim()
                .parse()
                .map_err(|e: ParseIntError| format!("id {s:?} is not an integer: {e}")),
        }
    }
}

macro_rules! wire_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "WireId")]
        pub struct $name(pub i64);

        impl $name {
            pub fn value(self) -> i64 {
                self.0
            }
        }

        impl TryFrom<WireId> for $name {
            type Error = String;

            fn try_from(value: WireId) -> Result<Self, Self::Error> {
                i64::try_from(value).map($name)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                $name(value)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

wire_id!(
    /// Chat room id.
    ChatId
);

wire_id!(
    /// User id as issued by the backend.
    UserId
);
