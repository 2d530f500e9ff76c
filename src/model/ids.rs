//! Entity identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix carried by client-assigned ids until the backend confirms them
pub const TEMP_ID_PREFIX: &str = "temp_";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether this id was minted locally and awaits confirmation
            pub fn is_temporary(&self) -> bool {
                self.0.starts_with(TEMP_ID_PREFIX)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Job id, server-assigned or temporary
    JobId
);
string_id!(
    /// Bid id, server-assigned or temporary
    BidId
);
string_id!(
    /// Account id of a poster or worker
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_detection() {
        assert!(BidId::from("temp_1").is_temporary());
        assert!(!BidId::from("b123").is_temporary());
        assert_eq!(serde_json::to_string(&JobId::from("j1")).unwrap(), "\"j1\"");
    }
}
