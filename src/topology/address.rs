//! Cluster member addresses

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical address of a cluster member
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create an address with an explicit name.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_order_by_name() {
        assert!(Address::named("node-0") < Address::named("node-1"));
    }

    #[test]
    fn test_display_is_name() {
        assert_eq!(Address::named("a").to_string(), "a");
    }
}
