//! Interface, classify table and adjacency indices.
//!
//! On the wire every index is a `u32` in which `~0` means "none". Inside the
//! engine the sentinel never appears: absent values are `Option::None`, and
//! the conversions below are the only place the sentinel is interpreted.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The "none" sentinel used by the control API for every index.
pub const INDEX_NONE: u32 = u32::MAX;

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates an index. Panics in debug builds on the sentinel.
            pub const fn new(raw: u32) -> Self {
                debug_assert!(raw != INDEX_NONE);
                $name(raw)
            }

            pub const fn as_u32(&self) -> u32 {
                self.0
            }

            pub const fn as_usize(&self) -> usize {
                self.0 as usize
            }

            /// Interprets a wire value, mapping the sentinel to `None`.
            pub const fn from_wire(raw: u32) -> Option<Self> {
                if raw == INDEX_NONE {
                    None
                } else {
                    Some($name(raw))
                }
            }

            /// Wire value of an optional index.
            pub fn to_wire(index: Option<Self>) -> u32 {
                index.map(|i| i.0).unwrap_or(INDEX_NONE)
            }
        }

        impl TryFrom<u32> for $name {
            type Error = ParseError;

            fn try_from(raw: u32) -> Result<Self, Self::Error> {
                Self::from_wire(raw).ok_or(ParseError::SentinelIndex(raw))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_index!(
    /// Software interface index.
    SwIfIndex
);

define_index!(
    /// Index of a classify table; doubles as the tunterm ACL handle.
    TableIndex
);

define_index!(
    /// Index of a forwarding adjacency (the redirect metadata).
    AdjIndex
);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sentinel_maps_to_none() {
        assert_eq!(TableIndex::from_wire(INDEX_NONE), None);
        assert_eq!(TableIndex::from_wire(3), Some(TableIndex::new(3)));
        assert_eq!(TableIndex::to_wire(None), INDEX_NONE);
        assert_eq!(TableIndex::to_wire(Some(TableIndex::new(9))), 9);
    }

    #[test]
    fn test_try_from_rejects_sentinel() {
        assert_eq!(
            SwIfIndex::try_from(INDEX_NONE),
            Err(ParseError::SentinelIndex(INDEX_NONE))
        );
        assert_eq!(SwIfIndex::try_from(1).unwrap().as_u32(), 1);
    }
}
