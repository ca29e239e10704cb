//! Reply status codes and error mapping.

use std::fmt;

use serde::Serialize;
use tunterm_types::ParseError;

use super::wire::WireError;
use crate::binding::BindingError;
use crate::classify::ClassifyError;
use crate::fib::PathError;
use crate::table::TableError;

/// Status carried in every reply. The numeric values are the host's API
/// return values and are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ApiStatus {
    Success = 0,
    InvalidSwIfIndex = -2,
    NoSuchEntry = -6,
    InvalidValue = -52,
    InvalidValue2 = -53,
    InvalidValue3 = -54,
    NoPathsInRoute = -59,
    InvalidAddressFamily = -124,
    ResourceInUse = -133,
}

impl ApiStatus {
    const ALL: [ApiStatus; 9] = [
        ApiStatus::Success,
        ApiStatus::InvalidSwIfIndex,
        ApiStatus::NoSuchEntry,
        ApiStatus::InvalidValue,
        ApiStatus::InvalidValue2,
        ApiStatus::InvalidValue3,
        ApiStatus::NoPathsInRoute,
        ApiStatus::InvalidAddressFamily,
        ApiStatus::ResourceInUse,
    ];

    pub const fn retval(&self) -> i32 {
        *self as i32
    }

    pub fn from_retval(retval: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.retval() == retval)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, ApiStatus::Success)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ApiStatus::Success => "success",
            ApiStatus::InvalidSwIfIndex => "invalid sw_if_index",
            ApiStatus::NoSuchEntry => "no such entry",
            ApiStatus::InvalidValue => "invalid value",
            ApiStatus::InvalidValue2 => "invalid value #2",
            ApiStatus::InvalidValue3 => "invalid value #3",
            ApiStatus::NoPathsInRoute => "no paths in route",
            ApiStatus::InvalidAddressFamily => "invalid address family",
            ApiStatus::ResourceInUse => "resource in use",
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.retval())
    }
}

impl From<&PathError> for ApiStatus {
    fn from(e: &PathError) -> Self {
        match e {
            PathError::InvalidInterface(_) => ApiStatus::InvalidSwIfIndex,
            PathError::NoPaths => ApiStatus::NoPathsInRoute,
            PathError::Unresolved(_) => ApiStatus::NoSuchEntry,
        }
    }
}

impl From<&ClassifyError> for ApiStatus {
    fn from(e: &ClassifyError) -> Self {
        match e {
            ClassifyError::NoSuchTable(_) | ClassifyError::NoSuchSession(_) => ApiStatus::NoSuchEntry,
            ClassifyError::MatchTooShort { .. } => ApiStatus::InvalidValue,
        }
    }
}

impl From<&TableError> for ApiStatus {
    fn from(e: &TableError) -> Self {
        match e {
            TableError::SentinelTable | TableError::NoSuchTable(_) => ApiStatus::InvalidValue,
            TableError::FamilyMismatch { .. } => ApiStatus::InvalidValue2,
            TableError::RuleFamilyMismatch { .. } => ApiStatus::InvalidValue3,
            TableError::NoPaths { .. } => ApiStatus::NoPathsInRoute,
            TableError::Path { source, .. } => source.into(),
            TableError::InUse { .. } => ApiStatus::ResourceInUse,
            TableError::Classify(inner) => inner.into(),
        }
    }
}

impl From<&BindingError> for ApiStatus {
    fn from(e: &BindingError) -> Self {
        match e {
            BindingError::SentinelTable | BindingError::NoSuchTable(_) => ApiStatus::InvalidValue,
            BindingError::InvalidInterface(_) => ApiStatus::InvalidSwIfIndex,
            BindingError::SlotInUse { .. } => ApiStatus::ResourceInUse,
            BindingError::NotBound { .. } => ApiStatus::InvalidValue2,
            BindingError::Feature(_) => ApiStatus::InvalidValue,
        }
    }
}

impl From<&WireError> for ApiStatus {
    fn from(e: &WireError) -> Self {
        match e {
            WireError::Address(ParseError::UnknownWireFamily(_))
            | WireError::Address(ParseError::InvalidAddressFamily(_)) => {
                ApiStatus::InvalidAddressFamily
            }
            _ => ApiStatus::InvalidValue,
        }
    }
}
