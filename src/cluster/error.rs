//! Coordinator error types.

use std::fmt;

use crate::datapath::DatapathError;

use super::instance::Role;

/// Errors returned by coordinator operations.
///
/// All of these are local and recoverable; none of them affect other
/// instances or nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaError {
    /// Unknown instance, unbound VIP, or unknown cluster node
    NotFound(String),
    /// Cluster node already registered
    Conflict(String),
    /// State label not in the label table; the instance keeps `current`
    InvalidState { state: String, current: Role },
    /// Datapath refused the work item; the registry was left unchanged
    Datapath(DatapathError),
}

impl fmt::Display for HaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "not found: {}", what),
            Self::Conflict(what) => write!(f, "already exists: {}", what),
            Self::InvalidState { state, current } => {
                write!(f, "invalid cluster state '{}' (current {})", state, current)
            }
            Self::Datapath(e) => write!(f, "datapath error: {}", e),
        }
    }
}

impl std::error::Error for HaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Datapath(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DatapathError> for HaError {
    fn from(err: DatapathError) -> Self {
        Self::Datapath(err)
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, HaError>;
