//! The closed set of filesystem operations a caller may request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of access requested for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Write,
    Edit,
    List,
    Stat,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Read,
        OperationKind::Write,
        OperationKind::Edit,
        OperationKind::List,
        OperationKind::Stat,
    ];

    /// Whether the target must already exist.
    ///
    /// Only writes may name a missing leaf; its parent must still exist.
    pub fn requires_existing(self) -> bool {
        match self {
            OperationKind::Read | OperationKind::Edit | OperationKind::List | OperationKind::Stat => {
                true
            }
            OperationKind::Write => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Edit => "edit",
            OperationKind::List => "list",
            OperationKind::Stat => "stat",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation name that is not one of [`OperationKind::ALL`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown operation {0:?}, expected one of: read, write, edit, list, stat")]
pub struct UnknownOperation(pub String);

impl FromStr for OperationKind {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownOperation(s.to_owned()))
    }
}
