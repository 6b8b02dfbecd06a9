//! Access rights and record lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rights granted on a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    /// Objects may be read and subscribed to.
    pub may_read: bool,
    /// Objects may be written.
    pub may_write: bool,
    /// The partition may be shared further.
    pub may_manage: bool,
}

impl Permissions {
    /// No rights at all.
    pub const NONE: Self = Self {
        may_read: false,
        may_write: false,
        may_manage: false,
    };

    /// Read-only access.
    pub const READ: Self = Self {
        may_read: true,
        may_write: false,
        may_manage: false,
    };

    /// Read and write access.
    pub const READ_WRITE: Self = Self {
        may_read: true,
        may_write: true,
        may_manage: false,
    };

    /// Every right, as held by a partition owner.
    pub const ALL: Self = Self {
        may_read: true,
        may_write: true,
        may_manage: true,
    };

    /// Creates a permission set.
    pub fn new(may_read: bool, may_write: bool, may_manage: bool) -> Self {
        Self {
            may_read,
            may_write,
            may_manage,
        }
    }

    /// Returns true if no right is granted.
    pub fn is_empty(&self) -> bool {
        !(self.may_read || self.may_write || self.may_manage)
    }

    /// Combines two grants, keeping every right held by either.
    pub fn union(self, other: Self) -> Self {
        Self {
            may_read: self.may_read || other.may_read,
            may_write: self.may_write || other.may_write,
            may_manage: self.may_manage || other.may_manage,
        }
    }
}

/// Processing status of a management record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Written by the client, not yet processed by the store.
    #[default]
    Pending,
    /// Processed successfully.
    Success,
    /// Processing failed; see the record's status code.
    Error,
}

impl RecordStatus {
    /// Returns true once no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Success | RecordStatus::Error)
    }
}

/// Reason attached by the store to a record that ended in `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// The record could not be interpreted.
    Malformed,
    /// The store refused the request.
    Rejected,
    /// The token is unknown or its signature does not verify.
    InvalidToken,
    /// The offer behind the token has expired.
    Expired,
    /// The token was already redeemed.
    AlreadyConsumed,
    /// The caller lacks the rights needed.
    PermissionDenied,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Malformed => "malformed",
            StatusCode::Rejected => "rejected",
            StatusCode::InvalidToken => "invalid token",
            StatusCode::Expired => "expired",
            StatusCode::AlreadyConsumed => "already consumed",
            StatusCode::PermissionDenied => "permission denied",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!RecordStatus::Pending.is_terminal());
        assert!(RecordStatus::Success.is_terminal());
        assert!(RecordStatus::Error.is_terminal());
    }

    #[test]
    fn permission_union() {
        let merged = Permissions::READ.union(Permissions::new(false, true, false));
        assert_eq!(merged, Permissions::READ_WRITE);
        assert!(Permissions::NONE.is_empty());
        assert!(!Permissions::READ.is_empty());
    }
}
