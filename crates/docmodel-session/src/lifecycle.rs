//! Lifecycle states and the guard contracts between them.
//!
//! ```text
//!            persist                remove
//!   New ───────────────▶ Managed ───────────▶ Removed ──flush──▶ (deleted)
//!                          │  ▲                  │
//!            detach/clear  │  └──── persist ─────┘
//!                          ▼
//!                       Detached
//! ```

use docmodel_core::{IdStrategy, InvalidArgument, Result, Value};
use serde::Serialize;

/// Lifecycle state of an object relative to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DocumentState {
    /// Never persisted and not known to the session.
    New,
    /// Tracked by the session; exists or will exist in the store.
    Managed,
    /// Scheduled for deletion at the next flush.
    Removed,
    /// Has an identity but is not tracked by the session.
    Detached,
}

/// Operations subject to lifecycle guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Persist,
    Remove,
    Merge,
    Refresh,
    ScheduleInsert,
    ScheduleUpdate,
    ScheduleDelete,
    SingleFlush,
    FlushInsert,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Persist => "persist",
            Operation::Remove => "remove",
            Operation::Merge => "merge",
            Operation::Refresh => "refresh",
            Operation::ScheduleInsert => "scheduling for insert",
            Operation::ScheduleUpdate => "scheduling for update",
            Operation::ScheduleDelete => "scheduling for delete",
            Operation::SingleFlush => "single document flush",
            Operation::FlushInsert => "insert",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that `op` is legal for an object in `state`.
///
/// `document` renders the object for the error message and is only called
/// on failure.
pub(crate) fn check_operation(
    state: DocumentState,
    op: Operation,
    document: impl FnOnce() -> String,
) -> std::result::Result<(), InvalidArgument> {
    use DocumentState as S;
    use Operation as O;

    match (state, op) {
        (S::Managed | S::Removed, O::SingleFlush) => Ok(()),
        (_, O::SingleFlush) => Err(InvalidArgument::InvalidSingleDocumentFlush {
            document: document(),
        }),
        (S::Detached, O::Persist | O::Remove | O::Merge | O::Refresh | O::ScheduleInsert) => {
            Err(InvalidArgument::DetachedDocumentCannot {
                document: document(),
                operation: op.as_str().to_string(),
            })
        }
        (S::Removed, O::Merge | O::Refresh | O::ScheduleUpdate) => {
            Err(InvalidArgument::DocumentIsRemoved {
                document: document(),
                operation: op.as_str().to_string(),
            })
        }
        (S::New | S::Detached, O::Refresh | O::ScheduleUpdate | O::ScheduleDelete) => {
            Err(InvalidArgument::DocumentNotManaged {
                document: document(),
            })
        }
        _ => Ok(()),
    }
}

/// Pending-work facts about one object, checked before scheduling an insert.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct InsertScheduling {
    pub pending_update: bool,
    pub dirty: bool,
    pub pending_delete: bool,
    pub pending_insert: bool,
    pub snapshotted: bool,
}

impl InsertScheduling {
    pub(crate) fn check(
        self,
        document: impl FnOnce() -> String,
    ) -> std::result::Result<(), InvalidArgument> {
        if self.pending_update || self.dirty {
            return Err(InvalidArgument::ScheduleInsertForManagedDirty {
                document: document(),
            });
        }
        if self.pending_delete {
            return Err(InvalidArgument::ScheduleInsertForRemoved {
                document: document(),
            });
        }
        if self.pending_insert {
            return Err(InvalidArgument::ScheduleInsertTwice {
                document: document(),
            });
        }
        if self.snapshotted {
            return Err(InvalidArgument::DirtyDocumentScheduledForInsert {
                document: document(),
            });
        }
        Ok(())
    }
}

/// State of an object the session does not hold.
///
/// Without an identity the object is New. With one, assigned-identity types
/// ask the store whether the document exists; other strategies only produce
/// identities for objects that were persisted, so the object is Detached.
pub(crate) fn derive_unheld_state(
    identity: Option<&Value>,
    strategy: IdStrategy,
    stored: impl FnOnce(&Value) -> Result<bool>,
) -> Result<DocumentState> {
    let Some(id) = identity else {
        return Ok(DocumentState::New);
    };
    if strategy == IdStrategy::Assigned {
        return Ok(if stored(id)? {
            DocumentState::Detached
        } else {
            DocumentState::New
        });
    }
    Ok(DocumentState::Detached)
}
