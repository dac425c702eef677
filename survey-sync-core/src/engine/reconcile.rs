//! Last-writer-wins decision between a cached row and a remote record.

use crate::models::{Entity, LocalRecord};

/// Why a remote record was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Remote `updatedAt` is not strictly newer than the local stamp.
    NotNewer,
    /// Remote `updatedAt` is missing or unparseable, so it cannot be compared.
    Uncomparable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply,
    Skip(SkipReason),
}

/// Applies when there is no local copy, or when the remote `updatedAt` is
/// strictly newer than the local row's stored `updated_at`.
pub fn decide<T: Entity, L>(local: Option<&LocalRecord<L>>, remote: &T) -> Decision {
    let Some(local) = local else {
        return Decision::Apply;
    };

    match remote.remote_updated_at() {
        None => Decision::Skip(SkipReason::Uncomparable),
        Some(remote_ts) if remote_ts > local.updated_at => Decision::Apply,
        Some(_) => Decision::Skip(SkipReason::NotNewer),
    }
}
