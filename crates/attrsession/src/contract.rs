//! The session-state contract a hosting web framework drives.
//!
//! A request that needs write access to its session goes through
//! `get_record_exclusive`, then exactly one of `set_and_release_lock`,
//! `release_lock` or `remove_record` with the token it was handed. Read-only
//! requests use `get_record`. When a read reports the session absent, the
//! framework creates one with `create_new_record` (or
//! `create_uninitialized_record` for cookieless sessions).

use async_trait::async_trait;

use crate::attributes::LockId;
use crate::error::Result;
use crate::store::{Lookup, SessionItem};

/// Session storage operations required by the hosting framework.
#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Build an empty session in memory. Touches no storage.
    fn create_new_record(&self, timeout_minutes: u32) -> SessionItem;

    /// Persist an empty, uninitialized record, replacing any existing one.
    async fn create_uninitialized_record(&self, session_id: &str, timeout_minutes: u32)
    -> Result<()>;

    /// Read a session without taking its lock.
    async fn get_record(&self, session_id: &str) -> Result<Lookup>;

    /// Read a session and take its lock.
    async fn get_record_exclusive(&self, session_id: &str) -> Result<Lookup>;

    /// Unlock a session and renew its expiry.
    async fn release_lock(&self, session_id: &str, lock_id: LockId) -> Result<()>;

    /// Delete a session held under `lock_id`.
    async fn remove_record(&self, session_id: &str, lock_id: LockId) -> Result<()>;

    /// Refresh the declared timeout of a session.
    async fn reset_timeout(&self, session_id: &str) -> Result<()>;

    /// Save a session and unlock it.
    async fn set_and_release_lock(
        &self,
        session_id: &str,
        item: &SessionItem,
        lock_id: LockId,
        is_new: bool,
    ) -> Result<()>;
}
