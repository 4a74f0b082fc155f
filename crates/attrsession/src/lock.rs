//! Per-session exclusive locks built from conditional writes.
//!
//! A record is locked by flipping `Locked` from `false` to `true`. The
//! `LockId` fencing token, not the flag, decides who may write: every
//! acquisition is followed by a token bump, and release, remove and save
//! are all conditional on the caller's token still being current.
//!
//! Stealing an abandoned lock advances the token in the same conditional
//! write, so of several callers stealing the same lock only one succeeds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::attributes::{self, AttributeSet, LOCK_DATE, LOCK_ID, LOCKED, LockId, SessionActions};
use crate::backend::{AttributeStore, UpdateCondition};
use crate::error::{Result, StoreError};

/// Default age after which a held lock may be stolen.
pub const DEFAULT_MAX_LOCK_AGE: Duration = Duration::from_secs(120);

/// Fenced advances tried under a held lock before it is handed back.
pub(crate) const HELD_ADVANCE_ATTEMPTS: usize = 3;

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller now holds the lock.
    Acquired {
        /// The lock was taken over from a holder that went quiet.
        stolen: bool,
    },
    /// Someone else holds the lock.
    Busy {
        lock_age: Duration,
        /// Token observed on the record, if it could be read.
        lock_id: Option<LockId>,
    },
    /// No record exists for the item.
    NotFound,
}

/// Result of a fenced token advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAdvance {
    Advanced(LockId),
    /// The token moved since it was observed.
    Conflict,
    /// The record disappeared.
    Missing,
}

/// Acquires, steals, fences and releases record locks.
pub struct LockManager<S> {
    store: Arc<S>,
    max_lock_age: Duration,
}

impl<S> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            max_lock_age: self.max_lock_age,
        }
    }
}

impl<S: AttributeStore> LockManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            max_lock_age: DEFAULT_MAX_LOCK_AGE,
        }
    }

    /// Set the age after which a held lock counts as abandoned.
    pub fn with_max_lock_age(mut self, max_lock_age: Duration) -> Self {
        self.max_lock_age = max_lock_age;
        self
    }

    pub fn max_lock_age(&self) -> Duration {
        self.max_lock_age
    }

    /// Try once to take the lock on `item`.
    ///
    /// Never retries; contention is reported as [`LockOutcome::Busy`].
    pub async fn try_acquire(&self, item: &str) -> Result<LockOutcome> {
        let take = AttributeSet::new()
            .bool(LOCKED, true)
            .timestamp(LOCK_DATE, Utc::now());
        let unlocked = UpdateCondition::equals(LOCKED, attributes::format_bool(false));

        match self
            .store
            .put_attributes(item, take.as_slice(), Some(&unlocked))
            .await
        {
            Ok(()) => {
                debug!(item = %item, "lock acquired");
                Ok(LockOutcome::Acquired { stolen: false })
            }
            Err(e) if e.is_missing_target() => Ok(LockOutcome::NotFound),
            Err(e) if e.is_conflict() => self.try_steal(item).await,
            Err(e) => Err(e.into()),
        }
    }

    /// The lock is held: take it over if the holder has gone quiet.
    async fn try_steal(&self, item: &str) -> Result<LockOutcome> {
        let attrs = self
            .store
            .get_attributes(item, &[LOCK_DATE, LOCK_ID], true)
            .await?;

        let now = Utc::now();
        let lock_date = attributes::first(&attrs, LOCK_DATE).map(attributes::parse_timestamp);
        let lock_id = attributes::first(&attrs, LOCK_ID).map(attributes::parse_int::<u64>);

        let (lock_date, lock_id) = match (lock_date, lock_id) {
            (Some(Ok(date)), Some(Ok(id))) => (date, LockId::new(id)),
            (None, None) => return Ok(LockOutcome::NotFound),
            _ => {
                debug!(item = %item, "held lock has unreadable metadata");
                return Ok(LockOutcome::Busy {
                    lock_age: Duration::ZERO,
                    lock_id: None,
                });
            }
        };

        let lock_age = attributes::age(lock_date, now);
        if lock_age < self.max_lock_age {
            debug!(
                item = %item,
                lock_id = %lock_id,
                lock_age_ms = lock_age.as_millis() as u64,
                "lock is held"
            );
            return Ok(LockOutcome::Busy {
                lock_age,
                lock_id: Some(lock_id),
            });
        }

        let take = AttributeSet::new()
            .bool(LOCKED, true)
            .timestamp(LOCK_DATE, now)
            .lock_id(lock_id.next());
        let same_holder = fence(lock_id);

        match self
            .store
            .put_attributes(item, take.as_slice(), Some(&same_holder))
            .await
        {
            Ok(()) => {
                info!(
                    item = %item,
                    lock_id = %lock_id,
                    lock_age_ms = lock_age.as_millis() as u64,
                    "stole abandoned lock"
                );
                Ok(LockOutcome::Acquired { stolen: true })
            }
            Err(e) if e.is_missing_target() => Ok(LockOutcome::NotFound),
            Err(e) if e.is_conflict() => Ok(LockOutcome::Busy {
                lock_age: Duration::ZERO,
                lock_id: None,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance the token from `observed` and clear the action flags.
    pub async fn advance_token(&self, item: &str, observed: LockId) -> Result<TokenAdvance> {
        let next = observed.next();
        let bump = AttributeSet::new()
            .lock_id(next)
            .flags(SessionActions::NONE);
        let fence = UpdateCondition::equals(LOCK_ID, observed.to_string());

        match self
            .store
            .put_attributes(item, bump.as_slice(), Some(&fence))
            .await
        {
            Ok(()) => Ok(TokenAdvance::Advanced(next)),
            Err(e) if e.is_conflict() => Ok(TokenAdvance::Conflict),
            Err(e) if e.is_missing_target() => Ok(TokenAdvance::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance the token of a lock the caller holds through [`try_acquire`].
    ///
    /// While the flag is held only shared readers that saw the record
    /// unlocked can still move the token, so a conflict is retried from a
    /// fresh read. If the token keeps moving the flag is cleared, fenced on
    /// the last token seen, and the conflict is reported.
    ///
    /// [`try_acquire`]: LockManager::try_acquire
    pub async fn advance_held(&self, item: &str, observed: LockId) -> Result<TokenAdvance> {
        let mut observed = observed;
        for attempt in 1..=HELD_ADVANCE_ATTEMPTS {
            match self.advance_token(item, observed).await? {
                TokenAdvance::Conflict => {}
                other => return Ok(other),
            }
            match self.current_token(item).await? {
                Some(current) => {
                    debug!(
                        item = %item,
                        attempt,
                        lock_id = %current,
                        "token moved under held lock"
                    );
                    observed = current;
                }
                None => return Ok(TokenAdvance::Missing),
            }
        }

        let unlock = AttributeSet::new().bool(LOCKED, false);
        let written = self
            .store
            .put_attributes(item, unlock.as_slice(), Some(&fence(observed)))
            .await;
        if settle(item, observed, "unlock", written)? {
            info!(
                item = %item,
                lock_id = %observed,
                "gave up held lock after repeated token conflicts"
            );
        }
        Ok(TokenAdvance::Conflict)
    }

    /// Token currently stored on `item`. Unreadable tokens count as missing.
    async fn current_token(&self, item: &str) -> Result<Option<LockId>> {
        let attrs = self.store.get_attributes(item, &[LOCK_ID], true).await?;
        Ok(attributes::first(&attrs, LOCK_ID)
            .and_then(|v| attributes::parse_int::<u64>(v).ok())
            .map(LockId::new))
    }

    /// Unlock and extend expiry by `timeout`, if `token` is still current.
    ///
    /// Returns whether the write happened. A superseded token is not an error.
    pub async fn release(&self, item: &str, token: LockId, timeout: Duration) -> Result<bool> {
        let expires = Utc::now() + timeout;
        let unlock = AttributeSet::new()
            .bool(LOCKED, false)
            .timestamp(attributes::EXPIRES, expires);

        let fenced = self
            .store
            .put_attributes(item, unlock.as_slice(), Some(&fence(token)))
            .await;
        settle(item, token, "release", fenced)
    }

    /// Delete the record, if `token` is still current.
    pub async fn remove(&self, item: &str, token: LockId) -> Result<bool> {
        let fenced = self.store.delete_attributes(item, Some(&fence(token))).await;
        settle(item, token, "remove", fenced)
    }
}

pub(crate) fn fence(token: LockId) -> UpdateCondition {
    UpdateCondition::equals(LOCK_ID, token.to_string())
}

/// Map a fenced write result: lost races become `Ok(false)`.
pub(crate) fn settle(
    item: &str,
    token: LockId,
    op: &str,
    result: std::result::Result<(), StoreError>,
) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_conflict() || e.is_missing_target() => {
            debug!(item = %item, lock_id = %token, op, "stale token, write discarded");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
