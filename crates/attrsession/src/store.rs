//! Session record store: the lock protocol applied to whole session records.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::attributes::{
    self, AttributeSet, CREATED, EXPIRES, LOCK_DATE, LOCKED, LockId, RECORD_ATTRIBUTES,
    RecordView, SESSION_ITEMS, SessionActions, TIMEOUT,
};
use crate::backend::{Attribute, AttributeStore, UpdateCondition};
use crate::codec::PayloadCodec;
use crate::config::StoreOptions;
use crate::contract::SessionStateStore;
use crate::error::Result;
use crate::lock::{self, LockManager, LockOutcome, TokenAdvance};
use crate::sweeper::ExpirySweeper;

/// A session as handed to and from the host framework.
///
/// The payload is opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionItem {
    pub data: Vec<u8>,
    pub timeout_minutes: u32,
}

impl SessionItem {
    /// An empty session.
    pub fn new(timeout_minutes: u32) -> Self {
        Self {
            data: Vec::new(),
            timeout_minutes,
        }
    }

    pub fn with_data(data: impl Into<Vec<u8>>, timeout_minutes: u32) -> Self {
        Self {
            data: data.into(),
            timeout_minutes,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }
}

/// Outcome of a record read, in the shape the host framework expects.
///
/// | `item` | `locked` | meaning |
/// |---|---|---|
/// | `Some` | `false` | found; `lock_id` is the caller's token |
/// | `None` | `true` | busy; retry later |
/// | `None` | `false` | absent; create a new session |
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lookup {
    pub item: Option<SessionItem>,
    pub locked: bool,
    pub lock_age: Duration,
    pub lock_id: Option<LockId>,
    pub actions: SessionActions,
}

impl Lookup {
    fn absent() -> Self {
        Self::default()
    }

    fn busy(lock_age: Duration, lock_id: Option<LockId>) -> Self {
        Self {
            locked: true,
            lock_age,
            lock_id,
            ..Self::default()
        }
    }

    pub fn is_found(&self) -> bool {
        self.item.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.locked
    }
}

/// Session records held in an [`AttributeStore`].
///
/// Holds no mutable state of its own; every coordination decision is made
/// by a conditional write against the store.
pub struct SessionRecordStore<S> {
    store: Arc<S>,
    options: StoreOptions,
    codec: PayloadCodec,
    locks: LockManager<S>,
}

impl<S> Clone for SessionRecordStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            options: self.options.clone(),
            codec: self.codec,
            locks: self.locks.clone(),
        }
    }
}

impl<S: AttributeStore> SessionRecordStore<S> {
    /// Create a record store over `store`. Fails if the options are invalid.
    pub fn new(store: Arc<S>, options: StoreOptions) -> Result<Self> {
        options.validate()?;

        let codec = PayloadCodec::new(options.compress, options.max_value_bytes);
        let locks = LockManager::new(Arc::clone(&store)).with_max_lock_age(options.max_lock_age);

        debug!(
            backend = store.name(),
            prefix = %options.prefix,
            compress = options.compress,
            "session record store created"
        );

        Ok(Self {
            store,
            options,
            codec,
            locks,
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<S> {
        &self.store
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.codec
    }

    /// Store item name of a session.
    pub fn item_name(&self, session_id: &str) -> String {
        attributes::item_name(&self.options.prefix, session_id)
    }

    /// Expiry sweeper over the same store and prefix.
    pub fn sweeper(&self) -> ExpirySweeper<S> {
        ExpirySweeper::new(Arc::clone(&self.store), self.options.prefix.clone())
    }

    /// Raw record attributes, as a consistent read returns them.
    pub async fn read_attributes(&self, session_id: &str) -> Result<Vec<Attribute>> {
        let item = self.item_name(session_id);
        Ok(self
            .store
            .get_attributes(&item, &RECORD_ATTRIBUTES, true)
            .await?)
    }

    /// Read a session, taking its lock first when `exclusive`.
    ///
    /// Contention, missing records, expired records and malformed data are
    /// reported through the returned [`Lookup`]; only store failures are
    /// errors.
    pub async fn get(&self, session_id: &str, exclusive: bool) -> Result<Lookup> {
        let item = self.item_name(session_id);

        if exclusive {
            match self.locks.try_acquire(&item).await? {
                LockOutcome::Acquired { .. } => {}
                LockOutcome::Busy { lock_age, lock_id } => {
                    return Ok(Lookup::busy(lock_age, lock_id));
                }
                LockOutcome::NotFound => return Ok(Lookup::absent()),
            }
        }

        let attrs = self
            .store
            .get_attributes(&item, &RECORD_ATTRIBUTES, true)
            .await?;
        if attrs.len() < 2 {
            debug!(session_id = %session_id, count = attrs.len(), "no usable record");
            return Ok(Lookup::absent());
        }

        let view = match RecordView::parse(&attrs) {
            Ok(view) => view,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "ignoring malformed session record");
                return Ok(Lookup::absent());
            }
        };

        let now = Utc::now();
        if view.is_expired(now) {
            debug!(session_id = %session_id, expires = %view.raw_expires, "session expired");
            if self.options.delete_expired_on_read {
                self.delete_expired(&item, &view.raw_expires).await;
            }
            return Ok(Lookup::absent());
        }

        let lock_age = view.lock_age(now);
        if !exclusive && view.locked {
            return Ok(Lookup::busy(lock_age, Some(view.lock_id)));
        }

        let session = if view.actions.contains(SessionActions::INITIALIZE_ITEM) {
            SessionItem::new(self.options.timeout_minutes())
        } else {
            match self.codec.decode(&view.chunks) {
                Ok(data) => SessionItem::with_data(data, view.timeout_minutes),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "ignoring undecodable session payload");
                    return Ok(Lookup::absent());
                }
            }
        };

        let advanced = if exclusive {
            self.locks.advance_held(&item, view.lock_id).await?
        } else {
            self.locks.advance_token(&item, view.lock_id).await?
        };

        match advanced {
            TokenAdvance::Advanced(token) => {
                debug!(
                    session_id = %session_id,
                    lock_id = %token,
                    exclusive,
                    bytes = session.data.len(),
                    "session loaded"
                );
                Ok(Lookup {
                    item: Some(session),
                    locked: false,
                    lock_age,
                    lock_id: Some(token),
                    actions: view.actions,
                })
            }
            TokenAdvance::Conflict => {
                debug!(session_id = %session_id, "token moved during read");
                Ok(Lookup::busy(Duration::ZERO, None))
            }
            TokenAdvance::Missing => Ok(Lookup::absent()),
        }
    }

    /// Write an empty record whose first read yields a fresh session.
    ///
    /// Overwrites any existing record.
    pub async fn create_uninitialized(&self, session_id: &str, timeout_minutes: u32) -> Result<()> {
        let item = self.item_name(session_id);
        let chunks = self.codec.encode(&[])?;
        let attrs = fresh_record(
            Utc::now(),
            timeout_minutes,
            SessionActions::INITIALIZE_ITEM,
            chunks,
        );

        self.store
            .put_attributes(&item, attrs.as_slice(), None)
            .await?;
        debug!(session_id = %session_id, timeout_minutes, "created uninitialized session");
        Ok(())
    }

    /// Save a session and release its lock.
    ///
    /// New sessions are written unconditionally. Existing sessions are only
    /// written while `token` is current; a superseded token discards the
    /// write and returns `Ok(false)`.
    pub async fn set_and_release(
        &self,
        session_id: &str,
        session: &SessionItem,
        token: LockId,
        is_new: bool,
    ) -> Result<bool> {
        let item = self.item_name(session_id);
        let chunks = self.codec.encode(&session.data)?;
        let now = Utc::now();

        if is_new {
            let attrs = fresh_record(now, session.timeout_minutes, SessionActions::NONE, chunks);
            self.store
                .put_attributes(&item, attrs.as_slice(), None)
                .await?;
            debug!(session_id = %session_id, bytes = session.data.len(), "saved new session");
            return Ok(true);
        }

        let attrs = AttributeSet::new()
            .timestamp(EXPIRES, now + session.timeout())
            .int(TIMEOUT, session.timeout_minutes)
            .bool(LOCKED, false)
            .values(SESSION_ITEMS, chunks);

        let written = self
            .store
            .put_attributes(&item, attrs.as_slice(), Some(&lock::fence(token)))
            .await;
        let saved = lock::settle(&item, token, "save", written)?;
        if saved {
            debug!(session_id = %session_id, lock_id = %token, bytes = session.data.len(), "saved session");
        }
        Ok(saved)
    }

    /// Release the lock and extend expiry by the configured timeout.
    pub async fn release(&self, session_id: &str, token: LockId) -> Result<bool> {
        let item = self.item_name(session_id);
        self.locks
            .release(&item, token, self.options.session_timeout)
            .await
    }

    /// Delete the record while `token` is current.
    pub async fn remove(&self, session_id: &str, token: LockId) -> Result<bool> {
        let item = self.item_name(session_id);
        let removed = self.locks.remove(&item, token).await?;
        if removed {
            info!(session_id = %session_id, lock_id = %token, "session removed");
        }
        Ok(removed)
    }

    /// Refresh the declared timeout. Expiry is only extended on release.
    ///
    /// Only touches an existing record; a missing session stays missing.
    pub async fn reset_timeout(&self, session_id: &str) -> Result<()> {
        let item = self.item_name(session_id);
        let attrs = AttributeSet::new().int(TIMEOUT, self.options.timeout_minutes());

        for _ in 0..2 {
            let current = self.store.get_attributes(&item, &[EXPIRES], true).await?;
            let Some(expires) = attributes::first(&current, EXPIRES) else {
                debug!(session_id = %session_id, "no session to reset timeout on");
                return Ok(());
            };

            let exists = UpdateCondition::equals(EXPIRES, expires);
            match self
                .store
                .put_attributes(&item, attrs.as_slice(), Some(&exists))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_missing_target() => return Ok(()),
                Err(e) if e.is_conflict() => {
                    debug!(session_id = %session_id, "expiry moved during timeout reset");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Best-effort delete of a record seen expired. A renewal in between wins.
    async fn delete_expired(&self, item: &str, raw_expires: &str) {
        let unchanged = UpdateCondition::equals(EXPIRES, raw_expires);
        match self.store.delete_attributes(item, Some(&unchanged)).await {
            Ok(()) => debug!(item = %item, "deleted expired record"),
            Err(e) if e.is_conflict() || e.is_missing_target() => {}
            Err(e) => warn!(item = %item, error = %e, "failed to delete expired record"),
        }
    }
}

/// Every attribute of a record, for unconditional writes.
fn fresh_record(
    now: DateTime<Utc>,
    timeout_minutes: u32,
    actions: SessionActions,
    chunks: Vec<String>,
) -> AttributeSet {
    let timeout = chrono::Duration::minutes(i64::from(timeout_minutes));
    AttributeSet::new()
        .timestamp(CREATED, now)
        .timestamp(EXPIRES, now + timeout)
        .timestamp(LOCK_DATE, now)
        .lock_id(LockId::INITIAL)
        .int(TIMEOUT, timeout_minutes)
        .bool(LOCKED, false)
        .flags(actions)
        .values(SESSION_ITEMS, chunks)
}

#[async_trait]
impl<S: AttributeStore> SessionStateStore for SessionRecordStore<S> {
    fn create_new_record(&self, timeout_minutes: u32) -> SessionItem {
        SessionItem::new(timeout_minutes)
    }

    async fn create_uninitialized_record(&self, session_id: &str, timeout_minutes: u32) -> Result<()> {
        self.create_uninitialized(session_id, timeout_minutes).await
    }

    async fn get_record(&self, session_id: &str) -> Result<Lookup> {
        self.get(session_id, false).await
    }

    async fn get_record_exclusive(&self, session_id: &str) -> Result<Lookup> {
        self.get(session_id, true).await
    }

    async fn release_lock(&self, session_id: &str, lock_id: LockId) -> Result<()> {
        self.release(session_id, lock_id).await.map(|_| ())
    }

    async fn remove_record(&self, session_id: &str, lock_id: LockId) -> Result<()> {
        self.remove(session_id, lock_id).await.map(|_| ())
    }

    async fn reset_timeout(&self, session_id: &str) -> Result<()> {
        SessionRecordStore::reset_timeout(self, session_id).await
    }

    async fn set_and_release_lock(
        &self,
        session_id: &str,
        item: &SessionItem,
        lock_id: LockId,
        is_new: bool,
    ) -> Result<()> {
        self.set_and_release(session_id, item, lock_id, is_new)
            .await
            .map(|_| ())
    }
}
