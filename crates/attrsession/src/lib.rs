//! Session state records on a key-attribute store with conditional writes.
//!
//! The store this crate targets (Amazon SimpleDB and anything shaped like
//! it) has no transactions, only puts and deletes conditioned on the current
//! value of one attribute. On top of that primitive this crate provides:
//! - Per-session exclusive locks, with stealing of abandoned locks
//! - A fencing token (`LockId`) that makes writes from a superseded holder
//!   harmless no-ops
//! - Payload encoding into ordered, size-bounded attribute values
//! - Expiry handling on read and an optional background sweeper
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use attrsession::{MemoryStore, SessionItem, SessionRecordStore, StoreOptions};
//!
//! let store = SessionRecordStore::new(Arc::new(MemoryStore::new()), StoreOptions::new())?;
//!
//! store.set_and_release("abc", &SessionItem::with_data(b"cart=3".to_vec(), 20), Default::default(), true).await?;
//!
//! let lookup = store.get("abc", true).await?;
//! let token = lookup.lock_id.unwrap();
//! store.set_and_release("abc", &SessionItem::with_data(b"cart=4".to_vec(), 20), token, false).await?;
//! ```

pub mod attributes;
pub mod backend;
pub mod codec;
mod config;
mod contract;
mod error;
mod lock;
mod store;
mod sweeper;

pub use attributes::{LockId, RecordView, SessionActions};
pub use backend::{
    Attribute, AttributeStore, Item, MemoryStore, ReplaceableAttribute, SelectQuery, SimpleDbStore,
    SimpleDbStoreBuilder, UpdateCondition,
};
pub use codec::PayloadCodec;
pub use config::{
    DEFAULT_MAX_VALUE_BYTES, DEFAULT_PREFIX, DEFAULT_SESSION_TIMEOUT, DEFAULT_SWEEP_INTERVAL,
    StoreOptions,
};
pub use contract::SessionStateStore;
pub use error::{Error, Result, StoreError, StoreResult};
pub use lock::{DEFAULT_MAX_LOCK_AGE, LockManager, LockOutcome, TokenAdvance};
pub use store::{Lookup, SessionItem, SessionRecordStore};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperHandle};
