//! End-to-end tests of the session record protocol against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use attrsession::attributes::{
    EXPIRES, FLAGS, LOCK_DATE, LOCK_ID, LOCKED, RECORD_ATTRIBUTES, SESSION_ITEMS,
};
use attrsession::{
    Attribute, AttributeStore, Item, LockId, MemoryStore, ReplaceableAttribute, SelectQuery,
    SessionActions, SessionItem, SessionRecordStore, SessionStateStore, StoreOptions, StoreResult,
    UpdateCondition,
};

const PREFIX: &str = "app";

fn options() -> StoreOptions {
    StoreOptions::new()
        .with_prefix(PREFIX)
        .with_session_timeout(Duration::from_secs(20 * 60))
}

fn setup(options: StoreOptions) -> (Arc<MemoryStore>, SessionRecordStore<MemoryStore>) {
    let backend = Arc::new(MemoryStore::new());
    let store = SessionRecordStore::new(Arc::clone(&backend), options).expect("valid options");
    (backend, store)
}

fn value(backend: &MemoryStore, session_id: &str, name: &str) -> Option<String> {
    backend
        .item(&format!("{}-{}", PREFIX, session_id))?
        .into_iter()
        .find(|a| a.name == name)
        .map(|a| a.value)
}

fn chunk_count(backend: &MemoryStore, session_id: &str) -> usize {
    backend
        .item(&format!("{}-{}", PREFIX, session_id))
        .map(|attrs| attrs.iter().filter(|a| a.name == SESSION_ITEMS).count())
        .unwrap_or(0)
}

/// Backend that lets a test act between the store calls of one operation.
struct Interleaving {
    inner: MemoryStore,
    /// Move the token once, right after the next full record read.
    move_after_read: AtomicBool,
    /// Holds the first two lock metadata reads until both have happened.
    steal_gate: Option<Barrier>,
    gated: AtomicUsize,
}

impl Interleaving {
    fn new(steal_gate: Option<Barrier>) -> Self {
        Self {
            inner: MemoryStore::new(),
            move_after_read: AtomicBool::new(false),
            steal_gate,
            gated: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AttributeStore for Interleaving {
    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[ReplaceableAttribute],
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()> {
        self.inner.put_attributes(item, attributes, expected).await
    }

    async fn get_attributes(
        &self,
        item: &str,
        names: &[&str],
        consistent_read: bool,
    ) -> StoreResult<Vec<Attribute>> {
        let attrs = self.inner.get_attributes(item, names, consistent_read).await?;

        if names == RECORD_ATTRIBUTES && self.move_after_read.swap(false, Ordering::SeqCst) {
            move_token(&self.inner, item).await;
        }
        if names == [LOCK_DATE, LOCK_ID] {
            if let Some(gate) = &self.steal_gate {
                if self.gated.fetch_add(1, Ordering::SeqCst) < 2 {
                    gate.wait().await;
                }
            }
        }
        Ok(attrs)
    }

    async fn delete_attributes(
        &self,
        item: &str,
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()> {
        self.inner.delete_attributes(item, expected).await
    }

    async fn select(&self, query: &SelectQuery, consistent_read: bool) -> StoreResult<Vec<Item>> {
        self.inner.select(query, consistent_read).await
    }

    fn name(&self) -> &str {
        "interleaving"
    }
}

/// Advance the token the way a shared read of an unlocked record does.
async fn move_token(backend: &MemoryStore, item: &str) {
    let current: u64 = backend
        .item(item)
        .and_then(|attrs| attrs.into_iter().find(|a| a.name == LOCK_ID))
        .map(|a| a.value.parse().unwrap())
        .unwrap();
    backend
        .put_attributes(
            item,
            &[
                ReplaceableAttribute::replacing(LOCK_ID, (current + 1).to_string()),
                ReplaceableAttribute::replacing(FLAGS, "0"),
            ],
            Some(&UpdateCondition::equals(LOCK_ID, current.to_string())),
        )
        .await
        .unwrap();
}

fn setup_interleaving(
    options: StoreOptions,
    steal_gate: Option<Barrier>,
) -> (Arc<Interleaving>, SessionRecordStore<Interleaving>) {
    let backend = Arc::new(Interleaving::new(steal_gate));
    let store = SessionRecordStore::new(Arc::clone(&backend), options).expect("valid options");
    (backend, store)
}

#[tokio::test]
async fn test_uninitialized_session_lifecycle() {
    let (_, store) = setup(options());

    store.create_uninitialized_record("S", 20).await.unwrap();

    let lookup = store.get_record_exclusive("S").await.unwrap();
    let item = lookup.item.expect("session should be found");
    assert!(item.data.is_empty());
    assert_eq!(item.timeout_minutes, 20);
    assert!(lookup.actions.contains(SessionActions::INITIALIZE_ITEM));
    assert!(!lookup.locked);
    let token = lookup.lock_id.expect("caller gets a token");

    let saved = SessionItem::with_data(b"abc".to_vec(), 20);
    store
        .set_and_release_lock("S", &saved, token, false)
        .await
        .unwrap();

    let lookup = store.get_record("S").await.unwrap();
    assert_eq!(lookup.item.map(|i| i.data), Some(b"abc".to_vec()));
    assert!(lookup.actions.is_empty());
}

#[tokio::test]
async fn test_busy_until_released() {
    let (_, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"x".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    let first = store.get_record_exclusive("S").await.unwrap();
    let t1 = first.lock_id.expect("first caller holds the lock");
    assert!(first.is_found());

    let second = store.get_record_exclusive("S").await.unwrap();
    assert!(second.locked);
    assert!(second.item.is_none());
    assert_eq!(second.lock_id, Some(t1));
    assert!(second.lock_age < Duration::from_secs(5));

    store.release_lock("S", t1).await.unwrap();

    let retry = store.get_record_exclusive("S").await.unwrap();
    assert!(retry.is_found());
    assert_eq!(retry.lock_id, Some(t1.next()));
}

#[tokio::test]
async fn test_concurrent_acquires_on_held_lock_are_all_busy() {
    let (_, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::new(20), LockId::INITIAL, true)
        .await
        .unwrap();
    let holder = store.get_record_exclusive("S").await.unwrap();
    assert!(holder.is_found());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move { store.get_record_exclusive("S").await }));
    }

    for task in tasks {
        let lookup = task.await.unwrap().unwrap();
        assert!(lookup.locked);
        assert!(lookup.item.is_none());
    }
}

#[tokio::test]
async fn test_concurrent_acquires_on_free_lock_have_one_winner() {
    let (_, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::new(20), LockId::INITIAL, true)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move { store.get_record_exclusive("S").await }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_found() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_lock_id_increases_every_cycle() {
    let (_, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::new(20), LockId::INITIAL, true)
        .await
        .unwrap();

    let mut previous = LockId::INITIAL;
    for round in 0..5u8 {
        let lookup = store.get_record_exclusive("S").await.unwrap();
        let token = lookup.lock_id.unwrap();
        assert!(token > previous);

        let item = SessionItem::with_data(vec![round], 20);
        store
            .set_and_release_lock("S", &item, token, false)
            .await
            .unwrap();
        previous = token;
    }

    let lookup = store.get_record("S").await.unwrap();
    assert_eq!(lookup.item.unwrap().data, vec![4]);
}

#[tokio::test]
async fn test_stale_token_writes_change_nothing() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"v1".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    let lookup = store.get_record_exclusive("S").await.unwrap();
    let token = lookup.lock_id.unwrap();
    let stale = LockId::new(token.get() - 1);

    let expires = value(&backend, "S", EXPIRES);
    let lock_id = value(&backend, "S", LOCK_ID);

    store.release_lock("S", stale).await.unwrap();
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"v2".to_vec(), 20), stale, false)
        .await
        .unwrap();
    store.remove_record("S", stale).await.unwrap();

    assert_eq!(value(&backend, "S", EXPIRES), expires);
    assert_eq!(value(&backend, "S", LOCK_ID), lock_id);
    assert_eq!(value(&backend, "S", LOCKED).as_deref(), Some("true"));

    store.release_lock("S", token).await.unwrap();
    let lookup = store.get_record("S").await.unwrap();
    assert_eq!(lookup.item.unwrap().data, b"v1");
}

#[tokio::test]
async fn test_release_renews_expiry() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::new(1), LockId::INITIAL, true)
        .await
        .unwrap();
    let before = value(&backend, "S", EXPIRES).unwrap();

    let token = store.get_record_exclusive("S").await.unwrap().lock_id.unwrap();
    store.release_lock("S", token).await.unwrap();

    let after = value(&backend, "S", EXPIRES).unwrap();
    assert!(after > before);
    assert_eq!(value(&backend, "S", LOCKED).as_deref(), Some("false"));
}

#[tokio::test]
async fn test_stolen_lock_fences_out_previous_holder() {
    let (_, store) = setup(options().with_max_lock_age(Duration::ZERO));
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"v1".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    let first = store.get_record_exclusive("S").await.unwrap();
    let t1 = first.lock_id.unwrap();

    let thief = store.get_record_exclusive("S").await.unwrap();
    let t2 = thief.lock_id.expect("abandoned lock is stolen");
    // One step for taking the lock over, one for the read
    assert_eq!(t2, t1.next().next());

    store
        .set_and_release_lock("S", &SessionItem::with_data(b"late".to_vec(), 20), t1, false)
        .await
        .unwrap();
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"v2".to_vec(), 20), t2, false)
        .await
        .unwrap();

    let lookup = store.get_record("S").await.unwrap();
    assert_eq!(lookup.item.unwrap().data, b"v2");
}

#[tokio::test]
async fn test_shared_read_of_locked_session_is_busy() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"x".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    let holder = store.get_record_exclusive("S").await.unwrap();
    let lock_id = value(&backend, "S", LOCK_ID);

    let reader = store.get_record("S").await.unwrap();
    assert!(reader.locked);
    assert!(reader.item.is_none());
    assert_eq!(reader.lock_id, holder.lock_id);
    assert_eq!(value(&backend, "S", LOCK_ID), lock_id);
}

#[tokio::test]
async fn test_expired_session_is_absent_and_recreated() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"old".to_vec(), 0), LockId::INITIAL, true)
        .await
        .unwrap();

    assert!(!store.get_record("S").await.unwrap().is_found());
    let exclusive = store.get_record_exclusive("S").await.unwrap();
    assert!(!exclusive.is_found());
    assert!(!exclusive.locked);
    assert_eq!(backend.len(), 1);

    store
        .set_and_release_lock("S", &SessionItem::with_data(b"new".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    let lookup = store.get_record("S").await.unwrap();
    assert_eq!(lookup.item.unwrap().data, b"new");
    assert_eq!(lookup.lock_id, Some(LockId::new(1)));
}

#[tokio::test]
async fn test_expired_session_deleted_on_read_when_enabled() {
    let (backend, store) = setup(options().with_delete_expired_on_read(true));
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"old".to_vec(), 0), LockId::INITIAL, true)
        .await
        .unwrap();

    assert!(!store.get_record("S").await.unwrap().is_found());
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_large_payload_round_trips_through_chunks() {
    let backend = Arc::new(MemoryStore::unordered());
    let store =
        SessionRecordStore::new(Arc::clone(&backend), options().with_max_value_bytes(64)).unwrap();

    let payload: Vec<u8> = (0..3000u32).map(|i| (i * 31 % 251) as u8).collect();
    store
        .set_and_release_lock("S", &SessionItem::with_data(payload.clone(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    assert!(chunk_count(&backend, "S") > 1);

    let lookup = store.get_record_exclusive("S").await.unwrap();
    assert_eq!(lookup.item.unwrap().data, payload);

    let smaller = vec![9u8; 10];
    store
        .set_and_release_lock("S", &SessionItem::with_data(smaller.clone(), 20), lookup.lock_id.unwrap(), false)
        .await
        .unwrap();
    assert_eq!(chunk_count(&backend, "S"), 1);
    assert_eq!(store.get_record("S").await.unwrap().item.unwrap().data, smaller);
}

#[tokio::test]
async fn test_compressed_payload_round_trip() {
    let (backend, store) = setup(options().with_compression(true).with_max_value_bytes(64));
    let payload = "user=alice;cart=widget,widget,widget;".repeat(100).into_bytes();

    store
        .set_and_release_lock("S", &SessionItem::with_data(payload.clone(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    assert!(chunk_count(&backend, "S") < payload.len() / 62);
    assert_eq!(store.get_record("S").await.unwrap().item.unwrap().data, payload);
}

#[tokio::test]
async fn test_remove_with_current_token() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::new(20), LockId::INITIAL, true)
        .await
        .unwrap();

    let token = store.get_record_exclusive("S").await.unwrap().lock_id.unwrap();
    store.remove_record("S", token).await.unwrap();

    assert!(backend.is_empty());
    assert!(!store.get_record_exclusive("S").await.unwrap().is_found());
}

#[tokio::test]
async fn test_malformed_records_are_absent() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::new(20), LockId::INITIAL, true)
        .await
        .unwrap();
    backend
        .put_attributes(
            "app-S",
            &[ReplaceableAttribute::replacing(LOCK_ID, "not-a-number")],
            None,
        )
        .await
        .unwrap();

    let lookup = store.get_record("S").await.unwrap();
    assert!(!lookup.is_found());
    assert!(!lookup.locked);

    backend
        .put_attributes(
            "app-T",
            &[ReplaceableAttribute::replacing(SESSION_ITEMS, "00")],
            None,
        )
        .await
        .unwrap();
    assert!(!store.get_record("T").await.unwrap().is_found());
}

#[tokio::test]
async fn test_corrupt_payload_is_absent() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"abc".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();
    backend
        .put_attributes(
            "app-S",
            &[
                ReplaceableAttribute::replacing(SESSION_ITEMS, "00YWJj"),
                ReplaceableAttribute::replacing(SESSION_ITEMS, "02ZGVm"),
            ],
            None,
        )
        .await
        .unwrap();

    let lookup = store.get_record("S").await.unwrap();
    assert!(!lookup.is_found());
    assert!(!lookup.locked);
}

#[tokio::test]
async fn test_missing_session_is_absent() {
    let (backend, store) = setup(options());

    assert!(!store.get_record("nope").await.unwrap().is_found());
    let lookup = store.get_record_exclusive("nope").await.unwrap();
    assert!(!lookup.is_found());
    assert!(!lookup.locked);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_new_record_is_in_memory_only() {
    let (backend, store) = setup(options());

    let item = store.create_new_record(15);
    assert_eq!(item, SessionItem::new(15));
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_reset_timeout_through_contract() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("S", &SessionItem::new(5), LockId::INITIAL, true)
        .await
        .unwrap();
    let expires = value(&backend, "S", EXPIRES);

    SessionStateStore::reset_timeout(&store, "S").await.unwrap();

    assert_eq!(value(&backend, "S", "Timeout").as_deref(), Some("20"));
    assert_eq!(value(&backend, "S", EXPIRES), expires);
}

#[tokio::test]
async fn test_sweeper_removes_expired_sessions() {
    let (backend, store) = setup(options());
    store
        .set_and_release_lock("old", &SessionItem::new(0), LockId::INITIAL, true)
        .await
        .unwrap();
    store
        .set_and_release_lock("live", &SessionItem::new(20), LockId::INITIAL, true)
        .await
        .unwrap();

    let report = store.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(backend.len(), 1);
    assert!(store.get_record("live").await.unwrap().is_found());
}

#[tokio::test]
async fn test_exclusive_read_survives_shared_read_moving_token() {
    let (backend, store) = setup_interleaving(options(), None);
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"v1".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();
    let before: u64 = value(&backend.inner, "S", LOCK_ID).unwrap().parse().unwrap();

    // A shared reader saw the record unlocked and bumps right after our read
    backend.move_after_read.store(true, Ordering::SeqCst);
    let lookup = store.get_record_exclusive("S").await.unwrap();

    assert_eq!(lookup.item.map(|i| i.data), Some(b"v1".to_vec()));
    let token = lookup.lock_id.expect("holder keeps its lock");
    assert_eq!(token, LockId::new(before + 2));
    assert_eq!(value(&backend.inner, "S", LOCKED).as_deref(), Some("true"));

    store.release_lock("S", token).await.unwrap();
    assert_eq!(value(&backend.inner, "S", LOCKED).as_deref(), Some("false"));
    assert!(store.get_record_exclusive("S").await.unwrap().is_found());
}

#[tokio::test]
async fn test_shared_read_losing_token_race_is_busy() {
    let (backend, store) = setup_interleaving(options(), None);
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"v1".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    backend.move_after_read.store(true, Ordering::SeqCst);
    let lookup = store.get_record("S").await.unwrap();

    assert!(lookup.is_busy());
    assert!(lookup.item.is_none());
    assert_eq!(value(&backend.inner, "S", LOCKED).as_deref(), Some("false"));
    assert!(store.get_record_exclusive("S").await.unwrap().is_found());
}

#[tokio::test]
async fn test_concurrent_steals_have_one_winner() {
    let (backend, store) = setup_interleaving(
        options().with_max_lock_age(Duration::ZERO),
        Some(Barrier::new(2)),
    );
    store
        .set_and_release_lock("S", &SessionItem::with_data(b"v1".to_vec(), 20), LockId::INITIAL, true)
        .await
        .unwrap();

    let abandoned = store.get_record_exclusive("S").await.unwrap();
    let t1 = abandoned.lock_id.unwrap();

    // Both callers read the same stale token before either writes
    let (a, b) = tokio::join!(
        store.get_record_exclusive("S"),
        store.get_record_exclusive("S")
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(
        [a.is_found(), b.is_found()].iter().filter(|f| **f).count(),
        1
    );
    assert!(a.is_busy() != b.is_busy());

    let winner = if a.is_found() { a } else { b };
    let token = winner.lock_id.unwrap();
    assert_eq!(token, t1.next().next());
    assert_eq!(
        value(&backend.inner, "S", LOCK_ID),
        Some(token.to_string())
    );

    store
        .set_and_release_lock("S", &SessionItem::with_data(b"v2".to_vec(), 20), token, false)
        .await
        .unwrap();
    let lookup = store.get_record("S").await.unwrap();
    assert_eq!(lookup.item.unwrap().data, b"v2");
}

#[tokio::test]
async fn test_reset_timeout_on_missing_session_creates_nothing() {
    let (backend, store) = setup(options());

    SessionStateStore::reset_timeout(&store, "S").await.unwrap();

    assert!(backend.is_empty());
}
