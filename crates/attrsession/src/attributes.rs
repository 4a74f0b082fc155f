//! Mapping between typed session record fields and stored attribute strings.
//!
//! Each field has exactly one textual form so that conditional writes can
//! compare values written by any process:
//!
//! | Type | Format |
//! |---|---|
//! | timestamp | RFC 3339, UTC, microseconds (`2026-10-15T08:30:00.123456+00:00`) |
//! | integer | decimal |
//! | boolean | `true` / `false` |
//! | flags | decimal bit set |
//!
//! Timestamps in this form sort lexically in time order, which the expiry
//! sweeper relies on.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::backend::{Attribute, ReplaceableAttribute};
use crate::error::{Error, Result};

pub const CREATED: &str = "Created";
pub const EXPIRES: &str = "Expires";
pub const LOCK_DATE: &str = "LockDate";
pub const LOCK_ID: &str = "LockId";
pub const TIMEOUT: &str = "Timeout";
pub const LOCKED: &str = "Locked";
pub const FLAGS: &str = "Flags";
pub const SESSION_ITEMS: &str = "SessionItems";

/// Attributes read when loading a record.
pub const RECORD_ATTRIBUTES: [&str; 7] =
    [EXPIRES, SESSION_ITEMS, LOCK_ID, LOCK_DATE, FLAGS, TIMEOUT, LOCKED];

/// Number of single-valued fields written alongside the payload chunks.
pub const RECORD_FIELDS: usize = 7;

/// Store item name for a session: `prefix-id`, with the id trimmed.
pub fn item_name(prefix: &str, session_id: &str) -> String {
    format!("{}-{}", prefix, session_id.trim())
}

// ─────────────────────────────────────────────────────────────────────────────
// Field types
// ─────────────────────────────────────────────────────────────────────────────

/// Fencing token of a session record.
///
/// Every successful exclusive acquisition advances it by one. A holder may
/// only modify the record while its token matches the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LockId(u64);

impl LockId {
    /// Token of a freshly created record.
    pub const INITIAL: LockId = LockId(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// The token that follows this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actions the host framework has to take for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionActions(u32);

impl SessionActions {
    pub const NONE: SessionActions = SessionActions(0);

    /// The record was created uninitialized; the first exclusive read
    /// returns an empty session and clears the flag.
    pub const INITIALIZE_ITEM: SessionActions = SessionActions(1);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: SessionActions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value formatting
// ─────────────────────────────────────────────────────────────────────────────

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::malformed(format!("invalid timestamp '{}': {}", value, e)))
}

pub fn format_bool(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

pub fn parse_bool(value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(Error::malformed(format!("invalid boolean '{}'", value)))
    }
}

pub fn parse_int<T: FromStr>(value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::malformed(format!("invalid integer '{}': {}", value, e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────────────────

/// Attributes of one put request. Every value replaces what is stored.
#[derive(Debug, Clone, Default)]
pub struct AttributeSet(Vec<ReplaceableAttribute>);

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.push(ReplaceableAttribute::replacing(name, value));
        self
    }

    pub fn timestamp(self, name: &str, value: DateTime<Utc>) -> Self {
        self.text(name, format_timestamp(value))
    }

    pub fn int(self, name: &str, value: impl fmt::Display) -> Self {
        self.text(name, value.to_string())
    }

    pub fn bool(self, name: &str, value: bool) -> Self {
        self.text(name, format_bool(value))
    }

    pub fn lock_id(self, value: LockId) -> Self {
        self.int(LOCK_ID, value)
    }

    pub fn flags(self, value: SessionActions) -> Self {
        self.int(FLAGS, value.bits())
    }

    /// Add several values under the same name; together they replace the
    /// stored ones.
    pub fn values<I>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        for value in values {
            self.0.push(ReplaceableAttribute::replacing(name, value));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[ReplaceableAttribute] {
        &self.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reading
// ─────────────────────────────────────────────────────────────────────────────

/// Typed view over the attributes of a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub expires: DateTime<Utc>,
    /// `Expires` exactly as stored, for conditional deletes.
    pub raw_expires: String,
    pub lock_date: DateTime<Utc>,
    pub lock_id: LockId,
    pub actions: SessionActions,
    pub timeout_minutes: u32,
    /// Absent on records that never carried the attribute.
    pub locked: bool,
    /// Payload chunks in the order the store returned them.
    pub chunks: Vec<String>,
}

impl RecordView {
    /// Parse the attributes returned for a record.
    ///
    /// Single-valued fields take the first value returned. Any missing or
    /// unparsable required field makes the whole record malformed.
    pub fn parse(attributes: &[Attribute]) -> Result<Self> {
        let raw_expires = required(attributes, EXPIRES)?.to_string();

        Ok(Self {
            expires: parse_timestamp(&raw_expires)?,
            raw_expires,
            lock_date: parse_timestamp(required(attributes, LOCK_DATE)?)?,
            lock_id: LockId::new(parse_int(required(attributes, LOCK_ID)?)?),
            actions: SessionActions::from_bits(parse_int(required(attributes, FLAGS)?)?),
            timeout_minutes: parse_int(required(attributes, TIMEOUT)?)?,
            locked: first(attributes, LOCKED)
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false),
            chunks: attributes
                .iter()
                .filter(|a| a.name == SESSION_ITEMS)
                .map(|a| a.value.clone())
                .collect(),
        })
    }

    /// A record is dead once `now >= Expires`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }

    /// Time since the lock was last taken, never negative.
    pub fn lock_age(&self, now: DateTime<Utc>) -> Duration {
        age(self.lock_date, now)
    }
}

/// Elapsed time from `since` to `now`, clamped at zero for skewed clocks.
pub fn age(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

pub fn first<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.value.as_str())
}

fn required<'a>(attributes: &'a [Attribute], name: &str) -> Result<&'a str> {
    first(attributes, name).ok_or_else(|| Error::malformed(format!("missing attribute {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Vec<Attribute> {
        vec![
            Attribute::new(EXPIRES, "2026-10-15T09:00:00.000000+00:00"),
            Attribute::new(LOCK_DATE, "2026-10-15T08:40:00.250000+00:00"),
            Attribute::new(LOCK_ID, "7"),
            Attribute::new(FLAGS, "1"),
            Attribute::new(TIMEOUT, "20"),
            Attribute::new(LOCKED, "True"),
            Attribute::new(SESSION_ITEMS, "01def"),
            Attribute::new(SESSION_ITEMS, "00abc"),
        ]
    }

    #[test]
    fn test_item_name_trims_id() {
        assert_eq!(item_name("app", "  abc123 "), "app-abc123");
    }

    #[test]
    fn test_timestamp_format_is_stable() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 15, 8, 30, 0).unwrap();
        let text = format_timestamp(ts);
        assert_eq!(text, "2026-10-15T08:30:00.000000+00:00");
        assert_eq!(parse_timestamp(&text).unwrap(), ts);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        assert!(format_timestamp(a) < format_timestamp(b));
    }

    #[test]
    fn test_parse_timestamp_accepts_offsets() {
        let ts = parse_timestamp("2026-10-15T10:30:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 10, 15, 8, 30, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_bool_values() {
        assert_eq!(format_bool(true), "true");
        assert!(parse_bool("TRUE").unwrap());
        assert!(!parse_bool("False").unwrap());
        assert!(parse_bool("1").is_err());
    }

    #[test]
    fn test_parse_int_errors_are_malformed() {
        assert_eq!(parse_int::<u32>(" 42").unwrap(), 42);
        assert!(matches!(
            parse_int::<u32>("-1"),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_session_actions() {
        let flags = SessionActions::from_bits(1);
        assert!(flags.contains(SessionActions::INITIALIZE_ITEM));
        assert!(!SessionActions::NONE.contains(SessionActions::INITIALIZE_ITEM));
        assert!(SessionActions::NONE.is_empty());
        assert_eq!(flags.bits(), 1);
    }

    #[test]
    fn test_lock_id_next() {
        assert_eq!(LockId::INITIAL.next(), LockId::new(1));
        assert_eq!(LockId::new(u64::MAX).next(), LockId::new(u64::MAX));
        assert_eq!(LockId::new(12).to_string(), "12");
    }

    #[test]
    fn test_attribute_set_replaces_everything() {
        let set = AttributeSet::new()
            .bool(LOCKED, false)
            .lock_id(LockId::new(3))
            .flags(SessionActions::INITIALIZE_ITEM)
            .values(SESSION_ITEMS, vec!["00a".to_string(), "01b".to_string()]);

        assert_eq!(set.len(), 5);
        assert!(set.as_slice().iter().all(|a| a.replace));
        assert_eq!(set.as_slice()[1].value, "3");
        assert_eq!(set.as_slice()[2].value, "1");
    }

    #[test]
    fn test_record_view_parse() {
        let view = RecordView::parse(&sample()).unwrap();

        assert_eq!(view.lock_id, LockId::new(7));
        assert!(view.actions.contains(SessionActions::INITIALIZE_ITEM));
        assert_eq!(view.timeout_minutes, 20);
        assert!(view.locked);
        assert_eq!(view.chunks, vec!["01def", "00abc"]);
        assert_eq!(view.raw_expires, "2026-10-15T09:00:00.000000+00:00");
    }

    #[test]
    fn test_record_view_missing_locked_defaults_false() {
        let attrs: Vec<Attribute> = sample().into_iter().filter(|a| a.name != LOCKED).collect();
        assert!(!RecordView::parse(&attrs).unwrap().locked);
    }

    #[test]
    fn test_record_view_rejects_bad_fields() {
        let mut attrs = sample();
        attrs.retain(|a| a.name != TIMEOUT);
        assert!(matches!(
            RecordView::parse(&attrs),
            Err(Error::MalformedRecord(_))
        ));

        let mut attrs = sample();
        attrs[2] = Attribute::new(LOCK_ID, "seven");
        assert!(RecordView::parse(&attrs).is_err());
    }

    #[test]
    fn test_expiry_and_lock_age() {
        let view = RecordView::parse(&sample()).unwrap();
        let before = Utc.with_ymd_and_hms(2026, 10, 15, 8, 59, 59).unwrap();

        assert!(!view.is_expired(before));
        assert!(view.is_expired(view.expires));
        assert_eq!(view.lock_age(before), Duration::from_millis(19 * 60_000 + 59_750));

        let skewed = Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap();
        assert_eq!(view.lock_age(skewed), Duration::ZERO);
    }
}
