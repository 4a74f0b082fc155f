//! In-process attribute store with the conditional semantics of the remote one.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{Attribute, AttributeStore, Item, ReplaceableAttribute, SelectQuery, UpdateCondition};
use crate::error::{StoreError, StoreResult};

/// Thread-safe in-memory [`AttributeStore`].
///
/// Every call is atomic with respect to the others, which makes it a faithful
/// stand-in for a store that offers per-item compare-and-swap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, Vec<Attribute>>>,
    /// Return attribute values in reverse write order, the way an
    /// unordered remote store is allowed to.
    reverse_reads: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose reads do not preserve write order.
    pub fn unordered() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            reverse_reads: true,
        }
    }

    /// Snapshot of an item's attributes in write order.
    pub fn item(&self, name: &str) -> Option<Vec<Attribute>> {
        self.items.lock().get(name).cloned()
    }

    /// Number of items held.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Check if the store holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn check(attributes: Option<&Vec<Attribute>>, expected: &UpdateCondition) -> StoreResult<()> {
        let current = attributes.and_then(|attrs| attrs.iter().find(|a| a.name == expected.name));

        match (&expected.value, current) {
            (Some(_), None) => Err(StoreError::AttributeDoesNotExist(expected.name.clone())),
            (Some(value), Some(attr)) if attr.value != *value => {
                Err(StoreError::ConditionalCheckFailed(expected.name.clone()))
            }
            (None, Some(_)) => Err(StoreError::ConditionalCheckFailed(expected.name.clone())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl AttributeStore for MemoryStore {
    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[ReplaceableAttribute],
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()> {
        let mut items = self.items.lock();

        if let Some(expected) = expected {
            Self::check(items.get(item), expected)?;
        }

        let stored = items.entry(item.to_string()).or_default();

        let replaced: HashSet<&str> = attributes
            .iter()
            .filter(|a| a.replace)
            .map(|a| a.name.as_str())
            .collect();
        stored.retain(|a| !replaced.contains(a.name.as_str()));

        for attr in attributes {
            let duplicate = stored
                .iter()
                .any(|a| a.name == attr.name && a.value == attr.value);
            if !duplicate {
                stored.push(Attribute::new(attr.name.clone(), attr.value.clone()));
            }
        }

        trace!(item = %item, count = attributes.len(), "put attributes");
        Ok(())
    }

    async fn get_attributes(
        &self,
        item: &str,
        names: &[&str],
        _consistent_read: bool,
    ) -> StoreResult<Vec<Attribute>> {
        let items = self.items.lock();
        let Some(stored) = items.get(item) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<Attribute> = stored
            .iter()
            .filter(|a| names.is_empty() || names.contains(&a.name.as_str()))
            .cloned()
            .collect();

        if self.reverse_reads {
            found.reverse();
        }
        Ok(found)
    }

    async fn delete_attributes(
        &self,
        item: &str,
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()> {
        let mut items = self.items.lock();

        if let Some(expected) = expected {
            Self::check(items.get(item), expected)?;
        }

        items.remove(item);
        trace!(item = %item, "deleted item");
        Ok(())
    }

    async fn select(&self, query: &SelectQuery, _consistent_read: bool) -> StoreResult<Vec<Item>> {
        let items = self.items.lock();

        Ok(items
            .iter()
            .filter(|(name, attrs)| query.matches(name, attrs))
            .map(|(name, attrs)| Item {
                name: name.clone(),
                attributes: attrs
                    .iter()
                    .filter(|a| query.output.contains(&a.name))
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
