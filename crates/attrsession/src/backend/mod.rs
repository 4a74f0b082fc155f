//! Remote key-attribute store abstraction.
//!
//! The session protocol needs very little from its store: named items that
//! hold multiple, possibly repeated, string attributes, plus put and delete
//! operations that can be made conditional on the current value of a
//! single attribute. [`AttributeStore`] captures exactly that contract so the
//! record store can run against SimpleDB ([`SimpleDbStore`]) or an
//! in-process implementation ([`MemoryStore`]) used by tests.

mod memory;
mod signing;
mod simpledb;
mod xml;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;

pub use memory::MemoryStore;
pub use simpledb::{DEFAULT_ENDPOINT, SimpleDbStore, SimpleDbStoreBuilder};

/// A single attribute value as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An attribute value in a put request.
///
/// When `replace` is set, all existing values of the attribute are dropped
/// before the values of the request are added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceableAttribute {
    pub name: String,
    pub value: String,
    pub replace: bool,
}

impl ReplaceableAttribute {
    /// Attribute that replaces every existing value of the same name.
    pub fn replacing(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            replace: true,
        }
    }
}

/// Precondition for a conditional put or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCondition {
    /// Attribute the condition is evaluated against.
    pub name: String,
    /// Expected value. `None` expects the attribute to be absent.
    pub value: Option<String>,
}

impl UpdateCondition {
    /// Expect `name` to currently hold exactly `value`.
    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Expect `name` to not exist.
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// An item returned by [`AttributeStore::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub name: String,
    pub attributes: Vec<Attribute>,
}

impl Item {
    /// First value of the named attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

/// Range query over items sharing a name prefix.
///
/// Matches items whose name starts with `item_prefix` and that have at least
/// one value of `attribute` sorting lexically before `less_than`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub item_prefix: String,
    pub attribute: String,
    pub less_than: String,
    /// Attributes to return with each item. Empty returns names only.
    pub output: Vec<String>,
}

impl SelectQuery {
    pub fn new(
        item_prefix: impl Into<String>,
        attribute: impl Into<String>,
        less_than: impl Into<String>,
    ) -> Self {
        Self {
            item_prefix: item_prefix.into(),
            attribute: attribute.into(),
            less_than: less_than.into(),
            output: Vec::new(),
        }
    }

    /// Return these attributes alongside each matching item name.
    pub fn with_output(mut self, names: &[&str]) -> Self {
        self.output = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Render as a SimpleDB select expression against `domain`.
    pub fn to_expression(&self, domain: &str) -> String {
        let output = if self.output.is_empty() {
            "itemName()".to_string()
        } else {
            self.output
                .iter()
                .map(|n| quote_name(n))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "select {} from {} where itemName() like {} and {} < {}",
            output,
            quote_name(domain),
            quote_value(&format!("{}%", self.item_prefix)),
            quote_name(&self.attribute),
            quote_value(&self.less_than),
        )
    }

    /// Evaluate the query against an item held in memory.
    pub fn matches(&self, item_name: &str, attributes: &[Attribute]) -> bool {
        item_name.starts_with(&self.item_prefix)
            && attributes
                .iter()
                .any(|a| a.name == self.attribute && a.value < self.less_than)
    }
}

fn quote_name(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Contract of the remote key-attribute store.
///
/// Unconditional operations always succeed eventually. Conditional
/// operations fail with [`StoreError::ConditionalCheckFailed`] when the
/// expected value does not match and with
/// [`StoreError::AttributeDoesNotExist`] when the expected attribute is
/// missing (including when the item itself is missing).
///
/// [`StoreError::ConditionalCheckFailed`]: crate::StoreError::ConditionalCheckFailed
/// [`StoreError::AttributeDoesNotExist`]: crate::StoreError::AttributeDoesNotExist
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Write attributes to an item, creating it if necessary.
    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[ReplaceableAttribute],
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()>;

    /// Read the named attributes of an item. Missing items yield no attributes.
    async fn get_attributes(
        &self,
        item: &str,
        names: &[&str],
        consistent_read: bool,
    ) -> StoreResult<Vec<Attribute>>;

    /// Delete an item with all of its attributes.
    async fn delete_attributes(
        &self,
        item: &str,
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()>;

    /// Find items matching a range query.
    async fn select(&self, query: &SelectQuery, consistent_read: bool) -> StoreResult<Vec<Item>>;

    /// Short name for logging.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: AttributeStore + ?Sized> AttributeStore for Arc<T> {
    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[ReplaceableAttribute],
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()> {
        (**self).put_attributes(item, attributes, expected).await
    }

    async fn get_attributes(
        &self,
        item: &str,
        names: &[&str],
        consistent_read: bool,
    ) -> StoreResult<Vec<Attribute>> {
        (**self).get_attributes(item, names, consistent_read).await
    }

    async fn delete_attributes(
        &self,
        item: &str,
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()> {
        (**self).delete_attributes(item, expected).await
    }

    async fn select(&self, query: &SelectQuery, consistent_read: bool) -> StoreResult<Vec<Item>> {
        (**self).select(query, consistent_read).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_expression() {
        let query = SelectQuery::new("app-", "Expires", "2026-10-15T08:00:00.000000+00:00")
            .with_output(&["Expires"]);

        assert_eq!(
            query.to_expression("sessions"),
            "select `Expires` from `sessions` where itemName() like 'app-%' \
             and `Expires` < '2026-10-15T08:00:00.000000+00:00'"
        );
    }

    #[test]
    fn test_select_expression_escapes_quotes() {
        let query = SelectQuery::new("o'brien-", "Exp`ires", "x");
        let expr = query.to_expression("dom");

        assert!(expr.starts_with("select itemName() from `dom`"));
        assert!(expr.contains("'o''brien-%'"));
        assert!(expr.contains("`Exp``ires`"));
    }

    #[test]
    fn test_select_matches_any_value() {
        let query = SelectQuery::new("app-", "Expires", "5");
        let attrs = vec![Attribute::new("Expires", "9"), Attribute::new("Expires", "1")];

        assert!(query.matches("app-1", &attrs));
        assert!(!query.matches("other-1", &attrs));
        assert!(!query.matches("app-1", &[Attribute::new("Expires", "7")]));
        assert!(!query.matches("app-1", &[Attribute::new("Created", "1")]));
    }

    #[test]
    fn test_item_first() {
        let item = Item {
            name: "app-1".into(),
            attributes: vec![Attribute::new("Expires", "a"), Attribute::new("Expires", "b")],
        };
        assert_eq!(item.first("Expires"), Some("a"));
        assert_eq!(item.first("Locked"), None);
    }
}
