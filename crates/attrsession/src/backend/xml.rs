//! Parsing of SimpleDB XML responses.

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{Attribute, Item};
use crate::error::{StoreError, StoreResult};

/// First `<Error>` of an error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Walk the document, calling `on_close` with the element path and the text
/// collected since the last element boundary whenever an element closes.
fn walk<F>(xml: &str, mut on_close: F) -> StoreResult<()>
where
    F: FnMut(&[String], String),
{
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                on_close(&path, String::new());
                path.pop();
                text.clear();
            }
            Ok(Event::Text(t)) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(t)) => {
                text.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Ok(Event::End(_)) => {
                on_close(&path, std::mem::take(&mut text));
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(StoreError::InvalidResponse(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    if !path.is_empty() {
        return Err(StoreError::InvalidResponse(format!(
            "unterminated element <{}>",
            path.join("/")
        )));
    }
    Ok(())
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

/// Collects `<Attribute><Name/><Value/></Attribute>` groups.
#[derive(Default)]
struct AttributeCollector {
    name: Option<String>,
    value: Option<String>,
}

impl AttributeCollector {
    /// Returns a finished attribute when the closing element completes one.
    fn close(&mut self, path: &[String], text: String) -> Option<Attribute> {
        if ends_with(path, &["Attribute", "Name"]) {
            self.name = Some(text);
        } else if ends_with(path, &["Attribute", "Value"]) {
            self.value = Some(text);
        } else if ends_with(path, &["Attribute"]) {
            let name = self.name.take()?;
            let value = self.value.take().unwrap_or_default();
            return Some(Attribute::new(name, value));
        }
        None
    }
}

pub(crate) fn parse_get_attributes(xml: &str) -> StoreResult<Vec<Attribute>> {
    let mut collector = AttributeCollector::default();
    let mut attributes = Vec::new();

    walk(xml, |path, text| {
        if let Some(attr) = collector.close(path, text) {
            attributes.push(attr);
        }
    })?;

    Ok(attributes)
}

/// Parse a select page into its items and the continuation token.
pub(crate) fn parse_select(xml: &str) -> StoreResult<(Vec<Item>, Option<String>)> {
    let mut collector = AttributeCollector::default();
    let mut items = Vec::new();
    let mut current: Option<Item> = None;
    let mut next_token = None;

    walk(xml, |path, text| {
        if ends_with(path, &["Item", "Name"]) {
            current = Some(Item {
                name: text,
                attributes: Vec::new(),
            });
        } else if ends_with(path, &["Item"]) {
            if let Some(item) = current.take() {
                items.push(item);
            }
        } else if ends_with(path, &["NextToken"]) {
            next_token = Some(text).filter(|t| !t.is_empty());
        } else if let Some(attr) = collector.close(path, text)
            && let Some(item) = current.as_mut()
        {
            item.attributes.push(attr);
        }
    })?;

    Ok((items, next_token))
}

/// Extract the first error from an error document, if it is one.
pub(crate) fn parse_error(xml: &str) -> Option<ErrorBody> {
    let mut code = None;
    let mut message = None;

    walk(xml, |path, text| {
        if ends_with(path, &["Error", "Code"]) && code.is_none() {
            code = Some(text);
        } else if ends_with(path, &["Error", "Message"]) && message.is_none() {
            message = Some(text);
        }
    })
    .ok()?;

    Some(ErrorBody {
        code: code?,
        message: message.unwrap_or_default(),
    })
}
