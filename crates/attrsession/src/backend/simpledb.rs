//! Amazon SimpleDB implementation of [`AttributeStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, trace};
use url::Url;

use super::{
    Attribute, AttributeStore, Item, ReplaceableAttribute, SelectQuery, UpdateCondition, signing,
    xml,
};
use crate::error::{StoreError, StoreResult};

/// SimpleDB API version spoken by this client.
const API_VERSION: &str = "2009-04-15";

/// Default regional endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://sdb.amazonaws.com";

/// Default timeout for a single request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// SimpleDB-backed attribute store.
///
/// Every call is one signed HTTP request (select may page). Nothing is
/// retried here; callers decide what a failure means.
///
/// # Example
///
/// ```no_run
/// use attrsession::SimpleDbStore;
///
/// # fn example() -> attrsession::StoreResult<()> {
/// let store = SimpleDbStore::builder()
///     .domain("sessions")
///     .credentials("AKID", "secret")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SimpleDbStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    http: reqwest::Client,
    endpoint: Url,
    domain: String,
    access_key: String,
    secret_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for SimpleDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleDbStore")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("domain", &self.inner.domain)
            .finish_non_exhaustive()
    }
}

impl SimpleDbStore {
    /// Create a new store builder.
    pub fn builder() -> SimpleDbStoreBuilder {
        SimpleDbStoreBuilder::new()
    }

    /// Endpoint requests are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Domain holding the session items.
    pub fn domain(&self) -> &str {
        &self.inner.domain
    }

    /// Create the domain. Succeeds if it already exists.
    pub async fn create_domain(&self) -> StoreResult<()> {
        let params = vec![param("DomainName", &self.inner.domain)];
        self.call("CreateDomain", params).await?;
        debug!(domain = %self.inner.domain, "created domain");
        Ok(())
    }

    fn domain_and_item(&self, item: &str) -> Vec<(String, String)> {
        vec![
            param("DomainName", &self.inner.domain),
            param("ItemName", item),
        ]
    }

    /// Sign and send one action, returning the body of a successful response.
    async fn call(&self, action: &str, params: Vec<(String, String)>) -> StoreResult<String> {
        let inner = &self.inner;
        let timestamp = chrono::Utc::now()
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string();

        let mut all = vec![
            param("Action", action),
            param("Version", API_VERSION),
            param("AWSAccessKeyId", &inner.access_key),
            param("SignatureVersion", "2"),
            param("SignatureMethod", "HmacSHA256"),
            param("Timestamp", &timestamp),
        ];
        all.extend(params);

        let canonical = signing::canonical_query(&all);
        let to_sign = signing::string_to_sign(
            "POST",
            &signing::host_header(&inner.endpoint),
            inner.endpoint.path(),
            &canonical,
        );
        let signature = signing::sign(&inner.secret_key, &to_sign)?;
        let body = format!("{}&Signature={}", canonical, signing::encode(&signature));

        trace!(action = action, "sending SimpleDB request");

        let response = inner
            .http
            .post(inner.endpoint.clone())
            .body(body)
            .timeout(inner.timeout)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(classify_error(status.as_u16(), &text))
        }
    }
}

fn param(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn expected_params(expected: Option<&UpdateCondition>) -> Vec<(String, String)> {
    let Some(expected) = expected else {
        return Vec::new();
    };

    let mut params = vec![param("Expected.1.Name", &expected.name)];
    match &expected.value {
        Some(value) => params.push(param("Expected.1.Value", value)),
        None => params.push(param("Expected.1.Exists", "false")),
    }
    params
}

/// Map an error response onto the store error taxonomy.
fn classify_error(status: u16, body: &str) -> StoreError {
    match xml::parse_error(body) {
        Some(err) if err.code == "ConditionalCheckFailed" => {
            StoreError::ConditionalCheckFailed(err.message)
        }
        Some(err) if err.code == "AttributeDoesNotExist" => {
            StoreError::AttributeDoesNotExist(err.message)
        }
        Some(err) => StoreError::Service {
            status,
            code: err.code,
            message: err.message,
        },
        None => StoreError::Service {
            status,
            code: "Unknown".to_string(),
            message: format!("HTTP {}", status),
        },
    }
}

#[async_trait]
impl AttributeStore for SimpleDbStore {
    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[ReplaceableAttribute],
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()> {
        let mut params = self.domain_and_item(item);
        for (i, attr) in attributes.iter().enumerate() {
            let n = i + 1;
            params.push(param(&format!("Attribute.{}.Name", n), &attr.name));
            params.push(param(&format!("Attribute.{}.Value", n), &attr.value));
            if attr.replace {
                params.push(param(&format!("Attribute.{}.Replace", n), "true"));
            }
        }
        params.extend(expected_params(expected));

        self.call("PutAttributes", params).await?;
        Ok(())
    }

    async fn get_attributes(
        &self,
        item: &str,
        names: &[&str],
        consistent_read: bool,
    ) -> StoreResult<Vec<Attribute>> {
        let mut params = self.domain_and_item(item);
        for (i, name) in names.iter().enumerate() {
            params.push(param(&format!("AttributeName.{}", i + 1), name));
        }
        if consistent_read {
            params.push(param("ConsistentRead", "true"));
        }

        let body = self.call("GetAttributes", params).await?;
        xml::parse_get_attributes(&body)
    }

    async fn delete_attributes(
        &self,
        item: &str,
        expected: Option<&UpdateCondition>,
    ) -> StoreResult<()> {
        let mut params = self.domain_and_item(item);
        params.extend(expected_params(expected));

        self.call("DeleteAttributes", params).await?;
        Ok(())
    }

    async fn select(&self, query: &SelectQuery, consistent_read: bool) -> StoreResult<Vec<Item>> {
        let expression = query.to_expression(&self.inner.domain);
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut params = vec![param("SelectExpression", &expression)];
            if consistent_read {
                params.push(param("ConsistentRead", "true"));
            }
            if let Some(token) = &next_token {
                params.push(param("NextToken", token));
            }

            let body = self.call("Select", params).await?;
            let (page, token) = xml::parse_select(&body)?;
            items.extend(page);

            match token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        debug!(matched = items.len(), "select finished");
        Ok(items)
    }

    fn name(&self) -> &str {
        "simpledb"
    }
}

/// Builder for [`SimpleDbStore`].
#[derive(Debug)]
pub struct SimpleDbStoreBuilder {
    endpoint: String,
    domain: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    timeout: Duration,
    user_agent: Option<String>,
}

impl SimpleDbStoreBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            domain: None,
            access_key: None,
            secret_key: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }

    /// Set the service endpoint (e.g. `https://sdb.eu-west-1.amazonaws.com`).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the domain that holds session items.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the access key id and secret key.
    pub fn credentials(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the store.
    pub fn build(self) -> StoreResult<SimpleDbStore> {
        let domain = self
            .domain
            .filter(|d| !d.is_empty())
            .ok_or_else(|| StoreError::Config("domain is required".to_string()))?;
        let access_key = self
            .access_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StoreError::Config("access key is required".to_string()))?;
        let secret_key = self
            .secret_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StoreError::Config("secret key is required".to_string()))?;

        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| StoreError::Config(format!("invalid endpoint '{}': {}", self.endpoint, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("attrsession/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        Ok(SimpleDbStore {
            inner: Arc::new(StoreInner {
                http,
                endpoint,
                domain,
                access_key,
                secret_key,
                timeout: self.timeout,
            }),
        })
    }
}

impl Default for SimpleDbStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
