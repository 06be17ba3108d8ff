use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::types::{Record, Unit};

/// Retrieves and parses one listing page of a unit.
///
/// Implementations may drive a browser, call an HTTP API or replay fixtures.
/// An instance is a worker's session: it is owned by exactly one worker and
/// never shared with a sibling running concurrently on the same unit.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, unit: &Unit, page: u32) -> Result<Vec<Record>, FetchError>;
}

/// Opens one fetch session per worker
#[async_trait]
pub trait FetcherFactory: Send + Sync {
    async fn open_session(&self, unit: &Unit, worker_id: usize) -> Result<Box<dyn PageFetcher>, FetchError>;
}

#[async_trait]
impl<F: PageFetcher + ?Sized> PageFetcher for Arc<F> {
    async fn fetch(&self, unit: &Unit, page: u32) -> Result<Vec<Record>, FetchError> {
        (**self).fetch(unit, page).await
    }
}

/// A shared, stateless fetcher hands every worker a handle to itself
#[async_trait]
impl<F: PageFetcher + 'static> FetcherFactory for Arc<F> {
    async fn open_session(&self, _unit: &Unit, _worker_id: usize) -> Result<Box<dyn PageFetcher>, FetchError> {
        Ok(Box::new(Arc::clone(self)))
    }
}

/// Which JSON fields of a page item carry the record's identity
#[derive(Debug, Clone)]
pub struct FieldMap {
    pub key: String,
    pub ordinal: String,
    pub group: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self { key: "key".to_string(), ordinal: "ordinal".to_string(), group: "group".to_string() }
    }
}

/// Fetches pages from `GET {base}/units/{unit_id}/pages/{page}`.
///
/// The body is either a JSON array of objects or an object with a `records`
/// array. Clones share the client's connection pool, so each worker's session
/// is just a clone.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    base_url: Url,
    fields: FieldMap,
}

impl HttpPageFetcher {
    pub fn new(base_url: &str, fields: FieldMap, page_timeout: Duration) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url).map_err(|e| FetchError::Session(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Session(format!("base URL '{}' cannot have a path", base_url)));
        }
        let client = reqwest::Client::builder().timeout(page_timeout).build()?;
        Ok(Self { client, base_url, fields })
    }

    pub fn page_url(&self, unit: &Unit, page: u32) -> Url {
        let mut url = self.base_url.clone();
        let page = page.to_string();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["units", unit.id.as_str(), "pages", page.as_str()]);
        }
        url
    }

    fn to_record(&self, unit: &Unit, item: Value) -> Result<Record, FetchError> {
        let Value::Object(mut data) = item else {
            return Err(FetchError::Malformed("page item is not an object".to_string()));
        };

        let key = data
            .remove(&self.fields.key)
            .and_then(scalar_to_string)
            .ok_or_else(|| FetchError::Malformed(format!("item without '{}' field", self.fields.key)))?;
        let ordinal = data.remove(&self.fields.ordinal).and_then(scalar_to_string).unwrap_or_default();
        let group = data.remove(&self.fields.group).and_then(scalar_to_string).unwrap_or_else(|| unit.name.clone());

        // these names belong to the record envelope
        for reserved in ["key", "ordinal", "group", "unit_id"] {
            data.remove(reserved);
        }

        Ok(Record { key, ordinal, unit_id: unit.id.clone(), group, data })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, unit: &Unit, page: u32) -> Result<Vec<Record>, FetchError> {
        let url = self.page_url(unit, page);
        debug!("🌐 GET {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let items = match response.json::<Value>().await? {
            Value::Array(items) => items,
            Value::Object(mut body) => match body.remove("records") {
                Some(Value::Array(items)) => items,
                _ => return Err(FetchError::Malformed("expected a 'records' array".to_string())),
            },
            _ => return Err(FetchError::Malformed("expected a JSON array or object".to_string())),
        };

        items.into_iter().map(|item| self.to_record(unit, item)).collect()
    }
}

#[async_trait]
impl FetcherFactory for HttpPageFetcher {
    async fn open_session(&self, _unit: &Unit, _worker_id: usize) -> Result<Box<dyn PageFetcher>, FetchError> {
        Ok(Box::new(self.clone()))
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
