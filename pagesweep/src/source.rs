use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::error::SourceError;
use crate::types::{Unit, UnitId};

/// Loads the full unit list once, before a run starts
#[async_trait]
pub trait UnitSource: Send + Sync {
    async fn load_units(&self) -> Result<Vec<Unit>, SourceError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl From<RawId> for UnitId {
    fn from(id: RawId) -> Self {
        match id {
            RawId::Text(id) => UnitId::from(id),
            RawId::Number(id) => UnitId::from(id),
        }
    }
}

/// One entry of a unit listing. Either `expected_records` or `pages` must be given.
#[derive(Debug, Deserialize)]
struct UnitEntry {
    id: RawId,
    name: String,
    #[serde(default, alias = "records")]
    expected_records: Option<u64>,
    #[serde(default)]
    pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing {
    Bare(Vec<UnitEntry>),
    Wrapped { units: Vec<UnitEntry> },
}

impl Listing {
    fn into_entries(self) -> Vec<UnitEntry> {
        match self {
            Listing::Bare(entries) | Listing::Wrapped { units: entries } => entries,
        }
    }
}

fn build_units(entries: Vec<UnitEntry>, page_size: u32) -> Result<Vec<Unit>, SourceError> {
    let mut seen = HashSet::with_capacity(entries.len());
    let mut units = Vec::with_capacity(entries.len());

    for entry in entries {
        let id = UnitId::from(entry.id);
        if !seen.insert(id.clone()) {
            return Err(SourceError::Invalid(format!("duplicate unit id '{}'", id)));
        }

        let unit = match (entry.expected_records, entry.pages) {
            (Some(records), None) => Unit::new(id, entry.name, records, page_size),
            (None, Some(pages)) => Unit::with_pages(id, entry.name, pages, page_size),
            (Some(records), Some(pages)) => Unit { id, name: entry.name, expected_record_count: records, expected_page_count: pages },
            (None, None) => return Err(SourceError::Invalid(format!("unit '{}' has neither expected_records nor pages", id))),
        };
        units.push(unit);
    }

    Ok(units)
}

/// Unit listing in a local JSON or YAML file
pub struct FileUnitSource {
    path: PathBuf,
    page_size: u32,
}

impl FileUnitSource {
    pub fn new(path: impl Into<PathBuf>, page_size: u32) -> Self {
        Self { path: path.into(), page_size }
    }

    fn parse(path: &Path, content: &str) -> Result<Listing, SourceError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_lowercase();
        match extension.as_str() {
            "json" => Ok(serde_json::from_str(content)?),
            "yaml" | "yml" => Ok(serde_yaml_ng::from_str(content)?),
            other => Err(SourceError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[async_trait]
impl UnitSource for FileUnitSource {
    async fn load_units(&self) -> Result<Vec<Unit>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let units = build_units(Self::parse(&self.path, &content)?.into_entries(), self.page_size)?;
        info!("📋 Loaded {} units from {}", units.len(), self.path.display());
        Ok(units)
    }
}

/// Unit listing served at `GET {base}/units`
pub struct HttpUnitSource {
    client: reqwest::Client,
    url: Url,
    page_size: u32,
}

impl HttpUnitSource {
    pub fn new(base_url: &str, page_size: u32, timeout: Duration) -> Result<Self, SourceError> {
        let mut url = Url::parse(base_url).map_err(|e| SourceError::Invalid(format!("invalid base URL '{}': {}", base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Invalid(format!("base URL '{}' cannot have a path", base_url)))?
            .pop_if_empty()
            .push("units");
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url, page_size })
    }
}

#[async_trait]
impl UnitSource for HttpUnitSource {
    async fn load_units(&self) -> Result<Vec<Unit>, SourceError> {
        let listing: Listing = self.client.get(self.url.clone()).send().await?.error_for_status()?.json().await?;
        let units = build_units(listing.into_entries(), self.page_size)?;
        info!("📋 Loaded {} units from {}", units.len(), self.url);
        Ok(units)
    }
}

/// Include-only and exclude lists applied after loading
#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    include: Option<HashSet<UnitId>>,
    skip: HashSet<UnitId>,
}

impl UnitFilter {
    pub fn new(include: &[String], skip: &[String]) -> Self {
        let include = (!include.is_empty()).then(|| include.iter().map(|id| UnitId::from(id.as_str())).collect());
        let skip = skip.iter().map(|id| UnitId::from(id.as_str())).collect();
        Self { include, skip }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.skip.is_empty()
    }

    pub fn apply(&self, units: Vec<Unit>) -> Vec<Unit> {
        if self.is_empty() {
            return units;
        }

        if let Some(include) = &self.include {
            for id in include.iter().filter(|id| !units.iter().any(|u| &u.id == *id)) {
                warn!("⚠️ Requested unit {} is not in the unit list", id);
            }
        }

        let before = units.len();
        let kept: Vec<Unit> = units
            .into_iter()
            .filter(|u| self.include.as_ref().is_none_or(|include| include.contains(&u.id)))
            .filter(|u| !self.skip.contains(&u.id))
            .collect();

        info!("🔎 Unit filter kept {} of {} units", kept.len(), before);
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn listing_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_json_listing() {
        let file = listing_file(".json", r#"[{"id": 62, "name": "Municipality X", "expected_records": 95}, {"id": "b", "name": "B", "pages": 3}]"#);
        let units = FileUnitSource::new(file.path(), 10).load_units().await.unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id, UnitId::from("62"));
        assert_eq!(units[0].expected_page_count, 10);
        assert_eq!(units[1].expected_record_count, 30);
    }

    #[tokio::test]
    async fn test_load_yaml_wrapped_listing() {
        let file = listing_file(".yaml", "units:\n  - id: a\n    name: Alpha\n    records: 21\n");
        let units = FileUnitSource::new(file.path(), 10).load_units().await.unwrap();

        assert_eq!(units, vec![Unit::new("a", "Alpha", 21, 10)]);
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let file = listing_file(".csv", "id,name\n");
        let err = FileUnitSource::new(file.path(), 10).load_units().await.unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedFormat(ext) if ext == "csv"));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = FileUnitSource::new("/nonexistent/units.json", 10).load_units().await.unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[tokio::test]
    async fn test_invalid_entries() {
        let file = listing_file(".json", r#"[{"id": "a", "name": "A"}]"#);
        assert!(matches!(FileUnitSource::new(file.path(), 10).load_units().await, Err(SourceError::Invalid(_))));

        let file = listing_file(".json", r#"[{"id": "a", "name": "A", "pages": 1}, {"id": "a", "name": "Again", "pages": 2}]"#);
        assert!(matches!(FileUnitSource::new(file.path(), 10).load_units().await, Err(SourceError::Invalid(_))));

        let file = listing_file(".json", "{not json");
        assert!(matches!(FileUnitSource::new(file.path(), 10).load_units().await, Err(SourceError::Json(_))));
    }

    #[tokio::test]
    async fn test_http_source() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/units")
            .with_status(200)
            .with_body(r#"{"units": [{"id": 1, "name": "One", "expected_records": 11}]}"#)
            .create_async()
            .await;

        let source = HttpUnitSource::new(&format!("{}/api/", server.url()), 10, Duration::from_secs(5)).unwrap();
        let units = source.load_units().await.unwrap();

        mock.assert_async().await;
        assert_eq!(units, vec![Unit::new("1", "One", 11, 10)]);
    }

    #[tokio::test]
    async fn test_http_source_error_status() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/units").with_status(500).create_async().await;

        let source = HttpUnitSource::new(&server.url(), 10, Duration::from_secs(5)).unwrap();
        assert!(matches!(source.load_units().await, Err(SourceError::Http(_))));
    }

    #[test]
    fn test_filter() {
        let units = vec![Unit::new("a", "A", 1, 10), Unit::new("b", "B", 1, 10), Unit::new("c", "C", 1, 10)];

        assert_eq!(UnitFilter::default().apply(units.clone()).len(), 3);

        let only = UnitFilter::new(&["a".to_string(), "c".to_string(), "zzz".to_string()], &[]).apply(units.clone());
        assert_eq!(only.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);

        let skipped = UnitFilter::new(&[], &["b".to_string()]).apply(units.clone());
        assert_eq!(skipped.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);

        let both = UnitFilter::new(&["a".to_string(), "b".to_string()], &["a".to_string()]).apply(units);
        assert_eq!(both.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["b"]);
    }
}
