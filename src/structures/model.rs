use reqwest::Url;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::errors::ConsoleError;

/// Shortest check interval the probing engine accepts.
pub const MIN_INTERVAL_SECONDS: u32 = 30;

/// Colour used when a category has none (or an unusable one).
pub const NEUTRAL_COLOR: &str = "#F3F4F6";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl Category {
    pub fn display_color(&self) -> &str {
        match self.color.as_deref() {
            Some(color) if is_valid_color(color) => color,
            _ => NEUTRAL_COLOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,
    pub interval_seconds: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub website_id: String,
    pub is_up: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub response_time_ms: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub keyword_matches: Vec<String>,
    #[serde(with = "timestamp")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub total_sites: u64,
    #[serde(default)]
    pub total_categories: u64,
    #[serde(default)]
    pub up: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avg_response_time_ms: f64,
}

/// One fully converged copy of the four collections.
///
/// `epoch` is the refresh cycle that produced it; `0` is the empty startup
/// snapshot that exists before the first successful refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub epoch: u64,
    pub categories: Vec<Category>,
    pub websites: Vec<Website>,
    pub checks: Vec<CheckResult>,
    pub summary: Summary,
}

impl Snapshot {
    pub fn website(&self, website_id: &str) -> Option<&Website> {
        self.websites.iter().find(|w| w.id == website_id)
    }

    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == category_id)
    }

    /// Newest check for a website. Checks arrive newest first, but the
    /// timestamp decides in case the service ever returns them unordered.
    pub fn latest_check(&self, website_id: &str) -> Option<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.website_id == website_id)
            .max_by_key(|c| c.created_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Categories,
    Websites,
    Checks,
    Summary,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::Categories,
        CollectionKind::Websites,
        CollectionKind::Checks,
        CollectionKind::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Categories => "categories",
            CollectionKind::Websites => "websites",
            CollectionKind::Checks => "checks",
            CollectionKind::Summary => "summary",
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload of one successful sub-fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionData {
    Categories(Vec<Category>),
    Websites(Vec<Website>),
    Checks(Vec<CheckResult>),
    Summary(Summary),
}

impl CollectionData {
    pub fn kind(&self) -> CollectionKind {
        match self {
            CollectionData::Categories(_) => CollectionKind::Categories,
            CollectionData::Websites(_) => CollectionKind::Websites,
            CollectionData::Checks(_) => CollectionKind::Checks,
            CollectionData::Summary(_) => CollectionKind::Summary,
        }
    }
}

/// Body of `POST categories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCategory {
    pub name: String,
    pub color: String,
}

impl NewCategory {
    /// Validates a category draft. A missing or malformed colour falls back
    /// to [`NEUTRAL_COLOR`] instead of being rejected.
    pub fn new(name: &str, color: Option<&str>) -> Result<Self, ConsoleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConsoleError::InvalidConfiguration(
                "category name must not be empty".to_string(),
            ));
        }
        let color = match color.map(str::trim) {
            Some(color) if is_valid_color(color) => color.to_string(),
            _ => NEUTRAL_COLOR.to_string(),
        };
        Ok(Self {
            name: name.to_string(),
            color,
        })
    }
}

/// Body of `POST websites`. Identifiers are assigned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewWebsite {
    pub name: String,
    pub url: String,
    pub category_id: Option<String>,
    pub keywords: Vec<String>,
    pub interval_seconds: u32,
    pub is_active: bool,
}

impl NewWebsite {
    pub fn builder(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            category_id: None,
            keywords: Vec::new(),
            interval_seconds: 300,
            is_active: true,
        }
    }

    pub fn category(mut self, category_id: Option<String>) -> Self {
        // an empty selection from a form means "no category"
        self.category_id = category_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn interval(mut self, interval_seconds: u32) -> Self {
        self.interval_seconds = interval_seconds;
        self
    }

    pub fn validate(&self) -> Result<(), ConsoleError> {
        if self.name.trim().is_empty() {
            return Err(ConsoleError::InvalidConfiguration(
                "website name must not be empty".to_string(),
            ));
        }
        validate_url(&self.url)?;
        if self.interval_seconds < MIN_INTERVAL_SECONDS {
            return Err(ConsoleError::InvalidConfiguration(format!(
                "check interval must be at least {}s, got {}s",
                MIN_INTERVAL_SECONDS, self.interval_seconds
            )));
        }
        Ok(())
    }
}

fn validate_url(raw: &str) -> Result<(), ConsoleError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConsoleError::InvalidConfiguration(format!("invalid url {raw:?}: {e}")))?;
    match (url.scheme(), url.host_str()) {
        ("http" | "https", Some(host)) if !host.is_empty() => Ok(()),
        _ => Err(ConsoleError::InvalidConfiguration(format!(
            "url {raw:?} must be an absolute http(s) url"
        ))),
    }
}

/// `#RGB` or `#RRGGBB`.
pub fn is_valid_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Splits a comma separated keyword field, dropping blanks.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_active() -> bool {
    true
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The backend emits RFC 3339 timestamps, though some deployments drop the
/// offset. Offset-less values are taken as UTC.
mod timestamp {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use time::{
        format_description::well_known::{Iso8601, Rfc3339},
        OffsetDateTime, PrimitiveDateTime,
    };

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }

    pub(crate) fn parse(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
        OffsetDateTime::parse(raw, &Rfc3339).or_else(|_| {
            PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT).map(PrimitiveDateTime::assume_utc)
        })
    }
}
