//! Runtime configuration.
//!
//! [`AutoCrudConfig`] is assembled once at startup and handed to the router;
//! nothing mutates it afterwards. It deserializes from any serde format with
//! every key optional, or from `AUTOCRUD_*` environment variables.

use serde::Deserialize;
use serde_with::{OneOrMany, serde_as};
use std::str::FromStr;

/// How eager-loaded relations restrict the root rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// Root rows are kept whether or not related rows exist
    #[default]
    Outer,
    /// Only root rows with at least one related row are returned
    Inner,
}

impl FromStr for JoinKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "outer" | "left" => Ok(Self::Outer),
            "inner" => Ok(Self::Inner),
            other => Err(format!("unknown join kind '{other}'")),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoCrudConfig {
    /// Prefix for every generated route, e.g. `/api`
    pub base_url: String,
    pub resources_url: String,
    pub resources_url_enabled: bool,
    /// Suffix answering with the resource description, e.g. `/artist/meta`
    pub metadata_url: String,
    pub metadata_enabled: bool,
    /// Restricts every resource to GET and FETCH
    pub read_only: bool,
    pub fetch_enabled: bool,
    pub export_enabled: bool,
    pub conditional_request_enabled: bool,
    pub query_string_filters_enabled: bool,
    /// Upper bound and default for `_limit`; `None` disables limiting
    pub max_limit: Option<u64>,
    pub join: JoinKind,
    /// Database schema to reflect (PostgreSQL only)
    pub schema: Option<String>,
    /// Tables skipped by reflection; a single name or a list
    #[serde_as(as = "OneOrMany<_>")]
    pub exclude_tables: Vec<String>,
    pub csv_delimiter: char,
}

impl Default for AutoCrudConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            resources_url: "/resources".to_string(),
            resources_url_enabled: true,
            metadata_url: "/meta".to_string(),
            metadata_enabled: true,
            read_only: false,
            fetch_enabled: true,
            export_enabled: true,
            conditional_request_enabled: true,
            query_string_filters_enabled: true,
            max_limit: Some(1000),
            join: JoinKind::Outer,
            schema: None,
            exclude_tables: Vec::new(),
            csv_delimiter: ';',
        }
    }
}

impl AutoCrudConfig {
    /// Build a configuration from `AUTOCRUD_*` environment variables.
    ///
    /// Unset or unparsable variables keep their default. `AUTOCRUD_MAX_LIMIT`
    /// set to `0` or `none` disables limiting.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let flag = |key: &str, target: &mut bool| {
            if let Some(value) = lookup(key) {
                match value.to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => *target = true,
                    "0" | "false" | "no" | "off" => *target = false,
                    _ => tracing::warn!(key, value = %value, "Ignoring unparsable flag"),
                }
            }
        };
        flag("AUTOCRUD_READ_ONLY", &mut config.read_only);
        flag("AUTOCRUD_FETCH_ENABLED", &mut config.fetch_enabled);
        flag("AUTOCRUD_EXPORT_ENABLED", &mut config.export_enabled);
        flag("AUTOCRUD_METADATA_ENABLED", &mut config.metadata_enabled);
        flag(
            "AUTOCRUD_RESOURCES_URL_ENABLED",
            &mut config.resources_url_enabled,
        );
        flag(
            "AUTOCRUD_CONDITIONAL_REQUEST_ENABLED",
            &mut config.conditional_request_enabled,
        );
        flag(
            "AUTOCRUD_QUERY_STRING_FILTERS_ENABLED",
            &mut config.query_string_filters_enabled,
        );

        if let Some(value) = lookup("AUTOCRUD_BASE_URL") {
            config.base_url = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = lookup("AUTOCRUD_RESOURCES_URL") {
            config.resources_url = value;
        }
        if let Some(value) = lookup("AUTOCRUD_METADATA_URL") {
            config.metadata_url = value;
        }
        if let Some(value) = lookup("AUTOCRUD_MAX_LIMIT") {
            match value.parse::<u64>() {
                Ok(0) => config.max_limit = None,
                Ok(limit) => config.max_limit = Some(limit),
                Err(_) if value.eq_ignore_ascii_case("none") => config.max_limit = None,
                Err(_) => tracing::warn!(value = %value, "Ignoring unparsable AUTOCRUD_MAX_LIMIT"),
            }
        }
        if let Some(value) = lookup("AUTOCRUD_JOIN") {
            match value.parse() {
                Ok(join) => config.join = join,
                Err(err) => tracing::warn!(error = %err, "Ignoring AUTOCRUD_JOIN"),
            }
        }
        if let Some(value) = lookup("AUTOCRUD_DATABASE_SCHEMA") {
            config.schema = Some(value);
        }
        if let Some(value) = lookup("AUTOCRUD_EXCLUDE_TABLES") {
            config.exclude_tables = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(c) = lookup("AUTOCRUD_CSV_DELIMITER").and_then(|v| v.chars().next()) {
            config.csv_delimiter = c;
        }

        config
    }

    /// Metadata suffix without its leading slash (`meta`)
    pub(crate) fn metadata_segment(&self) -> &str {
        self.metadata_url.trim_start_matches('/')
    }
}
