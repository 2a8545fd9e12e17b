use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_MIN_PARCEL_ZOOM: f64 = 17.0;
pub const DEFAULT_SUGGEST_CACHE_CAPACITY: usize = 64;
pub const DEFAULT_SUGGEST_MIN_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    #[default]
    Trusted,
    /// Read-only: checkboxes render disabled, mutations are refused locally.
    Untrusted,
}

impl ViewerRole {
    #[must_use]
    pub const fn can_mutate(self) -> bool {
        matches!(self, Self::Trusted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base: String,
    pub page_size: usize,
    pub min_parcel_zoom: f64,
    pub suggest_cache_capacity: usize,
    pub suggest_min_chars: usize,
    pub viewer: ViewerRole,
    /// Columns offered for sorting, in their initial display order.
    pub sort_fields: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: "/api".into(),
            page_size: DEFAULT_PAGE_SIZE,
            min_parcel_zoom: DEFAULT_MIN_PARCEL_ZOOM,
            suggest_cache_capacity: DEFAULT_SUGGEST_CACHE_CAPACITY,
            suggest_min_chars: DEFAULT_SUGGEST_MIN_CHARS,
            viewer: ViewerRole::Trusted,
            sort_fields: ["street", "town", "zip", "import_source", "mapped_at"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(raw: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| SyncError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(SyncError::Config {
                reason: format!("page_size must be in 1..={MAX_PAGE_SIZE}"),
            });
        }
        if !self.min_parcel_zoom.is_finite() || self.min_parcel_zoom < 0.0 {
            return Err(SyncError::Config {
                reason: "min_parcel_zoom must be a non-negative number".into(),
            });
        }
        if self.suggest_cache_capacity == 0 {
            return Err(SyncError::Config {
                reason: "suggest_cache_capacity must be > 0".into(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn from_json_fills_defaults() {
        let config =
            SyncConfig::from_json(r#"{"page_size": 25, "viewer": "untrusted"}"#).unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.viewer, ViewerRole::Untrusted);
        assert_eq!(config.min_parcel_zoom, DEFAULT_MIN_PARCEL_ZOOM);
    }

    #[test]
    fn from_json_rejects_zero_page_size() {
        let err = SyncConfig::from_json(r#"{"page_size": 0}"#).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(SyncConfig::from_json("not json").is_err());
    }

    #[test]
    fn url_joins_without_double_slash() {
        let config = SyncConfig {
            api_base: "https://maps.example.org/api/".into(),
            ..SyncConfig::default()
        };
        assert_eq!(
            config.url("/addresses"),
            "https://maps.example.org/api/addresses"
        );
    }
}
