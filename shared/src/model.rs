use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{SyncError, SyncResult};

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(ParcelKey);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct AddressId(pub u64);

impl fmt::Display for AddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Coordinates ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self { lat, lon })
    }
}

/// Map viewport, in degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> SyncResult<Self> {
        let all_finite = [south, west, north, east].iter().all(|v| v.is_finite());
        if !all_finite || south > north {
            return Err(SyncError::invalid_payload(format!(
                "invalid bounds: s={south} w={west} n={north} e={east}"
            )));
        }
        Ok(Self {
            south,
            west,
            north,
            east,
        })
    }

    /// `west,south,east,north`, the usual bbox ordering.
    #[must_use]
    pub fn to_bbox_param(&self) -> String {
        format!("{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

// --- Address ---

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<ParcelKey>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()).map(ParcelKey))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStatus {
    Approved,
    Flagged,
    Unmapped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub pl: Option<ParcelKey>,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub location: Option<LatLon>,
    #[serde(default)]
    pub geocoded_location: Option<LatLon>,
    #[serde(default)]
    pub geocode_failed: bool,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default)]
    pub import_source: Option<String>,
    #[serde(default)]
    pub imported_by: Option<String>,
    #[serde(default)]
    pub mapped_by: Option<String>,
    #[serde(default)]
    pub imported_at: Option<String>,
    #[serde(default)]
    pub mapped_at: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Display anchor for the row; not an identity.
    #[serde(default)]
    pub index_label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Address {
    #[must_use]
    pub fn new(id: AddressId, street: impl Into<String>) -> Self {
        Self {
            id,
            pl: None,
            street: street.into(),
            location: None,
            geocoded_location: None,
            geocode_failed: false,
            needs_review: false,
            import_source: None,
            imported_by: None,
            mapped_by: None,
            imported_at: None,
            mapped_at: None,
            notes: None,
            index_label: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.pl.is_some()
    }

    /// `None` while unlinked; approval only means something for a link.
    #[must_use]
    pub fn approved(&self) -> Option<bool> {
        self.pl.as_ref().map(|_| !self.needs_review)
    }

    #[must_use]
    pub fn status(&self) -> AddressStatus {
        match self.approved() {
            None => AddressStatus::Unmapped,
            Some(true) => AddressStatus::Approved,
            Some(false) => AddressStatus::Flagged,
        }
    }

    /// Authoritative location first, geocoded fallback second.
    #[must_use]
    pub fn display_location(&self) -> Option<LatLon> {
        self.location.or(self.geocoded_location)
    }

    #[must_use]
    pub fn summary(&self) -> MappedAddress {
        MappedAddress {
            id: self.id,
            street: self.street.clone(),
            needs_review: self.needs_review,
        }
    }
}

// --- Parcel ---

/// Lightweight address entry kept inside a parcel's `mappedTo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedAddress {
    pub id: AddressId,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub needs_review: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parcel {
    pub pl: ParcelKey,
    pub geometry: Option<geojson::Geometry>,
    pub properties: Map<String, Value>,
    mapped_to: Vec<MappedAddress>,
    pub selected: bool,
}

impl Parcel {
    #[must_use]
    pub fn new(pl: ParcelKey) -> Self {
        Self {
            pl,
            geometry: None,
            properties: Map::new(),
            mapped_to: Vec::new(),
            selected: false,
        }
    }

    /// Builds a parcel from one feature of the parcel collection. The `pl`
    /// property is required; `mappedTo` is optional.
    pub fn from_feature(feature: geojson::Feature) -> SyncResult<Self> {
        let mut properties = feature.properties.unwrap_or_default();

        let pl = match properties.remove("pl") {
            Some(Value::String(s)) if !s.trim().is_empty() => ParcelKey(s),
            Some(Value::Number(n)) => ParcelKey(n.to_string()),
            _ => return Err(SyncError::invalid_payload("parcel feature without pl")),
        };

        let mut mapped_to: Vec<MappedAddress> = match properties.remove("mappedTo") {
            Some(Value::Null) | None => Vec::new(),
            Some(raw) => serde_json::from_value(raw)?,
        };
        let mut seen = std::collections::HashSet::new();
        mapped_to.retain(|m| seen.insert(m.id));
        properties.remove("mapped");

        Ok(Self {
            pl,
            geometry: feature.geometry,
            properties,
            mapped_to,
            selected: false,
        })
    }

    #[must_use]
    pub fn mapped(&self) -> bool {
        !self.mapped_to.is_empty()
    }

    #[must_use]
    pub fn mapped_to(&self) -> &[MappedAddress] {
        &self.mapped_to
    }

    #[must_use]
    pub fn contains(&self, id: AddressId) -> bool {
        self.mapped_to.iter().any(|m| m.id == id)
    }

    /// Appends `entry`, or replaces the existing entry with the same id.
    pub fn add_mapping(&mut self, entry: MappedAddress) {
        match self.mapped_to.iter_mut().find(|m| m.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.mapped_to.push(entry),
        }
    }

    /// Replaces the whole membership list, keeping the first entry per id.
    pub fn set_mapped_to(&mut self, entries: Vec<MappedAddress>) {
        let mut seen = std::collections::HashSet::new();
        self.mapped_to = entries.into_iter().filter(|m| seen.insert(m.id)).collect();
    }

    pub fn remove_mapping(&mut self, id: AddressId) -> bool {
        let before = self.mapped_to.len();
        self.mapped_to.retain(|m| m.id != id);
        before != self.mapped_to.len()
    }

    pub fn set_review_flag(&mut self, id: AddressId, needs_review: bool) -> bool {
        match self.mapped_to.iter_mut().find(|m| m.id == id) {
            Some(entry) if entry.needs_review != needs_review => {
                entry.needs_review = needs_review;
                true
            }
            _ => false,
        }
    }

    pub fn rename_street(&mut self, id: AddressId, street: &str) -> bool {
        match self.mapped_to.iter_mut().find(|m| m.id == id) {
            Some(entry) if entry.street != street => {
                entry.street = street.to_string();
                true
            }
            _ => false,
        }
    }
}

// --- Filters ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFacet {
    Approved,
    Flagged,
    Unmapped,
}

impl StatusFacet {
    /// `none` clears the facet.
    pub fn parse(s: &str) -> SyncResult<Option<Self>> {
        match s.trim().to_lowercase().as_str() {
            "approved" => Ok(Some(Self::Approved)),
            "flagged" => Ok(Some(Self::Flagged)),
            "unmapped" => Ok(Some(Self::Unmapped)),
            "none" | "" => Ok(None),
            other => Err(SyncError::invalid_payload(format!(
                "unknown status facet '{other}'"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Flagged => "flagged",
            Self::Unmapped => "unmapped",
        }
    }

    #[must_use]
    pub fn matches(self, address: &Address) -> bool {
        match self {
            Self::Approved => address.status() == AddressStatus::Approved,
            Self::Flagged => address.status() == AddressStatus::Flagged,
            Self::Unmapped => address.status() == AddressStatus::Unmapped,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusFacet>,
}

impl FilterSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.status.is_none()
    }

    /// Replaces the accepted values for `field`; an empty list drops it.
    pub fn set(&mut self, field: impl Into<String>, values: Vec<String>) {
        let field = field.into();
        let mut seen = std::collections::HashSet::new();
        let values: Vec<String> = values
            .into_iter()
            .filter(|v| !v.is_empty() && seen.insert(v.clone()))
            .collect();
        if values.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, values);
        }
    }

    pub fn add_value(&mut self, field: impl Into<String>, value: impl Into<String>) -> bool {
        let value = value.into();
        let values = self.fields.entry(field.into()).or_default();
        if values.contains(&value) {
            false
        } else {
            values.push(value);
            true
        }
    }

    pub fn remove_value(&mut self, field: &str, value: &str) -> bool {
        let Some(values) = self.fields.get_mut(field) else {
            return false;
        };
        let before = values.len();
        values.retain(|v| v != value);
        let changed = before != values.len();
        if values.is_empty() {
            self.fields.remove(field);
        }
        changed
    }

    pub fn set_status(&mut self, status: Option<StatusFacet>) {
        self.status = status;
    }

    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .fields
            .iter()
            .flat_map(|(field, values)| values.iter().map(move |v| (field.clone(), v.clone())))
            .collect();
        if let Some(status) = self.status {
            pairs.push(("status".into(), status.as_str().into()));
        }
        pairs
    }
}

// --- Sorting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Unordered,
    Ascending,
    Descending,
}

impl SortDirection {
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Unordered => Self::Ascending,
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Unordered,
        }
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Unordered)
    }

    const fn wire(self) -> Option<&'static str> {
        match self {
            Self::Unordered => None,
            Self::Ascending => Some("asc"),
            Self::Descending => Some("desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Ordered sort keys. Active keys keep the order they were activated in;
/// unordered keys always trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: fields
                .into_iter()
                .map(|f| SortKey {
                    field: f.into(),
                    direction: SortDirection::Unordered,
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    #[must_use]
    pub fn direction(&self, field: &str) -> SortDirection {
        self.keys
            .iter()
            .find(|k| k.field == field)
            .map_or(SortDirection::Unordered, |k| k.direction)
    }

    fn active_count(&self) -> usize {
        self.keys.iter().filter(|k| k.direction.is_active()).count()
    }

    /// Advances `field` through unordered, ascending, descending and back.
    pub fn toggle(&mut self, field: &str) -> SortDirection {
        let idx = match self.keys.iter().position(|k| k.field == field) {
            Some(idx) => idx,
            None => {
                self.keys.push(SortKey {
                    field: field.to_string(),
                    direction: SortDirection::Unordered,
                });
                self.keys.len() - 1
            }
        };

        let old = self.keys[idx].direction;
        let new = old.next();

        if old.is_active() && new.is_active() {
            self.keys[idx].direction = new;
        } else {
            let mut key = self.keys.remove(idx);
            key.direction = new;
            if new.is_active() {
                let at = self.active_count();
                self.keys.insert(at, key);
            } else {
                self.keys.push(key);
            }
        }
        new
    }

    pub fn active(&self) -> impl Iterator<Item = &SortKey> {
        self.keys.iter().filter(|k| k.direction.is_active())
    }

    /// `field:asc,other:desc`, or `None` when nothing is ordered.
    #[must_use]
    pub fn to_param(&self) -> Option<String> {
        let parts: Vec<String> = self
            .keys
            .iter()
            .filter_map(|k| k.direction.wire().map(|d| format!("{}:{d}", k.field)))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }
}
