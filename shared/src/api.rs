//! Request and response shapes for the address service.
//!
//! The engine never talks to the network itself. Every operation that needs
//! the server produces an [`ApiCall`]; the shell performs it and feeds the
//! decoded body back in.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;
use url::form_urlencoded;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::FieldError;
use crate::model::{Address, AddressId, Bounds, FilterSpec, MappedAddress, Parcel, ParcelKey, SortSpec};
use crate::selection::BulkTarget;
use crate::sequencer::RequestToken;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MutationId(pub Uuid);

impl MutationId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Requests ---

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filters: FilterSpec,
    pub sort: SortSpec,
    pub start: usize,
    pub count: usize,
}

impl ListQuery {
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("start", &self.start.to_string());
        query.append_pair("count", &self.count.to_string());
        if let Some(sort) = self.sort.to_param() {
            query.append_pair("sort", &sort);
        }
        for (field, value) in self.filters.query_pairs() {
            query.append_pair(&field, &value);
        }
        query.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Associate,
    Flag,
    Approve,
    Reject,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationRequest {
    pub action: MutationKind,
    pub target: BulkTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pl: Option<ParcelKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditRequest {
    pub id: AddressId,
    pub fields: Map<String, Value>,
}

/// One outbound call. Load calls carry the sequencer token their completion
/// must present; mutation calls carry the ledger id.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    ListAddresses { token: RequestToken, url: String },
    ListParcels { token: RequestToken, url: String },
    Mutate {
        id: MutationId,
        url: String,
        body: MutationRequest,
    },
    Edit {
        id: MutationId,
        url: String,
        body: EditRequest,
    },
    Suggest { query: String, url: String },
}

impl ApiCall {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::ListAddresses { url, .. }
            | Self::ListParcels { url, .. }
            | Self::Mutate { url, .. }
            | Self::Edit { url, .. }
            | Self::Suggest { url, .. } => url,
        }
    }
}

pub fn list_addresses(config: &SyncConfig, token: RequestToken, query: &ListQuery) -> ApiCall {
    ApiCall::ListAddresses {
        token,
        url: format!("{}?{}", config.url("/addresses"), query.to_query_string()),
    }
}

pub fn list_parcels(config: &SyncConfig, token: RequestToken, bounds: &Bounds) -> ApiCall {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("bbox", &bounds.to_bbox_param())
        .finish();
    ApiCall::ListParcels {
        token,
        url: format!("{}?{query}", config.url("/parcels")),
    }
}

pub fn mutate(config: &SyncConfig, id: MutationId, body: MutationRequest) -> ApiCall {
    ApiCall::Mutate {
        id,
        url: config.url("/associations"),
        body,
    }
}

pub fn edit(config: &SyncConfig, id: MutationId, body: EditRequest) -> ApiCall {
    ApiCall::Edit {
        id,
        url: config.url(&format!("/addresses/{}", body.id)),
        body,
    }
}

pub fn suggest(config: &SyncConfig, query: &str) -> ApiCall {
    let qs = form_urlencoded::Serializer::new(String::new())
        .append_pair("q", query)
        .finish();
    ApiCall::Suggest {
        query: query.to_string(),
        url: format!("{}?{qs}", config.url("/suggest")),
    }
}

// --- Responses ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListAddressesResponse {
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelSummary {
    pub pl: ParcelKey,
    #[serde(default, rename = "mappedTo")]
    pub mapped_to: Vec<MappedAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "affectedAddresses")]
    pub affected_addresses: Vec<Address>,
    #[serde(default, rename = "affectedParcelSummary")]
    pub affected_parcel_summary: Vec<ParcelSummary>,
}

fn field_errors<'de, D>(deserializer: D) -> Result<Vec<FieldError>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Message(String),
        Field {
            #[serde(default)]
            field: Option<String>,
            message: String,
        },
    }

    let raw: Option<Vec<Raw>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|r| match r {
            Raw::Message(message) => FieldError::new(message),
            Raw::Field { field, message } => FieldError { field, message },
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EditResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default, deserialize_with = "field_errors")]
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub label: String,
}

/// Decodes the parcel collection. Features without a usable `pl` are
/// skipped rather than failing the whole load.
#[must_use]
pub fn parcels_from_collection(collection: geojson::FeatureCollection) -> Vec<Parcel> {
    let total = collection.features.len();
    let parcels: Vec<Parcel> = collection
        .features
        .into_iter()
        .filter_map(|feature| match Parcel::from_feature(feature) {
            Ok(parcel) => Some(parcel),
            Err(e) => {
                warn!(error = %e, "skipping parcel feature");
                None
            }
        })
        .collect();
    if parcels.len() < total {
        warn!(kept = parcels.len(), total, "parcel collection had unusable features");
    }
    parcels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusFacet;
    use crate::sequencer::{Channel, RequestSequencer};
    use serde_json::json;

    #[test]
    fn list_query_string_orders_paging_sort_then_filters() {
        let mut filters = FilterSpec::new();
        filters.add_value("town", "North Reading");
        filters.set_status(Some(StatusFacet::Flagged));
        let mut sort = SortSpec::new(["street", "zip"]);
        sort.toggle("zip");
        let query = ListQuery {
            filters,
            sort,
            start: 100,
            count: 50,
        };
        assert_eq!(
            query.to_query_string(),
            "start=100&count=50&sort=zip%3Aasc&town=North+Reading&status=flagged"
        );
    }

    #[test]
    fn parcel_url_carries_bbox() {
        let mut seq = RequestSequencer::new();
        let token = seq.begin(Channel::Parcels);
        let bounds = Bounds::new(1.0, 2.0, 3.0, 4.0).unwrap();
        let call = list_parcels(&SyncConfig::default(), token, &bounds);
        assert_eq!(call.url(), "/api/parcels?bbox=2%2C1%2C4%2C3");
    }

    #[test]
    fn bulk_mutation_body_shape() {
        let body = MutationRequest {
            action: MutationKind::Associate,
            target: BulkTarget::All {
                select_all: true,
                filters: FilterSpec::new(),
                excluded_ids: vec![AddressId(4)],
            },
            pl: Some(ParcelKey::new("P-1")),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["action"], json!("associate"));
        assert_eq!(value["target"]["selectAll"], json!(true));
        assert_eq!(value["target"]["excludedIds"], json!([4]));
        assert_eq!(value["pl"], json!("P-1"));

        let explicit = MutationRequest {
            action: MutationKind::Delete,
            target: BulkTarget::Ids {
                ids: vec![AddressId(1), AddressId(2)],
            },
            pl: None,
        };
        let value = serde_json::to_value(&explicit).unwrap();
        assert_eq!(value["target"], json!({"ids": [1, 2]}));
        assert!(value.get("pl").is_none());
    }

    #[test]
    fn edit_response_accepts_plain_and_field_errors() {
        let resp: EditResponse = serde_json::from_value(json!({
            "errors": ["street is required", {"field": "zip", "message": "too short"}]
        }))
        .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.errors[0], FieldError::new("street is required"));
        assert_eq!(resp.errors[1], FieldError::for_field("zip", "too short"));
    }

    #[test]
    fn mutation_response_reads_camel_case_keys() {
        let resp: MutationResponse = serde_json::from_value(json!({
            "success": true,
            "affectedAddresses": [{"id": 2, "pl": "PARCEL-9", "street": "2 Elm"}],
            "affectedParcelSummary": [{"pl": "PARCEL-9", "mappedTo": [{"id": 2, "street": "2 Elm"}]}]
        }))
        .unwrap();
        assert_eq!(resp.affected_addresses[0].pl, Some(ParcelKey::new("PARCEL-9")));
        assert_eq!(resp.affected_parcel_summary[0].mapped_to.len(), 1);
    }

    #[test]
    fn parcels_without_pl_are_skipped() {
        let collection: geojson::FeatureCollection = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": null, "properties": {"pl": "A"}},
                {"type": "Feature", "geometry": null, "properties": {"owner": "x"}},
                {"type": "Feature", "geometry": null, "properties": {"pl": 42}}
            ]
        }))
        .unwrap();
        let parcels = parcels_from_collection(collection);
        let keys: Vec<_> = parcels.iter().map(|p| p.pl.as_str().to_string()).collect();
        assert_eq!(keys, vec!["A", "42"]);
    }
}
