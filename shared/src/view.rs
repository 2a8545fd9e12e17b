use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::Suggestion;
use crate::list_state::ListPhase;
use crate::model::{
    Address, AddressId, AddressStatus, FilterSpec, LatLon, MappedAddress, Parcel, ParcelKey,
    SortKey,
};
use crate::sequencer::Channel;
use crate::session::SyncSession;

/// A single notification for the rendering layer, recorded in the order the
/// state changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    RowsCleared,
    RowAppended { id: AddressId },
    RowReplaced { id: AddressId },
    RowRemoved { id: AddressId },
    CheckboxesDisabled,
    ParcelsCleared,
    ParcelsReplaced { count: usize },
    ParcelRestyled { pl: ParcelKey },
    /// A field of a parcel's cached info panel was patched in place.
    MappingPatched { pl: ParcelKey, field: String },
    SelectionChanged,
    Loading { channel: Channel, active: bool },
    LoadFailed { channel: Channel, message: String },
    EndOfData,
    ScrollTo { offset: f64 },
    InlineMessage {
        id: Option<AddressId>,
        message: String,
    },
    SuggestionsUpdated,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RowView {
    pub id: AddressId,
    pub street: String,
    pub pl: Option<ParcelKey>,
    pub status: AddressStatus,
    pub selected: bool,
    pub location: Option<LatLon>,
    pub geocode_failed: bool,
    pub index_label: Option<String>,
    pub notes: Option<String>,
}

impl RowView {
    fn new(address: &Address, selected: bool) -> Self {
        Self {
            id: address.id,
            street: address.street.clone(),
            pl: address.pl.clone(),
            status: address.status(),
            selected,
            location: address.display_location(),
            geocode_failed: address.geocode_failed,
            index_label: address.index_label.clone(),
            notes: address.notes.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ParcelView {
    pub pl: ParcelKey,
    pub mapped: bool,
    pub selected: bool,
    pub geometry: Option<geojson::Geometry>,
}

impl From<&Parcel> for ParcelView {
    fn from(parcel: &Parcel) -> Self {
        Self {
            pl: parcel.pl.clone(),
            mapped: parcel.mapped(),
            selected: parcel.selected,
            geometry: parcel.geometry.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InfoPanel {
    pub pl: ParcelKey,
    pub pinned: bool,
    pub properties: Map<String, Value>,
    /// Absent, not empty, when nothing is mapped to the parcel.
    pub mapped_addresses: Option<Vec<MappedAddress>>,
    pub offer_association: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ViewModel {
    pub rows: Vec<RowView>,
    pub select_all: bool,
    pub checkboxes_enabled: bool,
    pub list_phase: ListPhase,
    pub more_available: bool,
    pub end_of_data: bool,
    pub total_count: Option<usize>,
    pub sort: Vec<SortKey>,
    pub filters: FilterSpec,
    pub parcels_visible: bool,
    pub parcels: Vec<ParcelView>,
    pub info_panel: Option<InfoPanel>,
    pub suggestions: Vec<Suggestion>,
    pub message: Option<String>,
    pub changes: Vec<Change>,
}

impl ViewModel {
    #[must_use]
    pub fn build(session: &SyncSession, changes: &[Change]) -> Self {
        let list = session.list();
        let selection = session.selection();
        let viewport = session.viewport();

        let info_panel = viewport.focused().map(|parcel| InfoPanel {
            pl: parcel.pl.clone(),
            pinned: viewport.pinned() == Some(&parcel.pl),
            properties: parcel.properties.clone(),
            mapped_addresses: parcel.mapped().then(|| parcel.mapped_to().to_vec()),
            offer_association: session.offers_association(),
        });

        Self {
            rows: list
                .rows()
                .iter()
                .map(|a| RowView::new(a, selection.is_selected(a.id)))
                .collect(),
            select_all: selection.is_select_all(),
            checkboxes_enabled: session.can_mutate(),
            list_phase: list.phase(),
            more_available: list.more_available(),
            end_of_data: list.end_of_data(),
            total_count: list.total_count(),
            sort: list.sort().keys().to_vec(),
            filters: list.filters().clone(),
            parcels_visible: viewport.parcels_visible(),
            parcels: viewport.index().iter().map(ParcelView::from).collect(),
            info_panel,
            suggestions: session.suggestions().to_vec(),
            message: session.message().map(str::to_string),
            changes: changes.to_vec(),
        }
    }
}
