use crate::action::{Action, ActionScope};
use crate::api::{EditResponse, ListAddressesResponse, MutationId, MutationResponse, Suggestion};
use crate::error::SyncResult;
use crate::model::Parcel;
use crate::sequencer::RequestToken;

#[derive(Debug, Clone)]
pub enum Event {
    Noop,

    /// Replaces the session with one built from a JSON config document.
    Configure {
        config_json: String,
    },
    Start,

    Reload {
        preserve_scroll: bool,
        preserve_selection: bool,
    },
    LoadMore,
    Scrolled {
        offset: f64,
    },

    SetFilter {
        field: String,
        values: Vec<String>,
    },
    AddFilterValue {
        field: String,
        value: String,
    },
    RemoveFilterValue {
        field: String,
        value: String,
    },
    SetStatus {
        status: String,
    },
    ClearFilters,
    ToggleSort {
        field: String,
    },

    ViewportChanged {
        south: f64,
        west: f64,
        north: f64,
        east: f64,
        zoom: f64,
    },
    ParcelHovered {
        pl: Option<String>,
    },
    ParcelClicked {
        pl: String,
    },

    RowToggled {
        id: u64,
    },
    SelectAll {
        on: bool,
    },
    ClearSelection,

    EditStarted {
        id: u64,
    },
    Perform {
        action: Action,
        scope: ActionScope,
    },

    SuggestInput {
        text: String,
    },
    SuggestionChosen {
        index: usize,
    },

    DismissMessage,

    ListLoaded {
        token: RequestToken,
        result: Box<SyncResult<ListAddressesResponse>>,
    },
    ParcelsLoaded {
        token: RequestToken,
        result: Box<SyncResult<Vec<Parcel>>>,
    },
    MutationCompleted {
        id: MutationId,
        result: Box<SyncResult<MutationResponse>>,
    },
    EditCompleted {
        id: MutationId,
        result: Box<SyncResult<EditResponse>>,
    },
    SuggestionsLoaded {
        query: String,
        result: Box<SyncResult<Vec<Suggestion>>>,
    },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Configure { .. } => "configure",
            Self::Start => "start",
            Self::Reload { .. } => "reload",
            Self::LoadMore => "load_more",
            Self::Scrolled { .. } => "scrolled",
            Self::SetFilter { .. } => "set_filter",
            Self::AddFilterValue { .. } => "add_filter_value",
            Self::RemoveFilterValue { .. } => "remove_filter_value",
            Self::SetStatus { .. } => "set_status",
            Self::ClearFilters => "clear_filters",
            Self::ToggleSort { .. } => "toggle_sort",
            Self::ViewportChanged { .. } => "viewport_changed",
            Self::ParcelHovered { .. } => "parcel_hovered",
            Self::ParcelClicked { .. } => "parcel_clicked",
            Self::RowToggled { .. } => "row_toggled",
            Self::SelectAll { .. } => "select_all",
            Self::ClearSelection => "clear_selection",
            Self::EditStarted { .. } => "edit_started",
            Self::Perform { .. } => "perform",
            Self::SuggestInput { .. } => "suggest_input",
            Self::SuggestionChosen { .. } => "suggestion_chosen",
            Self::DismissMessage => "dismiss_message",
            Self::ListLoaded { .. } => "list_loaded",
            Self::ParcelsLoaded { .. } => "parcels_loaded",
            Self::MutationCompleted { .. } => "mutation_completed",
            Self::EditCompleted { .. } => "edit_completed",
            Self::SuggestionsLoaded { .. } => "suggestions_loaded",
        }
    }

    /// Completions arrive from the shell; everything else is the user.
    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        !matches!(
            self,
            Self::Noop
                | Self::Configure { .. }
                | Self::ListLoaded { .. }
                | Self::ParcelsLoaded { .. }
                | Self::MutationCompleted { .. }
                | Self::EditCompleted { .. }
                | Self::SuggestionsLoaded { .. }
        )
    }
}
