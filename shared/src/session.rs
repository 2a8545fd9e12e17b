use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use crate::action::{Action, ActionScope, ApprovalAction};
use crate::api::{
    self, ApiCall, EditRequest, EditResponse, MutationId, MutationKind, MutationRequest,
    MutationResponse, Suggestion,
};
use crate::config::SyncConfig;
use crate::error::{FieldError, SyncError, SyncResult};
use crate::list_state::{ListOutcome, ListState, LoadKind, ReloadOverrides};
use crate::model::{AddressId, Bounds, FilterSpec, Parcel, ParcelKey, StatusFacet};
use crate::selection::{BulkTarget, SelectionModel};
use crate::sequencer::{RequestSequencer, RequestToken};
use crate::suggest::{SuggestIntent, SuggestState};
use crate::sync_engine::{check_consistency, AssociationSyncEngine, Inconsistency};
use crate::view::Change;
use crate::viewport::ViewportState;

/// What an outstanding mutation needs to be applied when it completes.
#[derive(Debug, Clone)]
struct PendingMutation {
    action: Action,
    target: BulkTarget,
    street_at_start: Option<String>,
}

/// All synchronization state for one address/parcel view.
#[derive(Debug)]
pub struct SyncSession {
    config: SyncConfig,
    seq: RequestSequencer,
    list: ListState,
    viewport: ViewportState,
    selection: SelectionModel,
    suggest: SuggestState,
    pending: HashMap<MutationId, PendingMutation>,
    edit_origins: HashMap<AddressId, String>,
    changes: Vec<Change>,
    message: Option<String>,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::build(SyncConfig::default())
    }
}

impl SyncSession {
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        info!(
            page_size = config.page_size,
            min_parcel_zoom = config.min_parcel_zoom,
            viewer = ?config.viewer,
            "sync session configured"
        );
        Ok(Self::build(config))
    }

    fn build(config: SyncConfig) -> Self {
        Self {
            seq: RequestSequencer::new(),
            list: ListState::new(&config),
            viewport: ViewportState::new(&config),
            selection: SelectionModel::new(),
            suggest: SuggestState::new(&config),
            pending: HashMap::new(),
            edit_origins: HashMap::new(),
            changes: Vec::new(),
            message: None,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn list(&self) -> &ListState {
        &self.list
    }

    #[must_use]
    pub fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    #[must_use]
    pub fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    #[must_use]
    pub fn suggestions(&self) -> &[Suggestion] {
        self.suggest.results()
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn dismiss_message(&mut self) {
        self.message = None;
    }

    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn can_mutate(&self) -> bool {
        self.config.viewer.can_mutate()
    }

    /// Drains the notifications recorded since the last call.
    pub fn take_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }

    #[must_use]
    pub fn check_consistency(&self) -> Vec<Inconsistency> {
        check_consistency(&self.list, self.viewport.index())
    }

    // --- list ---

    pub fn start(&mut self) -> ApiCall {
        self.reload(false, false)
    }

    #[instrument(skip(self))]
    pub fn reload(&mut self, preserve_scroll: bool, preserve_selection: bool) -> ApiCall {
        self.reload_with(ReloadOverrides::default(), preserve_scroll, preserve_selection)
    }

    fn reload_with(
        &mut self,
        overrides: ReloadOverrides,
        preserve_scroll: bool,
        preserve_selection: bool,
    ) -> ApiCall {
        if preserve_selection {
            self.selection.stash();
        } else {
            if !self.selection.is_empty() {
                self.changes.push(Change::SelectionChanged);
            }
            self.selection.clear();
        }
        let req = self
            .list
            .reload(&mut self.seq, overrides, preserve_scroll, &mut self.changes);
        api::list_addresses(&self.config, req.token, &req.query)
    }

    pub fn load_more(&mut self) -> Option<ApiCall> {
        let req = self.list.load_more(&mut self.seq, &mut self.changes)?;
        Some(api::list_addresses(&self.config, req.token, &req.query))
    }

    pub fn set_scroll_offset(&mut self, offset: f64) {
        self.list.set_scroll_offset(offset);
    }

    #[instrument(skip(self, result), fields(epoch = token.epoch()))]
    pub fn list_loaded(
        &mut self,
        token: RequestToken,
        result: SyncResult<api::ListAddressesResponse>,
    ) {
        let outcome = self
            .list
            .apply_response(&mut self.seq, token, result, &mut self.changes);
        match outcome {
            ListOutcome::Merged(LoadKind::Reload) if self.selection.has_stash() => {
                let list = &self.list;
                self.selection.restore(|id| list.contains(id));
                self.changes.push(Change::SelectionChanged);
            }
            ListOutcome::Merged(_) => {
                if self.message.is_some() {
                    self.message = None;
                }
            }
            ListOutcome::Failed => {
                if self.selection.has_stash() {
                    self.selection.restore(|_| false);
                    self.changes.push(Change::SelectionChanged);
                }
            }
            ListOutcome::Dropped => {}
        }
    }

    // --- filters and sort ---

    fn reload_filters(&mut self, filters: FilterSpec) -> ApiCall {
        self.reload_with(
            ReloadOverrides {
                filters: Some(filters),
                sort: None,
            },
            false,
            false,
        )
    }

    pub fn set_filter(&mut self, field: &str, values: Vec<String>) -> ApiCall {
        let mut filters = self.list.filters().clone();
        filters.set(field, values);
        self.reload_filters(filters)
    }

    /// `None` when the value was already present.
    pub fn add_filter_value(&mut self, field: &str, value: &str) -> Option<ApiCall> {
        let mut filters = self.list.filters().clone();
        filters
            .add_value(field, value)
            .then(|| self.reload_filters(filters))
    }

    pub fn remove_filter_value(&mut self, field: &str, value: &str) -> Option<ApiCall> {
        let mut filters = self.list.filters().clone();
        filters
            .remove_value(field, value)
            .then(|| self.reload_filters(filters))
    }

    pub fn set_status(&mut self, raw: &str) -> SyncResult<ApiCall> {
        let status = StatusFacet::parse(raw)?;
        let mut filters = self.list.filters().clone();
        filters.set_status(status);
        Ok(self.reload_filters(filters))
    }

    pub fn clear_filters(&mut self) -> ApiCall {
        self.reload_filters(FilterSpec::new())
    }

    pub fn toggle_sort(&mut self, field: &str) -> ApiCall {
        let mut sort = self.list.sort().clone();
        let direction = sort.toggle(field);
        debug!(field, ?direction, "sort toggled");
        self.reload_with(
            ReloadOverrides {
                filters: None,
                sort: Some(sort),
            },
            false,
            false,
        )
    }

    // --- map ---

    pub fn viewport_changed(&mut self, bounds: Bounds, zoom: f64) -> Option<ApiCall> {
        let req = self
            .viewport
            .on_viewport_changed(bounds, zoom, &mut self.seq, &mut self.changes)?;
        Some(api::list_parcels(&self.config, req.token, &req.bounds))
    }

    #[instrument(skip(self, result), fields(epoch = token.epoch()))]
    pub fn parcels_loaded(&mut self, token: RequestToken, result: SyncResult<Vec<Parcel>>) {
        self.viewport
            .apply_response(&mut self.seq, token, result, &mut self.changes);
    }

    pub fn hover_parcel(&mut self, pl: Option<ParcelKey>) {
        self.viewport.hover(pl);
    }

    pub fn click_parcel(&mut self, pl: &ParcelKey) -> bool {
        self.viewport.click(pl, &mut self.changes)
    }

    // --- selection ---

    fn deny(&mut self, action: &str) -> SyncError {
        warn!(action, "refused for read-only viewer");
        let err = SyncError::PermissionDenied {
            action: action.to_string(),
        };
        self.report_error(None, &err);
        err
    }

    /// Returns whether the row is selected afterwards.
    pub fn toggle_row(&mut self, id: AddressId) -> SyncResult<bool> {
        if !self.can_mutate() {
            return Err(self.deny("select"));
        }
        if !self.selection.is_select_all() && !self.list.contains(id) {
            debug!(%id, "ignoring toggle for row outside the window");
            return Ok(false);
        }
        let selected = self.selection.toggle(id);
        self.changes.push(Change::SelectionChanged);
        Ok(selected)
    }

    pub fn select_all(&mut self, on: bool) -> SyncResult<()> {
        if !self.can_mutate() {
            return Err(self.deny("select"));
        }
        self.selection.set_select_all(on);
        self.changes.push(Change::SelectionChanged);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        if !self.selection.is_empty() {
            self.selection.clear();
            self.changes.push(Change::SelectionChanged);
        }
    }

    /// Whether the focused parcel should offer "map selected addresses here".
    #[must_use]
    pub fn offers_association(&self) -> bool {
        self.can_mutate()
            && self
                .viewport
                .focused()
                .is_some_and(|p| self.selection.offers_association(p))
    }

    // --- mutations ---

    /// Remembers the street as it was when editing began.
    pub fn begin_edit(&mut self, id: AddressId) {
        if let Some(row) = self.list.row(id) {
            self.edit_origins.insert(id, row.street.clone());
        }
    }

    #[instrument(skip(self, action), fields(action = action.name()))]
    pub fn perform(&mut self, action: Action, scope: ActionScope) -> SyncResult<ApiCall> {
        if !self.can_mutate() {
            return Err(self.deny(action.name()));
        }

        let (kind, pl) = match &action {
            Action::Flag => (MutationKind::Flag, None),
            Action::Approve => (MutationKind::Approve, None),
            Action::Reject => (MutationKind::Reject, None),
            Action::Associate { target } => (MutationKind::Associate, Some(target.clone())),
            Action::Delete => (MutationKind::Delete, None),
            Action::EditFields { id, fields } => {
                let id = *id;
                let body = EditRequest {
                    id,
                    fields: fields.clone(),
                };
                let street_at_start = self
                    .edit_origins
                    .remove(&id)
                    .or_else(|| self.list.row(id).map(|a| a.street.clone()));
                let mutation = MutationId::generate();
                self.pending.insert(
                    mutation,
                    PendingMutation {
                        action,
                        target: BulkTarget::Ids { ids: vec![id] },
                        street_at_start,
                    },
                );
                return Ok(api::edit(&self.config, mutation, body));
            }
        };

        let target = match scope {
            ActionScope::Selection => self.selection.to_target(self.list.filters()),
            ActionScope::Row(id) => BulkTarget::Ids { ids: vec![id] },
        };
        if target.is_empty() {
            let err = SyncError::Validation {
                errors: vec![FieldError::new("Select at least one address.")],
            };
            self.message = Some(err.user_facing_message());
            return Err(err);
        }

        let mutation = MutationId::generate();
        let body = MutationRequest {
            action: kind,
            target: target.clone(),
            pl,
        };
        debug!(%mutation, "mutation issued");
        self.pending.insert(
            mutation,
            PendingMutation {
                action,
                target,
                street_at_start: None,
            },
        );
        Ok(api::mutate(&self.config, mutation, body))
    }

    /// Surfaces `err` inline, attached to a row when `id` is given.
    pub fn report_error(&mut self, id: Option<AddressId>, err: &SyncError) {
        warn!(error = %err, code = err.code(), "reporting error");
        let message = err.user_facing_message();
        self.changes.push(Change::InlineMessage {
            id,
            message: message.clone(),
        });
        self.message = Some(message);
    }

    /// Applies a finished association, approval or delete. Returns a reload
    /// when a select-all delete did not say which rows went away.
    #[instrument(skip(self, result), fields(mutation = %id))]
    pub fn mutation_completed(
        &mut self,
        id: MutationId,
        result: SyncResult<MutationResponse>,
    ) -> Option<ApiCall> {
        let Some(pending) = self.pending.remove(&id) else {
            debug!("unknown mutation id, ignoring");
            return None;
        };
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.report_error(None, &e);
                return None;
            }
        };
        if !response.success {
            if response.affected_addresses.is_empty() {
                self.report_error(
                    None,
                    &SyncError::Validation {
                        errors: vec![FieldError::new("The change could not be applied.")],
                    },
                );
                return None;
            }
            warn!(
                count = response.affected_addresses.len(),
                "partial mutation result"
            );
        }

        let deleted: Vec<AddressId> = match (&pending.action, &pending.target) {
            (Action::Delete, target) if response.affected_addresses.is_empty() => match target {
                BulkTarget::Ids { ids } => ids.clone(),
                BulkTarget::All { .. } => {
                    info!("bulk delete without listed rows, reloading");
                    return Some(self.reload(true, false));
                }
            },
            _ => response.affected_addresses.iter().map(|a| a.id).collect(),
        };

        let engine = AssociationSyncEngine::new(
            &mut self.list,
            self.viewport.index_mut(),
            &mut self.selection,
            &mut self.changes,
        );
        match pending.action {
            Action::Flag => {
                engine.set_approval(ApprovalAction::Flag, response);
            }
            Action::Approve => {
                engine.set_approval(ApprovalAction::Approve, response);
            }
            Action::Reject => {
                engine.set_approval(ApprovalAction::Reject, response);
            }
            Action::Associate { target } => {
                engine.associate(&target, response);
            }
            Action::Delete => {
                engine.delete(&deleted);
            }
            Action::EditFields { .. } => {
                warn!("edit completion delivered as mutation, ignoring");
            }
        }
        None
    }

    #[instrument(skip(self, result), fields(mutation = %id))]
    pub fn edit_completed(&mut self, id: MutationId, result: SyncResult<EditResponse>) {
        let Some(pending) = self.pending.remove(&id) else {
            debug!("unknown mutation id, ignoring");
            return;
        };
        let Action::EditFields { id: address, .. } = pending.action else {
            warn!("mutation completion delivered as edit, ignoring");
            return;
        };

        let outcome = result.and_then(|response| {
            AssociationSyncEngine::new(
                &mut self.list,
                self.viewport.index_mut(),
                &mut self.selection,
                &mut self.changes,
            )
            .edit_fields(address, pending.street_at_start.as_deref(), response)
        });

        match outcome {
            Ok(_) => self.message = None,
            Err(SyncError::Validation { errors }) => {
                for e in &errors {
                    let message = match &e.field {
                        Some(field) => format!("{field}: {}", e.message),
                        None => e.message.clone(),
                    };
                    self.changes.push(Change::InlineMessage {
                        id: Some(address),
                        message,
                    });
                }
                self.message = Some(SyncError::Validation { errors }.user_facing_message());
            }
            Err(e) => self.report_error(Some(address), &e),
        }
    }

    // --- autocomplete ---

    pub fn suggest_input(&mut self, raw: &str) -> Option<ApiCall> {
        match self.suggest.input(raw) {
            SuggestIntent::Cleared | SuggestIntent::Cached => {
                self.changes.push(Change::SuggestionsUpdated);
                None
            }
            SuggestIntent::Fetch(query) => Some(api::suggest(&self.config, &query)),
        }
    }

    pub fn suggestions_loaded(&mut self, query: &str, result: SyncResult<Vec<Suggestion>>) {
        if self.suggest.apply(query, result) {
            self.changes.push(Change::SuggestionsUpdated);
        }
    }

    /// Adds the chosen suggestion to the filter and reloads.
    pub fn choose_suggestion(&mut self, index: usize) -> Option<ApiCall> {
        let chosen = self.suggest.get(index).cloned()?;
        self.suggest.clear();
        self.changes.push(Change::SuggestionsUpdated);
        let mut filters = self.list.filters().clone();
        filters.add_value(chosen.field, chosen.value);
        Some(self.reload_filters(filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ListAddressesResponse;
    use crate::config::ViewerRole;
    use crate::model::Address;

    fn token_of(call: &ApiCall) -> RequestToken {
        match call {
            ApiCall::ListAddresses { token, .. } | ApiCall::ListParcels { token, .. } => *token,
            other => panic!("not a load call: {other:?}"),
        }
    }

    fn loaded(session: &mut SyncSession, ids: &[u64]) {
        let call = session.start();
        session.list_loaded(
            token_of(&call),
            Ok(ListAddressesResponse {
                addresses: ids
                    .iter()
                    .map(|id| Address::new(AddressId(*id), format!("{id} Elm")))
                    .collect(),
                count: None,
            }),
        );
    }

    #[test]
    fn untrusted_viewer_is_refused_without_request() {
        let mut session = SyncSession::new(SyncConfig {
            viewer: ViewerRole::Untrusted,
            ..SyncConfig::default()
        })
        .unwrap();
        loaded(&mut session, &[1]);
        let err = session.perform(Action::Delete, ActionScope::Row(AddressId(1))).unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied { .. }));
        assert_eq!(session.pending_mutations(), 0);
        assert!(session.message().is_some());
        assert!(session.toggle_row(AddressId(1)).is_err());
    }

    #[test]
    fn empty_selection_is_rejected() {
        let mut session = SyncSession::default();
        loaded(&mut session, &[1]);
        let err = session.perform(Action::Approve, ActionScope::Selection).unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));
        assert_eq!(session.pending_mutations(), 0);
    }

    #[test]
    fn unknown_mutation_id_is_ignored() {
        let mut session = SyncSession::default();
        loaded(&mut session, &[1]);
        let before = session.list().rows().to_vec();
        assert!(session
            .mutation_completed(MutationId::generate(), Ok(MutationResponse::default()))
            .is_none());
        assert_eq!(session.list().rows(), before.as_slice());
    }

    #[test]
    fn filter_change_clears_selection() {
        let mut session = SyncSession::default();
        loaded(&mut session, &[1, 2]);
        session.toggle_row(AddressId(1)).unwrap();
        let call = session.add_filter_value("town", "Acton").unwrap();
        assert!(call.url().contains("town=Acton"));
        assert!(session.selection().is_empty());
        assert!(session.add_filter_value("town", "Acton").is_none());
    }

    #[test]
    fn preserving_reload_restores_surviving_selection() {
        let mut session = SyncSession::default();
        loaded(&mut session, &[1, 2]);
        session.toggle_row(AddressId(1)).unwrap();
        session.toggle_row(AddressId(2)).unwrap();

        let call = session.reload(true, true);
        session.list_loaded(
            token_of(&call),
            Ok(ListAddressesResponse {
                addresses: vec![Address::new(AddressId(2), "2 Elm")],
                count: None,
            }),
        );
        assert!(session.selection().is_selected(AddressId(2)));
        assert!(!session.selection().is_selected(AddressId(1)));
    }

    #[test]
    fn toggling_unmaterialized_row_is_ignored() {
        let mut session = SyncSession::default();
        loaded(&mut session, &[1]);
        assert!(!session.toggle_row(AddressId(99)).unwrap());
        assert!(session.selection().is_empty());
    }

    #[test]
    fn status_none_clears_facet() {
        let mut session = SyncSession::default();
        session.set_status("flagged").unwrap();
        assert_eq!(session.list().filters().status, Some(StatusFacet::Flagged));
        session.set_status("none").unwrap();
        assert_eq!(session.list().filters().status, None);
        assert!(session.set_status("maybe").is_err());
    }
}
