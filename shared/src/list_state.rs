use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{ListAddressesResponse, ListQuery};
use crate::config::{SyncConfig, ViewerRole};
use crate::error::SyncResult;
use crate::model::{Address, AddressId, FilterSpec, SortSpec};
use crate::sequencer::{Channel, RequestSequencer, RequestToken};
use crate::view::Change;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListPhase {
    #[default]
    Idle,
    Loading,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Reload,
    Append,
}

/// Parameters a reload replaces; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ReloadOverrides {
    pub filters: Option<FilterSpec>,
    pub sort: Option<SortSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    pub token: RequestToken,
    pub query: ListQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOutcome {
    /// Superseded or duplicate; nothing changed.
    Dropped,
    Merged(LoadKind),
    Failed,
}

#[derive(Debug, Clone)]
struct PendingLoad {
    token: RequestToken,
    kind: LoadKind,
    restore_scroll: Option<f64>,
}

/// The materialized window of the address collection and the parameters it
/// was loaded with.
#[derive(Debug, Clone)]
pub struct ListState {
    rows: Vec<Address>,
    filters: FilterSpec,
    sort: SortSpec,
    page_size: usize,
    viewer: ViewerRole,
    phase: ListPhase,
    more_available: bool,
    end_of_data: bool,
    total_count: Option<usize>,
    scroll_offset: f64,
    pending: Option<PendingLoad>,
}

impl ListState {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            rows: Vec::new(),
            filters: FilterSpec::new(),
            sort: SortSpec::new(config.sort_fields.iter().cloned()),
            page_size: config.page_size,
            viewer: config.viewer,
            phase: ListPhase::Idle,
            more_available: true,
            end_of_data: false,
            total_count: None,
            scroll_offset: 0.0,
            pending: None,
        }
    }

    #[must_use]
    pub fn rows(&self) -> &[Address] {
        &self.rows
    }

    #[must_use]
    pub fn row(&self, id: AddressId) -> Option<&Address> {
        self.rows.iter().find(|a| a.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: AddressId) -> bool {
        self.row(id).is_some()
    }

    #[must_use]
    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    #[must_use]
    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    #[must_use]
    pub fn phase(&self) -> ListPhase {
        self.phase
    }

    #[must_use]
    pub fn more_available(&self) -> bool {
        self.more_available
    }

    #[must_use]
    pub fn end_of_data(&self) -> bool {
        self.end_of_data
    }

    #[must_use]
    pub fn total_count(&self) -> Option<usize> {
        self.total_count
    }

    #[must_use]
    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    pub fn set_scroll_offset(&mut self, offset: f64) {
        if offset.is_finite() {
            self.scroll_offset = offset.max(0.0);
        }
    }

    /// Clears the window and starts over from the first page.
    pub fn reload(
        &mut self,
        seq: &mut RequestSequencer,
        overrides: ReloadOverrides,
        preserve_scroll: bool,
        changes: &mut Vec<Change>,
    ) -> ListRequest {
        if let Some(filters) = overrides.filters {
            self.filters = filters;
        }
        if let Some(sort) = overrides.sort {
            self.sort = sort;
        }

        let restore_scroll = if preserve_scroll {
            Some(self.scroll_offset)
        } else {
            self.scroll_offset = 0.0;
            changes.push(Change::ScrollTo { offset: 0.0 });
            None
        };

        self.rows.clear();
        changes.push(Change::RowsCleared);
        self.more_available = true;
        self.end_of_data = false;
        self.total_count = None;

        self.begin(seq, LoadKind::Reload, restore_scroll, 0, changes)
    }

    /// Requests the page after the materialized rows. `None` when the end was
    /// reached or a list load is already outstanding.
    pub fn load_more(
        &mut self,
        seq: &mut RequestSequencer,
        changes: &mut Vec<Change>,
    ) -> Option<ListRequest> {
        if !self.more_available {
            debug!("load_more ignored: no more rows");
            return None;
        }
        if self.phase == ListPhase::Loading || seq.is_in_flight(Channel::List) {
            debug!("load_more ignored: list load in flight");
            return None;
        }
        let start = self.rows.len();
        Some(self.begin(seq, LoadKind::Append, None, start, changes))
    }

    fn begin(
        &mut self,
        seq: &mut RequestSequencer,
        kind: LoadKind,
        restore_scroll: Option<f64>,
        start: usize,
        changes: &mut Vec<Change>,
    ) -> ListRequest {
        let token = seq.begin(Channel::List);
        self.pending = Some(PendingLoad {
            token,
            kind,
            restore_scroll,
        });
        self.phase = ListPhase::Loading;
        changes.push(Change::Loading {
            channel: Channel::List,
            active: true,
        });
        ListRequest {
            token,
            query: ListQuery {
                filters: self.filters.clone(),
                sort: self.sort.clone(),
                start,
                count: self.page_size,
            },
        }
    }

    /// Merges a list response if `token` is still the current one.
    pub fn apply_response(
        &mut self,
        seq: &mut RequestSequencer,
        token: RequestToken,
        result: SyncResult<ListAddressesResponse>,
        changes: &mut Vec<Change>,
    ) -> ListOutcome {
        if !seq.accept(token) {
            return ListOutcome::Dropped;
        }
        let Some(pending) = self.pending.take().filter(|p| p.token == token) else {
            return ListOutcome::Dropped;
        };

        changes.push(Change::Loading {
            channel: Channel::List,
            active: false,
        });

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                let e = e.on_channel(Channel::List);
                warn!(epoch = token.epoch(), error = %e, "address load failed");
                self.phase = ListPhase::Failed;
                changes.push(Change::LoadFailed {
                    channel: Channel::List,
                    message: e.user_facing_message(),
                });
                return ListOutcome::Failed;
            }
        };

        self.phase = ListPhase::Idle;

        if page.addresses.is_empty() {
            self.mark_end(changes);
        } else {
            for address in page.addresses {
                let id = address.id;
                match self.rows.iter_mut().find(|a| a.id == id) {
                    Some(row) => {
                        *row = address;
                        changes.push(Change::RowReplaced { id });
                    }
                    None => {
                        self.rows.push(address);
                        changes.push(Change::RowAppended { id });
                    }
                }
            }
        }

        if let Some(total) = page.count {
            self.total_count = Some(total);
            if self.rows.len() >= total && self.more_available {
                self.mark_end(changes);
            }
        }

        if !self.viewer.can_mutate() {
            changes.push(Change::CheckboxesDisabled);
        }

        if let Some(offset) = pending.restore_scroll {
            self.scroll_offset = offset;
            changes.push(Change::ScrollTo { offset });
        }

        info!(
            epoch = token.epoch(),
            count = self.rows.len(),
            "merged address page"
        );
        ListOutcome::Merged(pending.kind)
    }

    fn mark_end(&mut self, changes: &mut Vec<Change>) {
        self.more_available = false;
        self.end_of_data = true;
        changes.push(Change::EndOfData);
    }

    /// Swaps in a fresher copy of a materialized row; absent rows are left
    /// alone.
    pub fn replace_row(&mut self, address: Address) -> bool {
        match self.rows.iter_mut().find(|a| a.id == address.id) {
            Some(row) => {
                *row = address;
                true
            }
            None => false,
        }
    }

    pub fn remove_row(&mut self, id: AddressId) -> Option<Address> {
        let idx = self.rows.iter().position(|a| a.id == id)?;
        Some(self.rows.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    fn page(ids: &[u64], count: Option<usize>) -> ListAddressesResponse {
        ListAddressesResponse {
            addresses: ids
                .iter()
                .map(|id| Address::new(AddressId(*id), format!("{id} Main St")))
                .collect(),
            count,
        }
    }

    fn state() -> (ListState, RequestSequencer, Vec<Change>) {
        (
            ListState::new(&SyncConfig::default()),
            RequestSequencer::new(),
            Vec::new(),
        )
    }

    #[test]
    fn reload_then_load_more_appends() {
        let (mut list, mut seq, mut changes) = state();
        let req = list.reload(&mut seq, ReloadOverrides::default(), false, &mut changes);
        assert_eq!(req.query.start, 0);
        assert_eq!(req.query.count, 50);
        assert_eq!(
            list.apply_response(&mut seq, req.token, Ok(page(&[1, 2], None)), &mut changes),
            ListOutcome::Merged(LoadKind::Reload)
        );

        let more = list.load_more(&mut seq, &mut changes).unwrap();
        assert_eq!(more.query.start, 2);
        list.apply_response(&mut seq, more.token, Ok(page(&[3], None)), &mut changes);
        let ids: Vec<_> = list.rows().iter().map(|a| a.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn load_more_while_loading_is_noop() {
        let (mut list, mut seq, mut changes) = state();
        list.reload(&mut seq, ReloadOverrides::default(), false, &mut changes);
        let epoch = seq.current_epoch(Channel::List);
        assert!(list.load_more(&mut seq, &mut changes).is_none());
        assert_eq!(seq.current_epoch(Channel::List), epoch);
    }

    #[test]
    fn empty_page_ends_data_and_blocks_load_more() {
        let (mut list, mut seq, mut changes) = state();
        let req = list.reload(&mut seq, ReloadOverrides::default(), false, &mut changes);
        list.apply_response(&mut seq, req.token, Ok(page(&[], None)), &mut changes);
        assert!(!list.more_available());
        assert!(list.end_of_data());
        assert!(changes.contains(&Change::EndOfData));
        assert!(list.load_more(&mut seq, &mut changes).is_none());
    }

    #[test]
    fn total_count_reached_ends_data() {
        let (mut list, mut seq, mut changes) = state();
        let req = list.reload(&mut seq, ReloadOverrides::default(), false, &mut changes);
        list.apply_response(&mut seq, req.token, Ok(page(&[1, 2], Some(2))), &mut changes);
        assert_eq!(list.total_count(), Some(2));
        assert!(!list.more_available());
    }

    #[test]
    fn failure_keeps_more_available_and_rows() {
        let (mut list, mut seq, mut changes) = state();
        let req = list.reload(&mut seq, ReloadOverrides::default(), false, &mut changes);
        list.apply_response(&mut seq, req.token, Ok(page(&[1], None)), &mut changes);

        let more = list.load_more(&mut seq, &mut changes).unwrap();
        let outcome = list.apply_response(
            &mut seq,
            more.token,
            Err(SyncError::transport("connection reset")),
            &mut changes,
        );
        assert_eq!(outcome, ListOutcome::Failed);
        assert_eq!(list.phase(), ListPhase::Failed);
        assert!(list.more_available());
        assert_eq!(list.rows().len(), 1);
        assert!(matches!(
            changes.last(),
            Some(Change::LoadFailed { channel: Channel::List, .. })
        ));
        // the user re-triggers by scrolling again
        assert!(list.load_more(&mut seq, &mut changes).is_some());
    }

    #[test]
    fn stale_reload_response_is_dropped() {
        let (mut list, mut seq, mut changes) = state();
        let first = list.reload(&mut seq, ReloadOverrides::default(), false, &mut changes);
        let second = list.reload(&mut seq, ReloadOverrides::default(), false, &mut changes);
        assert_eq!(
            list.apply_response(&mut seq, second.token, Ok(page(&[2], None)), &mut changes),
            ListOutcome::Merged(LoadKind::Reload)
        );
        assert_eq!(
            list.apply_response(&mut seq, first.token, Ok(page(&[1], None)), &mut changes),
            ListOutcome::Dropped
        );
        assert_eq!(list.rows().len(), 1);
        assert_eq!(list.rows()[0].id, AddressId(2));
    }

    #[test]
    fn preserved_scroll_is_restored_after_merge() {
        let (mut list, mut seq, mut changes) = state();
        list.set_scroll_offset(480.0);
        let req = list.reload(&mut seq, ReloadOverrides::default(), true, &mut changes);
        assert!(!changes.contains(&Change::ScrollTo { offset: 0.0 }));
        list.apply_response(&mut seq, req.token, Ok(page(&[1], None)), &mut changes);
        assert_eq!(changes.last(), Some(&Change::ScrollTo { offset: 480.0 }));
    }

    #[test]
    fn overrides_replace_filters() {
        let (mut list, mut seq, mut changes) = state();
        let mut filters = FilterSpec::new();
        filters.add_value("town", "Acton");
        let req = list.reload(
            &mut seq,
            ReloadOverrides {
                filters: Some(filters.clone()),
                sort: None,
            },
            false,
            &mut changes,
        );
        assert_eq!(req.query.filters, filters);
        assert_eq!(list.filters(), &filters);
    }

    #[test]
    fn untrusted_viewer_gets_disabled_checkboxes_after_merge() {
        let config = SyncConfig {
            viewer: ViewerRole::Untrusted,
            ..SyncConfig::default()
        };
        let mut list = ListState::new(&config);
        let mut seq = RequestSequencer::new();
        let mut changes = Vec::new();
        let req = list.reload(&mut seq, ReloadOverrides::default(), false, &mut changes);
        list.apply_response(&mut seq, req.token, Ok(page(&[1], None)), &mut changes);
        assert!(changes.contains(&Change::CheckboxesDisabled));
    }
}
