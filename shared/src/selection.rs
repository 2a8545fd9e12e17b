use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::{AddressId, FilterSpec, Parcel};

/// How a bulk action names its addresses on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BulkTarget {
    All {
        #[serde(rename = "selectAll")]
        select_all: bool,
        filters: FilterSpec,
        #[serde(rename = "excludedIds")]
        excluded_ids: Vec<AddressId>,
    },
    Ids {
        ids: Vec<AddressId>,
    },
}

impl BulkTarget {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::All { .. } => false,
            Self::Ids { ids } => ids.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Selection {
    Explicit { ids: BTreeSet<AddressId> },
    /// Everything matching the current filter except `excluded`.
    AllExcept { excluded: BTreeSet<AddressId> },
}

impl Default for Selection {
    fn default() -> Self {
        Self::Explicit {
            ids: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionModel {
    selection: Selection,
    stashed: Option<BTreeSet<AddressId>>,
}

impl SelectionModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    #[must_use]
    pub fn is_select_all(&self) -> bool {
        matches!(self.selection, Selection::AllExcept { .. })
    }

    #[must_use]
    pub fn is_selected(&self, id: AddressId) -> bool {
        match &self.selection {
            Selection::Explicit { ids } => ids.contains(&id),
            Selection::AllExcept { excluded } => !excluded.contains(&id),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.selection {
            Selection::Explicit { ids } => ids.is_empty(),
            Selection::AllExcept { .. } => false,
        }
    }

    /// Flips one row. Under select-all this edits the exclusion list.
    /// Returns whether the row is selected afterwards.
    pub fn toggle(&mut self, id: AddressId) -> bool {
        let set = match &mut self.selection {
            Selection::Explicit { ids } => ids,
            Selection::AllExcept { excluded } => excluded,
        };
        if !set.remove(&id) {
            set.insert(id);
        }
        self.is_selected(id)
    }

    pub fn set_select_all(&mut self, on: bool) {
        self.selection = if on {
            Selection::AllExcept {
                excluded: BTreeSet::new(),
            }
        } else {
            Selection::default()
        };
    }

    pub fn clear(&mut self) {
        self.selection = Selection::default();
        self.stashed = None;
    }

    /// Drops an id that no longer exists, from whichever set holds it.
    pub fn forget(&mut self, id: AddressId) -> bool {
        match &mut self.selection {
            Selection::Explicit { ids } => ids.remove(&id),
            Selection::AllExcept { excluded } => excluded.remove(&id),
        }
    }

    /// Keeps explicit ids only while `present` says the row is materialized.
    pub fn retain_materialized(&mut self, present: impl Fn(AddressId) -> bool) -> bool {
        match &mut self.selection {
            Selection::Explicit { ids } => {
                let before = ids.len();
                ids.retain(|id| present(*id));
                before != ids.len()
            }
            Selection::AllExcept { .. } => false,
        }
    }

    /// Moves explicit ids aside while the rows are cleared for a reload.
    /// A reload that supersedes an unmerged one adds to the same stash.
    pub fn stash(&mut self) {
        if let Selection::Explicit { ids } = &mut self.selection {
            self.stashed
                .get_or_insert_with(BTreeSet::new)
                .extend(std::mem::take(ids));
        }
    }

    /// Brings back the stashed ids whose rows reappeared.
    pub fn restore(&mut self, present: impl Fn(AddressId) -> bool) {
        let Some(stashed) = self.stashed.take() else {
            return;
        };
        if let Selection::Explicit { ids } = &mut self.selection {
            ids.extend(stashed.into_iter().filter(|id| present(*id)));
        }
    }

    #[must_use]
    pub fn has_stash(&self) -> bool {
        self.stashed.is_some()
    }

    /// The ids this selection resolves to over a known universe.
    pub fn effective(&self, universe: impl IntoIterator<Item = AddressId>) -> BTreeSet<AddressId> {
        universe.into_iter().filter(|id| self.is_selected(*id)).collect()
    }

    #[must_use]
    pub fn to_target(&self, filters: &FilterSpec) -> BulkTarget {
        match &self.selection {
            Selection::Explicit { ids } => BulkTarget::Ids {
                ids: ids.iter().copied().collect(),
            },
            Selection::AllExcept { excluded } => BulkTarget::All {
                select_all: true,
                filters: filters.clone(),
                excluded_ids: excluded.iter().copied().collect(),
            },
        }
    }

    /// Whether "map selected addresses to this parcel" makes sense: always
    /// under select-all, otherwise only if some selected id is not already
    /// mapped there.
    #[must_use]
    pub fn offers_association(&self, parcel: &Parcel) -> bool {
        match &self.selection {
            Selection::AllExcept { .. } => true,
            Selection::Explicit { ids } => ids.iter().any(|id| !parcel.contains(*id)),
        }
    }
}
