//! Applies authoritative mutation results to the address rows and the
//! parcel index together, so neither needs a reload.
//!
//! The server's result is the truth for exactly the addresses it lists.
//! Rows that are not materialized are skipped; parcels that are not loaded
//! are skipped. Within one address, removal from old parcels always happens
//! before insertion into the new one.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::action::ApprovalAction;
use crate::api::{EditResponse, MutationResponse, ParcelSummary};
use crate::error::{FieldError, SyncError, SyncResult};
use crate::list_state::ListState;
use crate::model::{Address, AddressId, ParcelKey};
use crate::selection::SelectionModel;
use crate::view::Change;
use crate::viewport::ParcelIndex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub rows_updated: usize,
    /// Affected addresses that are not in the materialized window.
    pub rows_missing: usize,
    pub parcels_touched: BTreeSet<ParcelKey>,
}

pub struct AssociationSyncEngine<'a> {
    list: &'a mut ListState,
    parcels: &'a mut ParcelIndex,
    selection: &'a mut SelectionModel,
    changes: &'a mut Vec<Change>,
    report: SyncReport,
    selection_changed: bool,
}

impl<'a> AssociationSyncEngine<'a> {
    pub fn new(
        list: &'a mut ListState,
        parcels: &'a mut ParcelIndex,
        selection: &'a mut SelectionModel,
        changes: &'a mut Vec<Change>,
    ) -> Self {
        Self {
            list,
            parcels,
            selection,
            changes,
            report: SyncReport::default(),
            selection_changed: false,
        }
    }

    pub fn associate(mut self, target: &ParcelKey, response: MutationResponse) -> SyncReport {
        for address in response.affected_addresses {
            if address.pl.as_ref() != Some(target) {
                warn!(
                    id = %address.id,
                    target = %target,
                    pl = ?address.pl,
                    "server linked address somewhere other than the requested parcel"
                );
            }
            self.apply_record(address, true);
        }
        self.apply_summaries(response.affected_parcel_summary);
        self.finish("associate")
    }

    pub fn set_approval(mut self, action: ApprovalAction, response: MutationResponse) -> SyncReport {
        for mut address in response.affected_addresses {
            match action {
                ApprovalAction::Flag => address.needs_review = true,
                ApprovalAction::Approve => address.needs_review = false,
                ApprovalAction::Reject => {
                    address.pl = None;
                    address.location = None;
                }
            }
            self.apply_record(address, false);
        }
        self.apply_summaries(response.affected_parcel_summary);
        self.finish(match action {
            ApprovalAction::Flag => "flag",
            ApprovalAction::Approve => "approve",
            ApprovalAction::Reject => "reject",
        })
    }

    pub fn delete(mut self, ids: &[AddressId]) -> SyncReport {
        for &id in ids {
            let touched = self.parcels.remove_from_parcels(id, None);
            self.report.parcels_touched.extend(touched);
            if self.list.remove_row(id).is_some() {
                self.report.rows_updated += 1;
                self.changes.push(Change::RowRemoved { id });
            } else {
                self.report.rows_missing += 1;
            }
            self.selection_changed |= self.selection.forget(id);
        }
        self.finish("delete")
    }

    /// Replaces one edited row. A validation failure leaves the row as it
    /// was and returns the field errors.
    pub fn edit_fields(
        mut self,
        id: AddressId,
        street_at_start: Option<&str>,
        response: EditResponse,
    ) -> SyncResult<SyncReport> {
        if !response.errors.is_empty() {
            return Err(SyncError::Validation {
                errors: response.errors,
            });
        }
        let address = match response.address {
            Some(address) if response.success => address,
            _ => {
                return Err(SyncError::Validation {
                    errors: vec![FieldError::new("The address could not be saved.")],
                })
            }
        };
        if address.id != id {
            return Err(SyncError::invalid_payload(format!(
                "edit of {id} answered with address {}",
                address.id
            )));
        }

        let street_changed = street_at_start.is_some_and(|s| s != address.street);
        let street = address.street.clone();
        self.apply_record(address, false);

        if street_changed {
            for pl in self.parcels.rename_street(id, &street) {
                self.changes.push(Change::MappingPatched {
                    pl: pl.clone(),
                    field: "street".into(),
                });
                self.report.parcels_touched.insert(pl);
            }
        }
        Ok(self.finish("edit_fields"))
    }

    /// `reorder` moves the address to the end of its parcel's list; without
    /// it an existing entry is updated in place.
    fn apply_record(&mut self, address: Address, reorder: bool) {
        let id = address.id;
        let keep = if reorder { None } else { address.pl.as_ref() };
        let removed = self.parcels.remove_from_parcels(id, keep);
        self.report.parcels_touched.extend(removed);

        if let Some(pl) = &address.pl {
            let entry = address.summary();
            let in_place = !reorder && self.parcels.get(pl).is_some_and(|p| p.contains(id));
            let touched = if in_place {
                self.parcels
                    .get_mut(pl)
                    .is_some_and(|p| p.set_review_flag(id, entry.needs_review))
            } else {
                self.parcels.add_to_parcel(pl, entry)
            };
            if touched {
                self.report.parcels_touched.insert(pl.clone());
            }
        }

        if self.list.replace_row(address) {
            self.report.rows_updated += 1;
            self.changes.push(Change::RowReplaced { id });
        } else {
            debug!(%id, "affected address not materialized");
            self.report.rows_missing += 1;
        }
    }

    fn apply_summaries(&mut self, summaries: Vec<ParcelSummary>) {
        for summary in summaries {
            if self.parcels.get(&summary.pl).is_none() {
                continue;
            }
            for entry in &summary.mapped_to {
                let removed = self.parcels.remove_from_parcels(entry.id, Some(&summary.pl));
                self.report.parcels_touched.extend(removed);
            }
            if let Some(parcel) = self.parcels.get_mut(&summary.pl) {
                parcel.set_mapped_to(summary.mapped_to);
            }
            self.report.parcels_touched.insert(summary.pl);
        }
    }

    fn finish(&mut self, action: &'static str) -> SyncReport {
        for pl in &self.report.parcels_touched {
            self.changes.push(Change::ParcelRestyled { pl: pl.clone() });
        }
        if self.selection_changed {
            self.changes.push(Change::SelectionChanged);
        }
        info!(
            action,
            rows = self.report.rows_updated,
            missing = self.report.rows_missing,
            parcels = self.report.parcels_touched.len(),
            "applied mutation result"
        );
        std::mem::take(&mut self.report)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// Row says `pl` but that loaded parcel does not list it.
    MissingFromParcel { id: AddressId, pl: ParcelKey },
    /// A loaded parcel lists an address whose row points elsewhere or nowhere.
    UnexpectedMembership { id: AddressId, pl: ParcelKey },
    DuplicateMembership { id: AddressId, pl: ParcelKey },
}

/// Checks that rows and loaded parcels agree on every link.
#[must_use]
pub fn check_consistency(list: &ListState, parcels: &ParcelIndex) -> Vec<Inconsistency> {
    let mut found = Vec::new();

    for row in list.rows() {
        if let Some(pl) = &row.pl {
            if parcels.get(pl).is_some_and(|p| !p.contains(row.id)) {
                found.push(Inconsistency::MissingFromParcel {
                    id: row.id,
                    pl: pl.clone(),
                });
            }
        }
        for holder in parcels.parcels_containing(row.id) {
            if row.pl.as_ref() != Some(&holder) {
                found.push(Inconsistency::UnexpectedMembership {
                    id: row.id,
                    pl: holder,
                });
            }
        }
    }

    for parcel in parcels.iter() {
        let mut seen = BTreeSet::new();
        for entry in parcel.mapped_to() {
            if !seen.insert(entry.id) {
                found.push(Inconsistency::DuplicateMembership {
                    id: entry.id,
                    pl: parcel.pl.clone(),
                });
            }
        }
    }

    found
}
