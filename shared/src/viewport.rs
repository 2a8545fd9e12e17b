use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::model::{AddressId, Bounds, MappedAddress, Parcel, ParcelKey};
use crate::sequencer::{Channel, RequestSequencer, RequestToken};
use crate::view::Change;

/// Parcels currently loaded for the viewport, keyed by `pl`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParcelIndex {
    parcels: BTreeMap<ParcelKey, Parcel>,
}

impl ParcelIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parcels(parcels: impl IntoIterator<Item = Parcel>) -> Self {
        let mut index = Self::new();
        index.replace_all(parcels);
        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    #[must_use]
    pub fn get(&self, pl: &ParcelKey) -> Option<&Parcel> {
        self.parcels.get(pl)
    }

    pub fn get_mut(&mut self, pl: &ParcelKey) -> Option<&mut Parcel> {
        self.parcels.get_mut(pl)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parcel> {
        self.parcels.values()
    }

    pub fn replace_all(&mut self, parcels: impl IntoIterator<Item = Parcel>) {
        self.parcels.clear();
        for parcel in parcels {
            if self.parcels.contains_key(&parcel.pl) {
                warn!(pl = %parcel.pl, "duplicate parcel in collection, keeping the last");
            }
            self.parcels.insert(parcel.pl.clone(), parcel);
        }
    }

    pub fn clear(&mut self) {
        self.parcels.clear();
    }

    /// Keys of every loaded parcel listing `id`.
    #[must_use]
    pub fn parcels_containing(&self, id: AddressId) -> Vec<ParcelKey> {
        self.parcels
            .values()
            .filter(|p| p.contains(id))
            .map(|p| p.pl.clone())
            .collect()
    }

    /// Adds or refreshes `entry` in parcel `pl`. Returns false if that
    /// parcel is not loaded.
    pub fn add_to_parcel(&mut self, pl: &ParcelKey, entry: MappedAddress) -> bool {
        match self.parcels.get_mut(pl) {
            Some(parcel) => {
                parcel.add_mapping(entry);
                true
            }
            None => false,
        }
    }

    /// Removes `id` from every parcel except `keep`.
    pub fn remove_from_parcels(&mut self, id: AddressId, keep: Option<&ParcelKey>) -> Vec<ParcelKey> {
        self.parcels
            .values_mut()
            .filter(|p| Some(&p.pl) != keep)
            .filter_map(|p| p.remove_mapping(id).then(|| p.pl.clone()))
            .collect()
    }

    pub fn set_review_flag(&mut self, id: AddressId, needs_review: bool) -> Vec<ParcelKey> {
        self.parcels
            .values_mut()
            .filter_map(|p| p.set_review_flag(id, needs_review).then(|| p.pl.clone()))
            .collect()
    }

    pub fn rename_street(&mut self, id: AddressId, street: &str) -> Vec<ParcelKey> {
        self.parcels
            .values_mut()
            .filter_map(|p| p.rename_street(id, street).then(|| p.pl.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParcelRequest {
    pub token: RequestToken,
    pub bounds: Bounds,
}

/// Map viewport, parcel index and the hovered/pinned parcel.
#[derive(Debug, Clone)]
pub struct ViewportState {
    min_parcel_zoom: f64,
    bounds: Option<Bounds>,
    zoom: Option<f64>,
    index: ParcelIndex,
    pinned: Option<ParcelKey>,
    hovered: Option<ParcelKey>,
    loading: bool,
}

impl ViewportState {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            min_parcel_zoom: config.min_parcel_zoom,
            bounds: None,
            zoom: None,
            index: ParcelIndex::new(),
            pinned: None,
            hovered: None,
            loading: false,
        }
    }

    #[must_use]
    pub fn index(&self) -> &ParcelIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut ParcelIndex {
        &mut self.index
    }

    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    #[must_use]
    pub fn zoom(&self) -> Option<f64> {
        self.zoom
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn pinned(&self) -> Option<&ParcelKey> {
        self.pinned.as_ref()
    }

    #[must_use]
    pub fn hovered(&self) -> Option<&ParcelKey> {
        self.hovered.as_ref()
    }

    #[must_use]
    pub fn parcels_visible(&self) -> bool {
        self.zoom.is_some_and(|z| z >= self.min_parcel_zoom)
    }

    pub fn on_viewport_changed(
        &mut self,
        bounds: Bounds,
        zoom: f64,
        seq: &mut RequestSequencer,
        changes: &mut Vec<Change>,
    ) -> Option<ParcelRequest> {
        self.bounds = Some(bounds);
        self.zoom = Some(zoom);

        if !zoom.is_finite() || zoom < self.min_parcel_zoom {
            debug!(zoom, min = self.min_parcel_zoom, "below parcel zoom, clearing index");
            seq.invalidate(Channel::Parcels);
            if self.loading {
                self.loading = false;
                changes.push(Change::Loading {
                    channel: Channel::Parcels,
                    active: false,
                });
            }
            if !self.index.is_empty() {
                self.index.clear();
                changes.push(Change::ParcelsCleared);
            }
            self.pinned = None;
            self.hovered = None;
            return None;
        }

        let token = seq.begin(Channel::Parcels);
        if !self.loading {
            self.loading = true;
            changes.push(Change::Loading {
                channel: Channel::Parcels,
                active: true,
            });
        }
        Some(ParcelRequest { token, bounds })
    }

    /// Replaces the index with an accepted parcel load. Failures keep the
    /// previous parcels on screen until the next viewport change.
    pub fn apply_response(
        &mut self,
        seq: &mut RequestSequencer,
        token: RequestToken,
        result: SyncResult<Vec<Parcel>>,
        changes: &mut Vec<Change>,
    ) -> bool {
        if !seq.accept(token) {
            return false;
        }
        self.loading = false;
        changes.push(Change::Loading {
            channel: Channel::Parcels,
            active: false,
        });

        match result {
            Ok(parcels) => {
                self.index.replace_all(parcels);
                self.pinned = None;
                self.hovered = None;
                info!(epoch = token.epoch(), count = self.index.len(), "parcel index replaced");
                changes.push(Change::ParcelsReplaced {
                    count: self.index.len(),
                });
                true
            }
            Err(e) => {
                let e = e.on_channel(Channel::Parcels);
                warn!(epoch = token.epoch(), error = %e, "parcel load failed");
                false
            }
        }
    }

    /// Returns true when the hovered parcel is the one to show.
    pub fn hover(&mut self, pl: Option<ParcelKey>) -> bool {
        if self.pinned.is_some() {
            return false;
        }
        let pl = pl.filter(|k| self.index.get(k).is_some());
        let changed = self.hovered != pl;
        self.hovered = pl;
        changed
    }

    /// Click toggles the pinned parcel; one at a time.
    pub fn click(&mut self, pl: &ParcelKey, changes: &mut Vec<Change>) -> bool {
        if self.index.get(pl).is_none() {
            return false;
        }
        if let Some(previous) = self.pinned.take() {
            if let Some(parcel) = self.index.get_mut(&previous) {
                parcel.selected = false;
            }
            changes.push(Change::ParcelRestyled {
                pl: previous.clone(),
            });
            if &previous == pl {
                return false;
            }
        }
        if let Some(parcel) = self.index.get_mut(pl) {
            parcel.selected = true;
        }
        self.pinned = Some(pl.clone());
        self.hovered = None;
        changes.push(Change::ParcelRestyled { pl: pl.clone() });
        true
    }

    /// The parcel whose info panel is showing: pinned first, then hovered.
    #[must_use]
    pub fn focused(&self) -> Option<&Parcel> {
        self.pinned
            .as_ref()
            .or(self.hovered.as_ref())
            .and_then(|pl| self.index.get(pl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::model::Address;

    fn bounds() -> Bounds {
        Bounds::new(42.0, -71.1, 42.1, -71.0).unwrap()
    }

    fn parcel(pl: &str, mapped: &[u64]) -> Parcel {
        let mut p = Parcel::new(ParcelKey::new(pl));
        for id in mapped {
            p.add_mapping(Address::new(AddressId(*id), format!("{id} St")).summary());
        }
        p
    }

    fn viewport() -> (ViewportState, RequestSequencer, Vec<Change>) {
        (
            ViewportState::new(&SyncConfig::default()),
            RequestSequencer::new(),
            Vec::new(),
        )
    }

    #[test]
    fn low_zoom_clears_and_issues_nothing() {
        let (mut vp, mut seq, mut changes) = viewport();
        let req = vp.on_viewport_changed(bounds(), 18.0, &mut seq, &mut changes).unwrap();
        vp.apply_response(&mut seq, req.token, Ok(vec![parcel("A", &[])]), &mut changes);
        assert_eq!(vp.index().len(), 1);

        assert!(vp.on_viewport_changed(bounds(), 12.0, &mut seq, &mut changes).is_none());
        assert!(vp.index().is_empty());
        assert!(changes.contains(&Change::ParcelsCleared));
        assert!(!vp.parcels_visible());
    }

    #[test]
    fn zooming_out_invalidates_outstanding_load() {
        let (mut vp, mut seq, mut changes) = viewport();
        let req = vp.on_viewport_changed(bounds(), 17.0, &mut seq, &mut changes).unwrap();
        vp.on_viewport_changed(bounds(), 10.0, &mut seq, &mut changes);
        assert!(!vp.apply_response(&mut seq, req.token, Ok(vec![parcel("A", &[])]), &mut changes));
        assert!(vp.index().is_empty());
    }

    #[test]
    fn late_response_loses_to_newer_one() {
        let (mut vp, mut seq, mut changes) = viewport();
        let five = vp.on_viewport_changed(bounds(), 18.0, &mut seq, &mut changes).unwrap();
        let six = vp.on_viewport_changed(bounds(), 18.0, &mut seq, &mut changes).unwrap();
        assert!(vp.apply_response(&mut seq, six.token, Ok(vec![parcel("SIX", &[])]), &mut changes));
        assert!(!vp.apply_response(&mut seq, five.token, Ok(vec![parcel("FIVE", &[])]), &mut changes));
        assert!(vp.index().get(&ParcelKey::new("SIX")).is_some());
        assert!(vp.index().get(&ParcelKey::new("FIVE")).is_none());
    }

    #[test]
    fn failure_keeps_stale_index() {
        let (mut vp, mut seq, mut changes) = viewport();
        let req = vp.on_viewport_changed(bounds(), 18.0, &mut seq, &mut changes).unwrap();
        vp.apply_response(&mut seq, req.token, Ok(vec![parcel("A", &[1])]), &mut changes);
        let req = vp.on_viewport_changed(bounds(), 18.0, &mut seq, &mut changes).unwrap();
        vp.apply_response(&mut seq, req.token, Err(SyncError::transport("timeout")), &mut changes);
        assert_eq!(vp.index().len(), 1);
        assert!(!vp.is_loading());
    }

    #[test]
    fn reload_drops_pinned_parcel() {
        let (mut vp, mut seq, mut changes) = viewport();
        let req = vp.on_viewport_changed(bounds(), 18.0, &mut seq, &mut changes).unwrap();
        vp.apply_response(&mut seq, req.token, Ok(vec![parcel("A", &[])]), &mut changes);
        assert!(vp.click(&ParcelKey::new("A"), &mut changes));
        assert!(vp.focused().unwrap().selected);

        let req = vp.on_viewport_changed(bounds(), 18.0, &mut seq, &mut changes).unwrap();
        vp.apply_response(&mut seq, req.token, Ok(vec![parcel("A", &[])]), &mut changes);
        assert!(vp.pinned().is_none());
        assert!(!vp.index().get(&ParcelKey::new("A")).unwrap().selected);
    }

    #[test]
    fn click_toggles_and_pins_one_at_a_time() {
        let (mut vp, mut seq, mut changes) = viewport();
        let req = vp.on_viewport_changed(bounds(), 18.0, &mut seq, &mut changes).unwrap();
        vp.apply_response(
            &mut seq,
            req.token,
            Ok(vec![parcel("A", &[]), parcel("B", &[])]),
            &mut changes,
        );
        let a = ParcelKey::new("A");
        let b = ParcelKey::new("B");
        assert!(vp.click(&a, &mut changes));
        assert!(vp.click(&b, &mut changes));
        assert!(!vp.index().get(&a).unwrap().selected);
        assert!(vp.index().get(&b).unwrap().selected);

        assert!(!vp.hover(Some(a.clone())));
        assert_eq!(vp.focused().unwrap().pl, b);

        assert!(!vp.click(&b, &mut changes));
        assert!(vp.pinned().is_none());
        assert!(vp.hover(Some(a.clone())));
        assert_eq!(vp.focused().unwrap().pl, a);
    }

    #[test]
    fn index_patches_by_address_id() {
        let mut index = ParcelIndex::from_parcels([parcel("A", &[1, 2]), parcel("B", &[3])]);
        assert_eq!(index.set_review_flag(AddressId(2), true), vec![ParcelKey::new("A")]);
        assert!(index.set_review_flag(AddressId(2), true).is_empty());
        assert_eq!(index.rename_street(AddressId(3), "3 Oak"), vec![ParcelKey::new("B")]);
        assert_eq!(
            index.remove_from_parcels(AddressId(1), None),
            vec![ParcelKey::new("A")]
        );
        assert!(!index.add_to_parcel(&ParcelKey::new("Z"), Address::new(AddressId(9), "x").summary()));
        assert_eq!(index.parcels_containing(AddressId(3)), vec![ParcelKey::new("B")]);
    }
}
