//! Per-channel request epochs.
//!
//! Every load on a channel is tagged with the epoch handed out by
//! [`RequestSequencer::begin`]. Beginning a new load supersedes the previous
//! one immediately: its token can no longer be accepted, whether or not the
//! transport ever honours the cancellation. A response is merged only when
//! [`RequestSequencer::accept`] says so, and at most once.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    List,
    Parcels,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Parcels => "parcels",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acceptance token for one issued load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestToken {
    channel: Channel,
    epoch: u64,
}

impl RequestToken {
    #[must_use]
    pub const fn channel(self) -> Channel {
        self.channel
    }

    #[must_use]
    pub const fn epoch(self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Default, Clone)]
struct ChannelSlot {
    epoch: u64,
    in_flight: Option<u64>,
}

#[derive(Debug, Default, Clone)]
pub struct RequestSequencer {
    list: ChannelSlot,
    parcels: ChannelSlot,
}

impl RequestSequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, channel: Channel) -> &ChannelSlot {
        match channel {
            Channel::List => &self.list,
            Channel::Parcels => &self.parcels,
        }
    }

    fn slot_mut(&mut self, channel: Channel) -> &mut ChannelSlot {
        match channel {
            Channel::List => &mut self.list,
            Channel::Parcels => &mut self.parcels,
        }
    }

    /// Starts a new load on `channel`, superseding any outstanding one.
    pub fn begin(&mut self, channel: Channel) -> RequestToken {
        let slot = self.slot_mut(channel);
        if let Some(previous) = slot.in_flight.take() {
            debug!(%channel, superseded = previous, "superseding in-flight request");
        }
        slot.epoch += 1;
        slot.in_flight = Some(slot.epoch);
        RequestToken {
            channel,
            epoch: slot.epoch,
        }
    }

    /// Bumps the epoch without issuing anything, so that whatever is still
    /// in flight on `channel` will be rejected.
    pub fn invalidate(&mut self, channel: Channel) {
        let slot = self.slot_mut(channel);
        if let Some(previous) = slot.in_flight.take() {
            debug!(%channel, superseded = previous, "invalidating in-flight request");
        }
        slot.epoch += 1;
    }

    /// Returns true if the response for `token` may be merged. A token is
    /// accepted at most once; stale and duplicate deliveries return false.
    pub fn accept(&mut self, token: RequestToken) -> bool {
        let slot = self.slot_mut(token.channel);
        if slot.epoch == token.epoch && slot.in_flight == Some(token.epoch) {
            slot.in_flight = None;
            true
        } else {
            debug!(
                channel = %token.channel,
                epoch = token.epoch,
                current = slot.epoch,
                "dropping stale response"
            );
            false
        }
    }

    #[must_use]
    pub fn current_epoch(&self, channel: Channel) -> u64 {
        self.slot(channel).epoch
    }

    #[must_use]
    pub fn is_in_flight(&self, channel: Channel) -> bool {
        self.slot(channel).in_flight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_increments_per_channel() {
        let mut seq = RequestSequencer::new();
        let a = seq.begin(Channel::List);
        let b = seq.begin(Channel::List);
        let p = seq.begin(Channel::Parcels);
        assert_eq!(a.epoch(), 1);
        assert_eq!(b.epoch(), 2);
        assert_eq!(p.epoch(), 1);
        assert_eq!(seq.current_epoch(Channel::List), 2);
    }

    #[test]
    fn superseded_token_is_rejected() {
        let mut seq = RequestSequencer::new();
        let old = seq.begin(Channel::Parcels);
        let new = seq.begin(Channel::Parcels);
        assert!(seq.accept(new));
        assert!(!seq.accept(old));
    }

    #[test]
    fn late_response_after_newer_merge_is_rejected() {
        let mut seq = RequestSequencer::new();
        let five = seq.begin(Channel::Parcels);
        let six = seq.begin(Channel::Parcels);
        assert!(seq.accept(six));
        assert!(!seq.accept(five));
        assert!(!seq.is_in_flight(Channel::Parcels));
    }

    #[test]
    fn token_is_accepted_once() {
        let mut seq = RequestSequencer::new();
        let t = seq.begin(Channel::List);
        assert!(seq.accept(t));
        assert!(!seq.accept(t));
    }

    #[test]
    fn channels_are_independent() {
        let mut seq = RequestSequencer::new();
        let list = seq.begin(Channel::List);
        seq.begin(Channel::Parcels);
        seq.begin(Channel::Parcels);
        assert!(seq.accept(list));
    }

    #[test]
    fn invalidate_rejects_outstanding() {
        let mut seq = RequestSequencer::new();
        let t = seq.begin(Channel::Parcels);
        seq.invalidate(Channel::Parcels);
        assert!(!seq.is_in_flight(Channel::Parcels));
        assert!(!seq.accept(t));
    }
}
