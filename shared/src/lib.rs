//! Client-side synchronization core for an address list and a parcel map.
//!
//! All state lives in [`SyncSession`]; the Crux [`App`] translates events
//! into session calls and the session's [`api::ApiCall`]s into HTTP effects.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod action;
pub mod api;
pub mod app;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod event;
pub mod list_state;
pub mod model;
pub mod selection;
pub mod sequencer;
pub mod session;
pub mod suggest;
pub mod sync_engine;
pub mod view;
pub mod viewport;

pub use action::{Action, ActionScope, ApprovalAction};
pub use app::{App, Model};
pub use capabilities::{Capabilities, Effect};
pub use config::{SyncConfig, ViewerRole};
pub use crux_core::App as CruxApp;
pub use error::{ErrorKind, FieldError, SyncError, SyncResult};
pub use event::Event;
pub use model::{Address, AddressId, Bounds, FilterSpec, Parcel, ParcelKey, StatusFacet};
pub use selection::{BulkTarget, Selection, SelectionModel};
pub use sequencer::{Channel, RequestSequencer, RequestToken};
pub use session::SyncSession;
pub use sync_engine::{AssociationSyncEngine, Inconsistency, SyncReport};
pub use view::{Change, ViewModel};
