use tracing::{debug, error};

use crate::action::{Action, ActionScope};
use crate::api::{
    self, ApiCall, EditResponse, ListAddressesResponse, MutationResponse, Suggestion,
};
use crate::capabilities::Capabilities;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::event::Event;
use crate::model::{AddressId, Bounds, ParcelKey};
use crate::session::SyncSession;
use crate::view::{Change, ViewModel};

#[derive(Debug, Default)]
pub struct Model {
    pub session: SyncSession,
    /// Notifications produced by the most recent update.
    pub changes: Vec<Change>,
}

#[derive(Default)]
pub struct App;

fn body_of<T>(result: crux_http::Result<crux_http::Response<T>>) -> SyncResult<T> {
    match result {
        Ok(mut response) => response
            .take_body()
            .ok_or_else(|| SyncError::invalid_payload("response had no body")),
        Err(e) => Err(SyncError::transport(e.to_string())),
    }
}

impl App {
    fn dispatch(call: ApiCall, model: &mut Model, caps: &Capabilities) {
        debug!(url = call.url(), "dispatching request");
        match call {
            ApiCall::ListAddresses { token, url } => {
                caps.http
                    .get(&url)
                    .expect_json::<ListAddressesResponse>()
                    .send(move |result| Event::ListLoaded {
                        token,
                        result: Box::new(body_of(result)),
                    });
            }
            ApiCall::ListParcels { token, url } => {
                caps.http
                    .get(&url)
                    .expect_json::<geojson::FeatureCollection>()
                    .send(move |result| Event::ParcelsLoaded {
                        token,
                        result: Box::new(body_of(result).map(api::parcels_from_collection)),
                    });
            }
            ApiCall::Mutate { id, url, body } => match caps.http.post(&url).body_json(&body) {
                Ok(builder) => {
                    builder
                        .expect_json::<MutationResponse>()
                        .send(move |result| Event::MutationCompleted {
                            id,
                            result: Box::new(body_of(result)),
                        });
                }
                Err(e) => {
                    error!(error = %e, "mutation body could not be encoded");
                    let failed = Err(SyncError::invalid_payload(e.to_string()));
                    if let Some(follow_up) = model.session.mutation_completed(id, failed) {
                        Self::dispatch(follow_up, model, caps);
                    }
                }
            },
            ApiCall::Edit { id, url, body } => match caps.http.post(&url).body_json(&body) {
                Ok(builder) => {
                    builder
                        .expect_json::<EditResponse>()
                        .send(move |result| Event::EditCompleted {
                            id,
                            result: Box::new(body_of(result)),
                        });
                }
                Err(e) => {
                    error!(error = %e, "edit body could not be encoded");
                    model
                        .session
                        .edit_completed(id, Err(SyncError::invalid_payload(e.to_string())));
                }
            },
            ApiCall::Suggest { query, url } => {
                caps.http
                    .get(&url)
                    .expect_json::<Vec<Suggestion>>()
                    .send(move |result| Event::SuggestionsLoaded {
                        query,
                        result: Box::new(body_of(result)),
                    });
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        debug!(event = event.name(), user = event.is_user_initiated(), "update");

        let session = &mut model.session;
        let mut calls: Vec<ApiCall> = Vec::new();

        match event {
            Event::Noop => {}

            Event::Configure { config_json } => {
                match SyncConfig::from_json(&config_json).and_then(SyncSession::new) {
                    Ok(configured) => *session = configured,
                    Err(e) => session.report_error(None, &e),
                }
            }
            Event::Start => calls.push(session.start()),

            Event::Reload {
                preserve_scroll,
                preserve_selection,
            } => calls.push(session.reload(preserve_scroll, preserve_selection)),
            Event::LoadMore => calls.extend(session.load_more()),
            Event::Scrolled { offset } => session.set_scroll_offset(offset),

            Event::SetFilter { field, values } => calls.push(session.set_filter(&field, values)),
            Event::AddFilterValue { field, value } => {
                calls.extend(session.add_filter_value(&field, &value));
            }
            Event::RemoveFilterValue { field, value } => {
                calls.extend(session.remove_filter_value(&field, &value));
            }
            Event::SetStatus { status } => match session.set_status(&status) {
                Ok(call) => calls.push(call),
                Err(e) => session.report_error(None, &e),
            },
            Event::ClearFilters => calls.push(session.clear_filters()),
            Event::ToggleSort { field } => calls.push(session.toggle_sort(&field)),

            Event::ViewportChanged {
                south,
                west,
                north,
                east,
                zoom,
            } => match Bounds::new(south, west, north, east) {
                Ok(bounds) => calls.extend(session.viewport_changed(bounds, zoom)),
                Err(e) => debug!(error = %e, "ignoring viewport"),
            },
            Event::ParcelHovered { pl } => session.hover_parcel(pl.map(ParcelKey::new)),
            Event::ParcelClicked { pl } => {
                session.click_parcel(&ParcelKey::new(pl));
            }

            Event::RowToggled { id } => {
                if let Err(e) = session.toggle_row(AddressId(id)) {
                    debug!(error = %e, "row toggle refused");
                }
            }
            Event::SelectAll { on } => {
                if let Err(e) = session.select_all(on) {
                    debug!(error = %e, "select all refused");
                }
            }
            Event::ClearSelection => session.clear_selection(),

            Event::EditStarted { id } => session.begin_edit(AddressId(id)),
            Event::Perform { action, scope } => {
                let name = action.name();
                match session.perform(action, scope) {
                    Ok(call) => calls.push(call),
                    Err(e) => debug!(action = name, error = %e, "action not sent"),
                }
            }

            Event::SuggestInput { text } => calls.extend(session.suggest_input(&text)),
            Event::SuggestionChosen { index } => calls.extend(session.choose_suggestion(index)),

            Event::DismissMessage => session.dismiss_message(),

            Event::ListLoaded { token, result } => session.list_loaded(token, *result),
            Event::ParcelsLoaded { token, result } => session.parcels_loaded(token, *result),
            Event::MutationCompleted { id, result } => {
                calls.extend(session.mutation_completed(id, *result));
            }
            Event::EditCompleted { id, result } => session.edit_completed(id, *result),
            Event::SuggestionsLoaded { query, result } => {
                session.suggestions_loaded(&query, *result);
            }
        }

        for call in calls {
            Self::dispatch(call, model, caps);
        }

        model.changes = model.session.take_changes();
        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        ViewModel::build(&model.session, &model.changes)
    }
}

/// Convenience for shells that build actions from row buttons.
#[must_use]
pub fn row_action(action: Action, id: u64) -> Event {
    Event::Perform {
        action,
        scope: ActionScope::Row(AddressId(id)),
    }
}
