use crux_core::testing::AppTester;
use parcel_sync::app::row_action;
use parcel_sync::{Action, App, CruxApp, Effect, Event, Model};

fn http_count(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::Http(_)))
        .count()
}

#[test]
fn start_requests_first_page_and_renders() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(Event::Start, &mut model);
    assert_eq!(http_count(&update.effects), 1);
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Render(_))));
    assert!(model.session.list().rows().is_empty());

    // The first page is still outstanding.
    let update = app.update(Event::LoadMore, &mut model);
    assert_eq!(http_count(&update.effects), 0);
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Render(_))));
}

#[test]
fn low_zoom_viewport_makes_no_request() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(
        Event::ViewportChanged {
            south: 42.0,
            west: -71.1,
            north: 42.1,
            east: -71.0,
            zoom: 11.0,
        },
        &mut model,
    );
    assert_eq!(http_count(&update.effects), 0);

    let update = app.update(
        Event::ViewportChanged {
            south: 42.0,
            west: -71.1,
            north: 42.1,
            east: -71.0,
            zoom: 18.0,
        },
        &mut model,
    );
    assert_eq!(http_count(&update.effects), 1);
}

#[test]
fn read_only_viewer_cannot_mutate() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(
        Event::Configure {
            config_json: r#"{"viewer": "untrusted"}"#.to_string(),
        },
        &mut model,
    );
    assert!(!model.session.can_mutate());

    let update = app.update(row_action(Action::Approve, 3), &mut model);
    assert_eq!(http_count(&update.effects), 0);

    let view = App.view(&model);
    assert!(!view.checkboxes_enabled);
    assert!(view.message.is_some());
}

#[test]
fn bad_configuration_keeps_defaults_and_reports() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(
        Event::Configure {
            config_json: r#"{"page_size": 0}"#.to_string(),
        },
        &mut model,
    );
    assert_eq!(model.session.config().page_size, 50);
    assert!(model.session.message().is_some());

    app.update(Event::DismissMessage, &mut model);
    assert!(model.session.message().is_none());
}

#[test]
fn short_autocomplete_input_skips_the_network() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(
        Event::SuggestInput {
            text: "a".to_string(),
        },
        &mut model,
    );
    assert_eq!(http_count(&update.effects), 0);

    let update = app.update(
        Event::SuggestInput {
            text: "acton".to_string(),
        },
        &mut model,
    );
    assert_eq!(http_count(&update.effects), 1);
}
