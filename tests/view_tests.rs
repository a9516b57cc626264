//! View resolution through a flow session: default plugins working together
//! and data changes flowing back into the resolved view.

use player_core::{DataModelOptions, FlowDocument, FlowSession, PlayerConfig};
use serde_json::{json, Value};

fn session(view: Value, data: Value) -> FlowSession {
    let document: FlowDocument = serde_json::from_value(json!({
        "id": "flow",
        "views": [view],
        "data": data
    }))
    .unwrap();
    let session = FlowSession::new(document, &PlayerConfig::default()).unwrap();
    session.start(None).unwrap();
    session
}

fn current(session: &FlowSession) -> Value {
    session.current_view().unwrap().last_update().unwrap()
}

fn set(session: &FlowSession, path: &str, value: Value) {
    session
        .set(vec![(path.into(), value)], &DataModelOptions::default())
        .unwrap();
}

#[test]
fn test_static_templates_expand_from_data() {
    let session = session(
        json!({
            "id": "list",
            "template": [{
                "data": "people",
                "output": "items",
                "value": {"asset": {"id": "person-_index_", "type": "text", "value": "{{people._index_.name}}"}}
            }]
        }),
        json!({"people": [{"name": "ada"}, {"name": "grace"}]}),
    );

    let view = current(&session);
    assert_eq!(view["items"].as_array().unwrap().len(), 2);
    assert_eq!(view["items"][0]["asset"]["id"], json!("person-0"));
    assert_eq!(view["items"][1]["asset"]["value"], json!("grace"));
}

#[test]
fn test_refs_inside_template_items_stay_live() {
    let session = session(
        json!({
            "id": "list",
            "template": [{
                "data": "people",
                "output": "items",
                "value": {"asset": {"id": "person-_index_", "type": "text", "value": "{{people._index_.name}}"}}
            }]
        }),
        json!({"people": [{"name": "ada"}]}),
    );

    set(&session, "people.0.name", json!("lovelace"));
    assert_eq!(current(&session)["items"][0]["asset"]["value"], json!("lovelace"));
}

#[test]
fn test_applicability_follows_the_data() {
    let session = session(
        json!({
            "id": "v",
            "banner": {"asset": {"id": "banner", "type": "text", "value": "hello", "applicability": "{{show}}"}}
        }),
        json!({"show": false}),
    );

    assert!(current(&session).get("banner").is_none());

    set(&session, "show", json!(true));
    assert_eq!(current(&session)["banner"]["asset"]["value"], json!("hello"));
}

#[test]
fn test_static_switch_is_decided_once() {
    let session = session(
        json!({
            "id": "v",
            "title": {"staticSwitch": [
                {"case": "{{lang}} == 'en'", "asset": {"id": "en", "type": "text", "value": "Hello"}},
                {"case": true, "asset": {"id": "other", "type": "text", "value": "Bonjour"}}
            ]}
        }),
        json!({"lang": "en"}),
    );

    assert_eq!(current(&session)["title"]["asset"]["id"], json!("en"));

    set(&session, "lang", json!("fr"));
    assert_eq!(current(&session)["title"]["asset"]["id"], json!("en"));
}

#[test]
fn test_dynamic_switch_tracks_its_cases() {
    let session = session(
        json!({
            "id": "v",
            "title": {"dynamicSwitch": [
                {"case": "{{lang}} == 'en'", "asset": {"id": "en", "type": "text", "value": "Hello"}},
                {"case": true, "asset": {"id": "other", "type": "text", "value": "Bonjour"}}
            ]}
        }),
        json!({"lang": "en"}),
    );

    assert_eq!(current(&session)["title"]["asset"]["value"], json!("Hello"));

    set(&session, "lang", json!("fr"));
    assert_eq!(current(&session)["title"]["asset"]["value"], json!("Bonjour"));
}

#[test]
fn test_expressions_and_refs_resolve_in_values() {
    let session = session(
        json!({
            "id": "v",
            "title": "Total: {{count}}",
            "double": "@[ {{count}} * 2 ]@"
        }),
        json!({"count": 4}),
    );

    let view = current(&session);
    assert_eq!(view["title"], json!("Total: 4"));
    assert_eq!(view["double"], json!(8));

    session.evaluate("{{count}} = {{count}} + 1").unwrap();
    let view = current(&session);
    assert_eq!(view["title"], json!("Total: 5"));
    assert_eq!(view["double"], json!(10));
}

#[test]
fn test_silent_writes_do_not_refresh_the_view() {
    let session = session(json!({"id": "v", "title": "{{name}}"}), json!({"name": "ada"}));

    session
        .set(vec![("name".into(), json!("grace"))], &DataModelOptions::silent())
        .unwrap();
    assert_eq!(current(&session)["title"], json!("ada"));

    set(&session, "other", json!(1));
    assert_eq!(current(&session)["title"], json!("grace"));
}

#[test]
fn test_deletes_refresh_the_view() {
    let session = session(
        json!({"id": "v", "title": "Name: {{name}}", "first": "First: {{pets.0}}"}),
        json!({"name": "ada", "pets": ["cat", "dog"]}),
    );

    session.delete("name").unwrap();
    assert_eq!(current(&session)["title"], json!("Name: "));

    session.delete("pets.0").unwrap();
    assert_eq!(current(&session)["first"], json!("First: dog"));
}
