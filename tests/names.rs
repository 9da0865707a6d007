/// Renaming inferred types
mod common;

use avrow_typed::{avro_record, AvrowErr, MemRegistry, Names, SingleEncoder};
use common::schema;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Default, PartialEq)]
struct Event {
    kind: String,
    at: i64,
}
avro_record!(Event { kind, at });

#[derive(Debug, Default, PartialEq)]
struct Batch {
    events: Vec<Event>,
    first: Option<Event>,
}
avro_record!(Batch { events, first });

fn renamed() -> Names {
    Names::new()
        .rename_type::<Event>("com.acme.Event", &["legacy.Happening"])
        .unwrap()
}

#[test]
fn renamed_definition_and_references() {
    let names = renamed();
    let batch = names.type_of::<Batch>().unwrap();
    let json: Value = serde_json::from_str(batch.as_str()).unwrap();
    let items = &json["fields"][0]["type"]["items"];
    assert_eq!(items["name"], json!("com.acme.Event"));
    assert_eq!(items["aliases"], json!(["Event", "legacy.Happening"]));
    assert_eq!(json["fields"][1]["type"], json!(["null", "com.acme.Event"]));

    // The global environment is unaffected.
    let plain = Names::global().type_of::<Event>().unwrap();
    assert_eq!(plain.name().as_deref(), Some("Event"));
}

#[test]
fn old_data_stays_readable() {
    let names = renamed();
    for old_name in ["Event", "legacy.Happening"] {
        let writer = schema(&format!(
            r#"{{"type":"record","name":"{}","fields":[
                {{"name":"kind","type":"string"}},{{"name":"at","type":"long"}}]}}"#,
            old_name
        ));
        let mut out = Event::default();
        names.unmarshal(&[2, b'k', 4], &mut out, &writer).unwrap();
        assert_eq!(
            out,
            Event {
                kind: "k".to_string(),
                at: 2
            }
        );
    }
}

#[test]
fn builtin_names_cannot_be_renamed() {
    for name in ["int", "record"] {
        assert!(matches!(
            Names::new().rename(name, "Foo", &[]),
            Err(AvrowErr::InvalidRename(_, _))
        ));
    }
    assert!(matches!(
        Names::new().rename("Event", "not a name", &[]),
        Err(AvrowErr::InvalidRename(_, _))
    ));
}

#[tokio::test]
async fn encoder_registers_renamed_schema() {
    let registry = Arc::new(MemRegistry::new());
    let enc = SingleEncoder::with_names(registry.clone(), renamed());
    enc.check_encode_type::<Event>().await.unwrap();
    let registered = registry.get(1).unwrap();
    assert_eq!(registered.name().as_deref(), Some("com.acme.Event"));
}
