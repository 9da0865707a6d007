/// Tests for schema resolution between writer schemas and host types
mod common;

use avrow_typed::{
    avro_record, marshal, type_of, unmarshal, AvroEnum, AvroType, AvrowErr, Shape,
};
use common::{init_logs, schema, TestRecord};
use pretty_assertions::assert_eq;
use std::fmt;

#[test]
fn missing_writer_field_takes_default() {
    init_logs();
    let writer = schema(
        r#"{"type":"record","name":"TestRecord","fields":[{"name":"B","type":"int"}]}"#,
    );
    let mut out = TestRecord::default();
    unmarshal(&[68], &mut out, &writer).unwrap();
    assert_eq!(out, TestRecord { a: 42, b: 34 });
}

#[test]
fn missing_field_without_default_is_incompatible() {
    let writer = schema(
        r#"{"type":"record","name":"TestRecord","fields":[{"name":"A","type":"int"}]}"#,
    );
    let mut out = TestRecord::default();
    let err = unmarshal(&[40], &mut out, &writer).unwrap_err();
    assert!(matches!(err, AvrowErr::IncompatibleSchemas(_)));
    assert_eq!(
        err.to_string(),
        "Incompatible schemas: field B in reader is not present in writer and has no default value"
    );
}

#[test]
fn writer_fields_in_another_order() {
    let writer = schema(
        r#"{"type":"record","name":"TestRecord","fields":[
            {"name":"B","type":"int"},{"name":"X","type":"string"},{"name":"A","type":"int"}]}"#,
    );
    let mut out = TestRecord::default();
    unmarshal(&[68, 2, b'x', 40], &mut out, &writer).unwrap();
    assert_eq!(out, TestRecord { a: 20, b: 34 });
}

#[test]
fn promotions() {
    let mut long = 0i64;
    unmarshal(&[0x80, 0x01], &mut long, &schema(r#""int""#)).unwrap();
    assert_eq!(long, 64);

    let mut float = 0f32;
    unmarshal(&[6], &mut float, &schema(r#""long""#)).unwrap();
    assert_eq!(float, 3.0);

    let mut double = 0f64;
    unmarshal(&[0, 0, 0x20, 0x40], &mut double, &schema(r#""float""#)).unwrap();
    assert_eq!(double, 2.5);

    let mut bytes: Vec<u8> = vec![];
    unmarshal(&[4, b'o', b'k'], &mut bytes, &schema(r#""string""#)).unwrap();
    assert_eq!(bytes, b"ok".to_vec());

    let mut text = String::new();
    let err = unmarshal(&[2], &mut text, &schema(r#""int""#)).unwrap_err();
    assert!(matches!(err, AvrowErr::IncompatibleSchemas(_)));
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Suit(i64);

const HEARTS: Suit = Suit(0);
const CLUBS: Suit = Suit(2);

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("HEARTS"),
            1 => f.write_str("SPADES"),
            2 => f.write_str("CLUBS"),
            n => write!(f, "Suit({})", n),
        }
    }
}

impl AvroEnum for Suit {
    fn from_ordinal(ordinal: i64) -> Self {
        Suit(ordinal)
    }

    fn ordinal(&self) -> i64 {
        self.0
    }
}

impl AvroType for Suit {
    fn describe() -> Shape {
        Self::shape("Suit")
    }
}

#[test]
fn enum_symbols_are_remapped() {
    let writer = schema(r#"{"type":"enum","name":"Suit","symbols":["CLUBS","HEARTS"]}"#);
    let mut out = HEARTS;
    unmarshal(&[0], &mut out, &writer).unwrap();
    assert_eq!(out, CLUBS);
    unmarshal(&[2], &mut out, &writer).unwrap();
    assert_eq!(out, HEARTS);
}

#[test]
fn unknown_enum_symbol() {
    let writer = schema(r#"{"type":"enum","name":"Suit","symbols":["HEARTS","DIAMONDS"]}"#);
    let mut out = Suit(1);
    let err = unmarshal(&[2], &mut out, &writer).unwrap_err();
    assert!(matches!(err, AvrowErr::ProgramHalted(_)));
    // Known symbols still decode through the same program.
    unmarshal(&[0], &mut out, &writer).unwrap();
    assert_eq!(out, HEARTS);
}

#[derive(Debug, Default, PartialEq)]
struct Node {
    value: i64,
    next: Option<Box<Node>>,
}
avro_record!(Node { value, next });

#[test]
fn recursive_records() {
    let list = Node {
        value: 1,
        next: Some(Box::new(Node {
            value: 2,
            next: Some(Box::new(Node {
                value: 3,
                next: None,
            })),
        })),
    };
    let (buf, schema) = marshal(&list).unwrap();
    assert_eq!(buf, vec![2, 2, 4, 2, 6, 0]);
    let mut out = Node::default();
    unmarshal(&buf, &mut out, &schema).unwrap();
    assert_eq!(out, list);
}

// A chain of `depth` nodes, each with value 0, as written by its own schema.
fn chain_bytes(depth: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 * depth);
    for _ in 1..depth {
        data.extend_from_slice(&[0, 2]);
    }
    data.extend_from_slice(&[0, 0]);
    data
}

fn chain(depth: usize) -> Node {
    let mut node = Node::default();
    for _ in 1..depth {
        node = Node {
            value: 0,
            next: Some(Box::new(node)),
        };
    }
    node
}

#[test]
fn deep_recursion_is_an_error() {
    let schema = type_of::<Node>().unwrap();

    let mut out = Node::default();
    unmarshal(&chain_bytes(20), &mut out, &schema).unwrap();
    assert_eq!(out, chain(20));

    // Far deeper than any stack could follow.
    let data = chain_bytes(50_000);
    let err = unmarshal(&data, &mut Node::default(), &schema).unwrap_err();
    assert!(matches!(err, AvrowErr::DecodeFailed(ref m) if m.contains("nested deeper")), "{:?}", err);

    let deep = chain(2_000);
    let err = marshal(&deep).unwrap_err();
    assert!(matches!(err, AvrowErr::EncodeFailed(ref m) if m.contains("nested deeper")), "{:?}", err);
}

#[test]
fn blocks_of_empty_items_are_capped() {
    let schema = schema(r#"{"type":"array","items":"null"}"#);
    let mut out: Vec<()> = vec![];
    unmarshal(&[6, 0], &mut out, &schema).unwrap();
    assert_eq!(out.len(), 3);

    // A block count of i64::MAX in ten bytes.
    let data = [0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01, 0];
    let err = unmarshal(&data, &mut out, &schema).unwrap_err();
    assert!(matches!(err, AvrowErr::ProgramHalted(ref m) if m.contains("empty items")), "{:?}", err);
}

#[derive(Debug, Default, PartialEq)]
struct Reading {
    sensor: String,
    value: Option<f64>,
}
avro_record!(Reading { sensor, value });

#[test]
fn union_branch_selection() {
    // The writer had a plain float; the reader holds an optional double.
    let writer = schema(
        r#"{"type":"record","name":"Reading","fields":[
            {"name":"sensor","type":"string"},{"name":"value","type":"float"}]}"#,
    );
    let data = [2, b's', 0, 0, 0xc0, 0x3f];
    let mut out = Reading::default();
    unmarshal(&data, &mut out, &writer).unwrap();
    assert_eq!(
        out,
        Reading {
            sensor: "s".to_string(),
            value: Some(1.5)
        }
    );

    // A writer union whose chosen branch is null clears the option.
    let writer = schema(
        r#"{"type":"record","name":"Reading","fields":[
            {"name":"sensor","type":"string"},{"name":"value","type":["double","null"]}]}"#,
    );
    unmarshal(&[2, b's', 2], &mut out, &writer).unwrap();
    assert_eq!(out.value, None);
}
