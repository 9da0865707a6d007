/// Round trips through inferred schemas
mod common;

use avrow_typed::{
    alternative, avro_record, marshal, marshal_append, type_of, unmarshal, AvroType, AvrowErr,
    RecordBuilder, Shape, Timestamp, UnionBuilder,
};
use common::init_logs;
use pretty_assertions::assert_eq;
use std::collections::HashMap;

#[derive(Debug, Default, Clone, PartialEq)]
struct Swapped {
    b: i32,
    a: i32,
}
avro_record!(Swapped as "R" { b, a });

#[test]
fn record_fields_round_trip() {
    init_logs();
    let r = Swapped { b: 20, a: 34 };
    let (buf, schema) = marshal(&r).unwrap();
    assert_eq!(buf, vec![40, 68]);
    assert_eq!(
        schema.canonical_form().to_string(),
        r#"{"name":"R","type":"record","fields":[{"name":"b","type":"int"},{"name":"a","type":"int"}]}"#
    );
    let mut out = Swapped::default();
    unmarshal(&buf, &mut out, &schema).unwrap();
    assert_eq!(out, r);
}

#[derive(Debug, Clone, PartialEq)]
enum Shape2 {
    Null,
    Num(i64),
    Text(String),
}

impl Default for Shape2 {
    fn default() -> Self {
        Shape2::Null
    }
}

impl AvroType for Shape2 {
    fn describe() -> Shape {
        UnionBuilder::<Shape2>::new()
            .null(|v| matches!(v, Shape2::Null), || Shape2::Null)
            .variant(Shape2::Num, |v| match v {
                Shape2::Num(n) => Some(n),
                _ => None,
            })
            .variant(Shape2::Text, |v| match v {
                Shape2::Text(s) => Some(s),
                _ => None,
            })
            .build()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Everything {
    flag: bool,
    small: i32,
    big: i64,
    ratio: f32,
    precise: f64,
    name: String,
    blob: Vec<u8>,
    digest: [u8; 4],
    maybe: Option<String>,
    list: Vec<i64>,
    table: HashMap<String, Vec<String>>,
    either: Shape2,
    when: Timestamp,
    nested: Option<Box<Everything>>,
}

impl AvroType for Everything {
    fn describe() -> Shape {
        RecordBuilder::<Everything>::new("Everything")
            .field("flag", |r| &r.flag, |r| &mut r.flag)
            .field("small", |r| &r.small, |r| &mut r.small)
            .field("big", |r| &r.big, |r| &mut r.big)
            .field("ratio", |r| &r.ratio, |r| &mut r.ratio)
            .field("precise", |r| &r.precise, |r| &mut r.precise)
            .field("name", |r| &r.name, |r| &mut r.name)
            .field("blob", |r| &r.blob, |r| &mut r.blob)
            .field("digest", |r| &r.digest, |r| &mut r.digest)
            .field("maybe", |r| &r.maybe, |r| &mut r.maybe)
            .field("list", |r| &r.list, |r| &mut r.list)
            .field("table", |r| &r.table, |r| &mut r.table)
            .field("either", |r| &r.either, |r| &mut r.either)
            .alternatives(vec![None, alternative::<i64>(), alternative::<String>()])
            .field("when", |r| &r.when, |r| &mut r.when)
            .field("nested", |r| &r.nested, |r| &mut r.nested)
            .build()
    }
}

fn sample() -> Everything {
    let mut table = HashMap::new();
    table.insert("k1".to_string(), vec!["a".to_string(), "b".to_string()]);
    table.insert("k2".to_string(), vec![]);
    Everything {
        flag: true,
        small: -7,
        big: i64::MAX,
        ratio: 1.5,
        precise: -0.25,
        name: "everything".to_string(),
        blob: vec![0, 1, 255],
        digest: [9, 8, 7, 6],
        maybe: Some("here".to_string()),
        list: vec![1, -1, 1 << 40],
        table,
        either: Shape2::Text("t".to_string()),
        when: Timestamp::from_micros(1_600_000_000_000_000),
        nested: Some(Box::new(Everything {
            either: Shape2::Num(5),
            ..Everything::default()
        })),
    }
}

#[test]
fn all_shapes_round_trip() {
    init_logs();
    let v = sample();
    let (buf, schema) = marshal(&v).unwrap();
    let mut out = Everything::default();
    unmarshal(&buf, &mut out, &schema).unwrap();
    assert_eq!(out, v);
}

#[test]
fn null_union_shape() {
    let mut v = Everything::default();
    let (with_none, schema) = marshal(&v).unwrap();
    v.maybe = Some(String::new());
    let (with_some, _) = marshal(&v).unwrap();
    // Some("") writes the branch index and an empty string.
    assert_eq!(with_some.len(), with_none.len() + 1);

    let mut out = sample();
    unmarshal(&with_none, &mut out, &schema).unwrap();
    assert_eq!(out.maybe, None);
    unmarshal(&with_some, &mut out, &schema).unwrap();
    assert_eq!(out.maybe, Some(String::new()));
}

#[test]
fn marshal_append_keeps_prefix() {
    let mut buf = vec![0xff];
    let schema = marshal_append(&mut buf, &Swapped { b: 1, a: 2 }).unwrap();
    assert_eq!(buf, vec![0xff, 2, 4]);
    assert_eq!(schema, type_of::<Swapped>().unwrap());
}

// Builder fields in one order, declared schema in the other.
#[derive(Debug, Default, PartialEq)]
struct Declared {
    a: i32,
    b: String,
}

impl AvroType for Declared {
    fn describe() -> Shape {
        RecordBuilder::<Declared>::new("Declared")
            .field("a", |d| &d.a, |d| &mut d.a)
            .field("b", |d| &d.b, |d| &mut d.b)
            .schema(
                r#"{"type":"record","name":"Declared","fields":[
                    {"name":"b","type":"string"},{"name":"a","type":"int"}]}"#,
            )
            .build()
    }
}

#[test]
fn declared_field_order_round_trips() {
    let d = Declared {
        a: 5,
        b: "hi".to_string(),
    };
    let (buf, schema) = marshal(&d).unwrap();
    assert_eq!(buf, vec![4, b'h', b'i', 10]);
    let mut out = Declared::default();
    unmarshal(&buf, &mut out, &schema).unwrap();
    assert_eq!(out, d);
}

#[derive(Debug, Default, PartialEq)]
struct Widened {
    count: i32,
    ratio: f32,
}

impl AvroType for Widened {
    fn describe() -> Shape {
        RecordBuilder::<Widened>::new("Widened")
            .field("count", |w| &w.count, |w| &mut w.count)
            .field("ratio", |w| &w.ratio, |w| &mut w.ratio)
            .schema(
                r#"{"type":"record","name":"Widened","fields":[
                    {"name":"count","type":"double"},{"name":"ratio","type":"double"}]}"#,
            )
            .build()
    }
}

#[derive(Debug, Default, PartialEq)]
struct Narrowed {
    total: i64,
}

impl AvroType for Narrowed {
    fn describe() -> Shape {
        RecordBuilder::<Narrowed>::new("Narrowed")
            .field("total", |n| &n.total, |n| &mut n.total)
            .schema(r#"{"type":"record","name":"Narrowed","fields":[{"name":"total","type":"int"}]}"#)
            .build()
    }
}

#[test]
fn leaves_follow_declared_schema() {
    let (buf, _) = marshal(&Widened {
        count: 1,
        ratio: 0.5,
    })
    .unwrap();
    assert_eq!(
        buf,
        vec![0, 0, 0, 0, 0, 0, 0xf0, 0x3f, 0, 0, 0, 0, 0, 0, 0xe0, 0x3f]
    );

    let err = marshal(&Narrowed { total: 1 }).unwrap_err();
    assert!(matches!(err, AvrowErr::EncodeFailed(_)), "{:?}", err);
}
