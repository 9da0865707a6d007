extern crate avrow_typed;

#[macro_use]
extern crate criterion;

use avrow_typed::{avro_record, marshal_append, type_of, unmarshal, Schema};
use criterion::Criterion;
use std::str::FromStr;

#[derive(Debug, Default)]
struct Data {
    one: i32,
    two: i64,
    three: i64,
    four: i32,
    five: i64,
}
avro_record!(Data as "can_raw" { one, two, three, four, five });

#[derive(Debug, Default)]
struct LongList {
    value: i64,
    next: Option<Box<LongList>>,
}
avro_record!(LongList { value, next });

fn simple_record(c: &mut Criterion) {
    let data = Data {
        one: 34,
        two: 334,
        three: 45765,
        four: 45643,
        five: 834,
    };
    c.bench_function("encode_simple_record", |b| {
        let mut buf = Vec::with_capacity(16 * 1000);
        b.iter(|| {
            buf.clear();
            for _ in 0..1000 {
                marshal_append(&mut buf, &data).unwrap();
            }
        });
    });

    c.bench_function("decode_simple_record", |b| {
        let mut buf = vec![];
        let schema = marshal_append(&mut buf, &data).unwrap();
        let mut out = Data::default();
        b.iter(|| {
            for _ in 0..1000 {
                unmarshal(&buf, &mut out, &schema).unwrap();
            }
        });
    });
}

fn resolved_record(c: &mut Criterion) {
    // Older writer: fields in another order, one missing and one extra.
    let writer = Schema::from_str(
        r##"{
        "type": "record",
        "name": "can_raw",
        "fields" : [
            {"name": "five", "type": "int"},
            {"name": "extra", "type": {"type": "array", "items": "string"}},
            {"name": "one", "type": "int"},
            {"name": "two", "type": "int"},
            {"name": "three", "type": "long"}
        ]
    }"##,
    )
    .unwrap();
    let buf = [4, 6, 2, b'a', 2, b'b', 2, b'c', 0, 68, 2, 10];
    c.bench_function("decode_resolved_record", |b| {
        let mut out = Data::default();
        b.iter(|| {
            for _ in 0..1000 {
                unmarshal(&buf, &mut out, &writer).unwrap();
            }
        });
    });
}

fn recursive_record(c: &mut Criterion) {
    let mut list = LongList::default();
    for i in 0..100 {
        list = LongList {
            value: i,
            next: Some(Box::new(list)),
        };
    }
    c.bench_function("recursive_record_round_trip", |b| {
        let schema = type_of::<LongList>().unwrap();
        let mut buf = vec![];
        let mut out = LongList::default();
        b.iter(|| {
            buf.clear();
            marshal_append(&mut buf, &list).unwrap();
            unmarshal(&buf, &mut out, &schema).unwrap();
        });
    });
}

criterion_group!(benches, simple_record, resolved_record, recursive_record);
criterion_main!(benches);
