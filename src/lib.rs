//! Avrow-typed maps Rust types to and from the [Apache Avro](https://avro.apache.org/docs/current/spec.html)
//! binary encoding, resolving the schema a message was written with against
//! the schema of the type it is read into.
//!
//! A type takes part by implementing [`AvroType`]. Its schema is inferred
//! from that description ([`type_of`]); records that change over time keep
//! reading old data through field defaults, promotions and aliases.
//!
//! ## Encoding and decoding
//!
//!```rust
//! use avrow_typed::{avro_record, marshal, unmarshal, RecordBuilder, AvroType, Shape};
//! use anyhow::Error;
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Old {
//!     b: i32,
//! }
//! avro_record!(Old as "Rec" { b });
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct New {
//!     a: i32,
//!     b: i32,
//! }
//!
//! impl AvroType for New {
//!     fn describe() -> Shape {
//!         RecordBuilder::<New>::new("Rec")
//!             .field("a", |r| &r.a, |r| &mut r.a)
//!             .with_default(|| 42)
//!             .field("b", |r| &r.b, |r| &mut r.b)
//!             .build()
//!     }
//! }
//!
//! fn main() -> Result<(), Error> {
//!     let (buf, writer) = marshal(&Old { b: 7 })?;
//!     let mut new = New::default();
//!     unmarshal(&buf, &mut new, &writer)?;
//!     assert_eq!(new, New { a: 42, b: 7 });
//!     Ok(())
//! }
//!```
//!
//! ## Schema registries
//!
//! [`Codec`], [`SingleEncoder`] and [`SingleDecoder`] frame each message
//! with the registry ID of its writer schema (see [`append_schema_id`]) and
//! look schemas up through the [`SchemaGetter`], [`EncodingRegistry`] and
//! [`DecodingRegistry`] traits. [`MemRegistry`] keeps schemas in memory and
//! [`Retrying`] retries transient registry failures.

#![doc(
    html_favicon_url = "https://raw.githubusercontent.com/creativcoder/avrow/main/assets/avrow_logo.png"
)]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/creativcoder/avrow/main/assets/avrow_logo.png"
)]
#![deny(missing_docs)]
#![deny(unused_must_use)]
#![deny(rust_2018_idioms)]

mod analyze;
mod cache;
mod codec;
mod compiler;
pub mod config;
mod decode;
mod encode;
mod error;
mod host;
mod infer;
mod names;
mod program;
mod registry;
mod retry;
mod schema;
mod single;
mod typeinfo;
mod util;
mod wire;

pub use codec::Codec;
pub use error::AvrowErr;
pub use error::AvrowResult;
pub use host::{
    alternative, AvroEnum, AvroType, DefaultFn, HostFn, HostType, RecordBuilder, RecordInfo,
    Shape, Timestamp, UnionBuilder,
};
pub use names::Names;
pub use registry::{DecodingRegistry, EncodingRegistry, MemRegistry, RegistryError, SchemaGetter};
pub use retry::{RetryPolicy, Retrying};
pub use schema::{CanonicalOpts, CanonicalSchema, Schema};
pub use single::{SingleDecoder, SingleEncoder};
pub use wire::{append_schema_id, decode_schema_id};

/// Encodes `x` with the schema inferred for `T`, returning the bytes and
/// that schema.
pub fn marshal<T: AvroType>(x: &T) -> AvrowResult<(Vec<u8>, Schema)> {
    Names::global().marshal(x)
}

/// Appends the encoding of `x` to `buf`. On failure `buf` is unchanged.
pub fn marshal_append<T: AvroType>(buf: &mut Vec<u8>, x: &T) -> AvrowResult<Schema> {
    Names::global().marshal_append(buf, x)
}

/// Decodes `data`, written with schema `writer`, into `x`, and returns the
/// schema of `T`.
pub fn unmarshal<T: AvroType>(data: &[u8], x: &mut T, writer: &Schema) -> AvrowResult<Schema> {
    Names::global().unmarshal(data, x, writer)
}

/// Returns the schema inferred for `T`.
pub fn type_of<T: AvroType>() -> AvrowResult<Schema> {
    Names::global().type_of::<T>()
}
