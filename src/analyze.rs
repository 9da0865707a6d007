//! Binds a resolution program to a host type.
//!
//! The analyzer walks every path through the program while tracking where
//! the cursor sits in the host type. Each structural instruction gets the
//! accessor that performs it on a live value, so the interpreter never has to
//! inspect types. A program that does not fit the host type is rejected here,
//! before any data is read.

use crate::error::{AvrowErr, AvrowResult};
use crate::host::{
    CommitFn, DefaultFn, HostType, LeafKind, MutFn, Scalar, ShapeKind, UnionVariant,
};
use crate::program::{Instruction, Kind, Program};
use crate::schema::Schema;
use crate::typeinfo::TypeInfo;
use std::any::{Any, TypeId};
use std::sync::Arc;

pub(crate) type WriteFn = fn(&mut dyn Any, Scalar<'_>) -> Result<(), String>;

/// How an `Enter`, `AppendArray` or `AppendMap` reaches the value it
/// descends into.
pub(crate) enum EnterBinding {
    /// A record field.
    Field(MutFn),
    /// The value alternative of an `Option`; stores `Some(default)`.
    Nullable {
        insert: fn(&mut dyn Any) -> Option<&mut dyn Any>,
    },
    /// The null alternative of an `Option`.
    NullOption { clear: fn(&mut dyn Any) -> bool },
    /// The null alternative of a union enum.
    NullVariant {
        select: Arc<dyn Fn(&mut dyn Any) -> bool + Send + Sync>,
    },
    /// A value alternative of a union enum. The payload is decoded into a
    /// fresh value that is committed on exit.
    Variant { host: HostType, commit: CommitFn },
    ArrayElem {
        push: fn(&mut dyn Any) -> Option<&mut dyn Any>,
    },
    /// A map value, decoded fresh and inserted under the key in the string
    /// register on exit.
    MapElem {
        host: HostType,
        insert: fn(&mut dyn Any, String, Box<dyn Any>) -> bool,
    },
}

pub(crate) struct DefaultBinding {
    pub(crate) field: MutFn,
    pub(crate) make: DefaultFn,
    pub(crate) host: HostType,
}

/// A program together with its bindings to one host type.
pub(crate) struct DecodeProgram {
    pub(crate) program: Program,
    pub(crate) enter: Vec<Option<EnterBinding>>,
    pub(crate) defaults: Vec<Option<DefaultBinding>>,
    pub(crate) set: Vec<Option<WriteFn>>,
    /// The schema the program reads into.
    pub(crate) reader: Schema,
}

#[derive(Clone)]
struct Branch {
    pc: usize,
    calls: Vec<usize>,
    path: Vec<Arc<TypeInfo>>,
}

fn failed(msg: impl Into<String>) -> AvrowErr {
    AvrowErr::AnalysisFailed(msg.into())
}

/// Binds `program` to `host`. `reader` is the schema the program was
/// compiled for.
pub(crate) fn analyze(
    mut program: Program,
    host: &HostType,
    reader: Schema,
) -> AvrowResult<DecodeProgram> {
    let len = program.instructions.len();
    let mut out = DecodeProgram {
        program: Program::default(),
        enter: (0..len).map(|_| None).collect(),
        defaults: (0..len).map(|_| None).collect(),
        set: vec![None; len],
        reader,
    };
    // The host type at the cursor when each instruction was first reached.
    let mut visited: Vec<Option<Option<TypeId>>> = vec![None; len];

    let mut pending = vec![Branch {
        pc: 0,
        calls: vec![],
        path: vec![TypeInfo::for_host(host)?],
    }];
    while let Some(mut b) = pending.pop() {
        loop {
            let pc = b.pc;
            let inst = *program
                .instructions
                .get(pc)
                .ok_or_else(|| failed(format!("jump to {} out of range", pc)))?;
            let top = b
                .path
                .last()
                .cloned()
                .ok_or_else(|| failed("unbalanced exit"))?;
            let here = top.host.as_ref().map(HostType::id);
            match visited[pc] {
                Some(seen) if seen == here => break,
                Some(_) => return Err(type_mismatch(pc, &top)),
                None => visited[pc] = Some(here),
            }

            match inst {
                Instruction::Read(_)
                | Instruction::EvalGreater(_)
                | Instruction::EvalEqual(_)
                | Instruction::SetLong(_)
                | Instruction::AddLong(_)
                | Instruction::MultLong(_)
                | Instruction::PushLoop
                | Instruction::PopLoop
                | Instruction::Set(Kind::Null) => b.pc += 1,
                Instruction::Halt(_) => break,
                Instruction::Jump(to) => b.pc = to,
                Instruction::CondJump(to) => {
                    pending.push(Branch { pc: to, ..b.clone() });
                    b.pc += 1;
                }
                Instruction::Call(to) => match visited.get(to).copied().flatten() {
                    Some(seen) if seen == here => b.pc += 1,
                    Some(_) => return Err(type_mismatch(to, &top)),
                    None => {
                        b.calls.push(pc + 1);
                        b.pc = to;
                    }
                },
                Instruction::Return => {
                    b.pc = b
                        .calls
                        .pop()
                        .ok_or_else(|| failed(format!("return without call at {}", pc)))?;
                }
                Instruction::Set(kind) => {
                    if top.is_union {
                        // The alternative is chosen by the Enter that follows.
                        program.instructions[pc] = Instruction::Jump(pc + 1);
                    } else {
                        out.set[pc] = Some(setter(kind, &top)?);
                    }
                    b.pc += 1;
                }
                Instruction::SetDefault(i) => {
                    out.defaults[pc] = Some(default_binding(i, &top)?);
                    b.pc += 1;
                }
                Instruction::Enter(i) => {
                    let (binding, child) = enter_binding(i, &top)?;
                    out.enter[pc] = Some(binding);
                    b.path.push(child);
                    b.pc += 1;
                }
                Instruction::AppendArray => {
                    let (binding, child) = array_binding(&top)?;
                    out.enter[pc] = Some(binding);
                    b.path.push(child);
                    b.pc += 1;
                }
                Instruction::AppendMap => {
                    let (binding, child) = map_binding(&top)?;
                    out.enter[pc] = Some(binding);
                    b.path.push(child);
                    b.pc += 1;
                }
                Instruction::Exit => {
                    if b.path.len() < 2 {
                        return Err(failed(format!("unbalanced exit at {}", pc)));
                    }
                    b.path.pop();
                    b.pc += 1;
                }
            }
        }
    }

    for (pc, inst) in program.instructions.iter().enumerate() {
        if visited[pc].is_none() || !inst.is_structural() {
            continue;
        }
        let bound = match inst {
            Instruction::Set(_) => out.set[pc].is_some(),
            Instruction::SetDefault(_) => out.defaults[pc].is_some(),
            _ => out.enter[pc].is_some(),
        };
        if !bound {
            return Err(failed(format!("{} at {} was never bound", inst, pc)));
        }
    }
    log::debug!("decode program for {:?}:\n{}", host, program);
    out.program = program;
    Ok(out)
}

fn type_mismatch(pc: usize, top: &TypeInfo) -> AvrowErr {
    failed(format!(
        "type mismatch at {}: reached with {}",
        pc,
        top.host.as_ref().map_or("null", |h| h.name())
    ))
}

fn host_of(top: &TypeInfo) -> AvrowResult<&HostType> {
    top.host
        .as_ref()
        .ok_or_else(|| failed("cannot descend into null"))
}

// The scalar writer for `kind` on the value at the cursor.
fn setter(kind: Kind, top: &TypeInfo) -> AvrowResult<WriteFn> {
    let host = host_of(top)?;
    let ops = host
        .leaf_ops()
        .ok_or_else(|| failed(format!("cannot set {:?} into {}", kind, host.name())))?;
    let fits = match (kind, host.shape()) {
        (Kind::Int | Kind::Long, ShapeKind::Enum(_)) => true,
        (_, ShapeKind::Leaf(leaf, _)) => representable(kind, *leaf),
        _ => false,
    };
    if !fits {
        return Err(failed(format!("cannot set {:?} into {}", kind, host.name())));
    }
    Ok(ops.write)
}

fn representable(kind: Kind, leaf: LeafKind) -> bool {
    use LeafKind as L;
    match kind {
        Kind::Boolean => leaf == L::Boolean,
        Kind::Int | Kind::Long => matches!(leaf, L::Int | L::Long | L::TimestampMicros),
        Kind::Float | Kind::Double => matches!(leaf, L::Float | L::Double),
        Kind::Bytes => matches!(leaf, L::Bytes | L::Fixed(_)),
        Kind::String => matches!(leaf, L::String | L::Uuid),
        Kind::Fixed(n) => leaf == L::Fixed(n) || leaf == L::Bytes,
        Kind::Null | Kind::UnusedLong => false,
    }
}

fn default_binding(i: usize, top: &TypeInfo) -> AvrowResult<DefaultBinding> {
    let host = host_of(top)?;
    let rec = match host.shape() {
        ShapeKind::Record(rec) => rec,
        _ => return Err(failed(format!("default for field {} of non-record {}", i, host.name()))),
    };
    let (entry, field) = top
        .entries
        .get(i)
        .and_then(|e| Some((e, rec.fields.get(e.index)?)))
        .ok_or_else(|| failed(format!("{} has no field {}", host.name(), i)))?;
    let make = entry.make_default.clone().ok_or_else(|| {
        failed(format!(
            "field {} of {} has no default value",
            field.name,
            host.name()
        ))
    })?;
    let field_host = entry
        .host
        .clone()
        .ok_or_else(|| failed(format!("field {} has no type", field.name)))?;
    Ok(DefaultBinding {
        field: field.get_mut.clone(),
        make,
        host: field_host,
    })
}

fn enter_binding(i: usize, top: &TypeInfo) -> AvrowResult<(EnterBinding, Arc<TypeInfo>)> {
    let host = host_of(top)?;
    let entry = top
        .entries
        .get(i)
        .ok_or_else(|| failed(format!("{} has no member {}", host.name(), i)))?;
    let child = TypeInfo::expand(entry)?;
    let binding = match (host.shape(), &entry.host) {
        (ShapeKind::Record(rec), _) if !top.is_union => {
            let field = rec
                .fields
                .get(entry.index)
                .ok_or_else(|| failed(format!("{} has no field {}", host.name(), i)))?;
            EnterBinding::Field(field.get_mut.clone())
        }
        (ShapeKind::Nullable(n), None) => EnterBinding::NullOption { clear: n.clear },
        (ShapeKind::Nullable(n), Some(_)) => EnterBinding::Nullable {
            insert: n.insert_default,
        },
        (ShapeKind::Union(u), alt) => {
            let variant = u
                .variants
                .iter()
                .find(|v| match (v, alt) {
                    (UnionVariant::Null { .. }, None) => true,
                    (UnionVariant::Value { .. }, Some(h)) => v.host().as_ref() == Some(h),
                    _ => false,
                })
                .ok_or_else(|| failed(format!("{} has no alternative {}", host.name(), i)))?;
            match variant {
                UnionVariant::Null { select, .. } => EnterBinding::NullVariant {
                    select: select.clone(),
                },
                UnionVariant::Value { host, commit, .. } => EnterBinding::Variant {
                    host: host(),
                    commit: commit.clone(),
                },
            }
        }
        _ => return Err(failed(format!("cannot enter member {} of {}", i, host.name()))),
    };
    Ok((binding, child))
}

fn array_binding(top: &TypeInfo) -> AvrowResult<(EnterBinding, Arc<TypeInfo>)> {
    let host = host_of(top)?;
    match host.shape() {
        ShapeKind::Array(a) => Ok((
            EnterBinding::ArrayElem {
                push: a.push_default,
            },
            TypeInfo::for_host(&(a.elem)())?,
        )),
        _ => Err(failed(format!("{} is not an array", host.name()))),
    }
}

fn map_binding(top: &TypeInfo) -> AvrowResult<(EnterBinding, Arc<TypeInfo>)> {
    let host = host_of(top)?;
    match host.shape() {
        ShapeKind::Map(m) => {
            let key = (m.key)();
            if !key.is_string() {
                return Err(AvrowErr::NonStringMapKey(key.name().to_string()));
            }
            let elem = (m.elem)();
            let child = TypeInfo::for_host(&elem)?;
            Ok((
                EnterBinding::MapElem {
                    host: elem,
                    insert: m.insert,
                },
                child,
            ))
        }
        _ => Err(failed(format!("{} is not a map", host.name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::{avro_record, AvroType, RecordBuilder, Shape};
    use std::str::FromStr;

    #[derive(Default)]
    struct Small {
        a: i32,
        b: Option<String>,
    }

    impl AvroType for Small {
        fn describe() -> Shape {
            RecordBuilder::<Small>::new("Small")
                .field("a", |s| &s.a, |s| &mut s.a)
                .required()
                .field("b", |s| &s.b, |s| &mut s.b)
                .build()
        }
    }

    #[derive(Default)]
    struct Strict {
        a: i32,
        b: i32,
    }

    impl AvroType for Strict {
        fn describe() -> Shape {
            RecordBuilder::<Strict>::new("Small")
                .field("a", |s| &s.a, |s| &mut s.a)
                .field("b", |s| &s.b, |s| &mut s.b)
                .required()
                .schema(
                    r#"{"type":"record","name":"Small","fields":[
                        {"name":"a","type":"int"},
                        {"name":"b","type":"int","default":1}]}"#,
                )
                .build()
        }
    }

    #[derive(Default)]
    struct Flags {
        on: bool,
    }
    avro_record!(Flags { on });

    fn bind(host: HostType, writer: &str, reader: &str) -> AvrowResult<DecodeProgram> {
        let writer = Schema::from_str(writer).unwrap();
        let reader = Schema::from_str(reader).unwrap();
        analyze(compile(&writer, &reader)?, &host, reader)
    }

    const SMALL: &str = r#"{"type":"record","name":"Small","fields":[
        {"name":"a","type":"int"},
        {"name":"b","type":["null","string"],"default":null}]}"#;

    #[test]
    fn binds_fields_and_union_members() {
        let prog = bind(HostType::of::<Small>(), SMALL, SMALL).unwrap();
        let code = &prog.program.instructions;
        // Set on the union itself becomes a jump to the following Enter.
        assert!(!code.contains(&Instruction::Set(Kind::Long)));
        for (pc, inst) in code.iter().enumerate() {
            if let Instruction::Enter(_) = inst {
                assert!(prog.enter[pc].is_some(), "Enter at {} unbound", pc);
            }
        }
        let enters: Vec<_> = prog.enter.iter().flatten().collect();
        assert!(enters.iter().any(|b| matches!(b, EnterBinding::NullOption { .. })));
        assert!(enters.iter().any(|b| matches!(b, EnterBinding::Nullable { .. })));
    }

    #[test]
    fn default_needs_a_supplier() {
        let writer = r#"{"type":"record","name":"Small","fields":[{"name":"a","type":"int"}]}"#;
        let reader = HostType::of::<Strict>();
        let schema = r#"{"type":"record","name":"Small","fields":[
            {"name":"a","type":"int"},
            {"name":"b","type":"int","default":1}]}"#;
        let err = bind(reader, writer, schema).err().unwrap();
        assert!(matches!(err, AvrowErr::AnalysisFailed(ref m) if m.contains("no default value")));
    }

    #[test]
    fn rejects_unrepresentable_sets() {
        let schema = r#"{"type":"record","name":"Flags","fields":[{"name":"on","type":"long"}]}"#;
        let err = bind(HostType::of::<Flags>(), schema, schema).err().unwrap();
        assert!(matches!(err, AvrowErr::AnalysisFailed(_)));
    }
}
