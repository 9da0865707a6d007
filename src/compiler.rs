//! Compiles a (writer schema, reader schema) pair into a resolution
//! [`Program`](crate::program::Program).
//!
//! The rules are Avro's schema resolution rules:
//!
//! * records match by full name, unqualified name or reader alias; writer
//!   fields are read in writer order into the reader field of the same name
//!   (or alias), or skipped; reader fields the writer lacks take their
//!   default, and a reader field without one makes the schemas incompatible.
//! * int promotes to long, float and double; long to float and double;
//!   float to double; string and bytes convert into each other.
//! * enums map writer symbols to reader symbols by name, falling back to the
//!   reader's default symbol.
//! * a writer union dispatches on the branch index; a reader union selects
//!   the first branch matching the writer, preferring an exact match.

use crate::config::MAX_EMPTY_ITEMS;
use crate::error::{AvrowErr, AvrowResult};
use crate::program::{Instruction, Kind, Program};
use crate::schema::common::{Field, Name};
use crate::schema::{Registry, Schema, Variant};
use indexmap::IndexMap;
use std::collections::HashMap;

use Instruction::*;

/// Compiles the program that reads data written with `writer` as `reader`.
pub(crate) fn compile(writer: &Schema, reader: &Schema) -> AvrowResult<Program> {
    let mut c = Compiler {
        w_cxt: writer.cxt(),
        r_cxt: reader.cxt(),
        code: vec![],
        errors: vec![],
        methods: HashMap::new(),
        bodies: vec![],
        calls: vec![],
    };
    c.resolve(writer.variant(), reader.variant())?;
    c.emit(Halt(0));
    c.finish()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MethodKey {
    Resolve(String, String),
    Skip(String),
}

struct Compiler<'a> {
    w_cxt: &'a Registry,
    r_cxt: &'a Registry,
    code: Vec<Instruction>,
    errors: Vec<String>,
    methods: HashMap<MethodKey, usize>,
    // Record bodies still to emit, as (writer, reader) pairs. A body without
    // a reader skips the writer record.
    bodies: Vec<(&'a Variant, Option<&'a Variant>)>,
    // Call sites and the body they call.
    calls: Vec<(usize, usize)>,
}

impl<'a> Compiler<'a> {
    fn pc(&self) -> usize {
        self.code.len()
    }

    fn emit(&mut self, inst: Instruction) -> usize {
        self.code.push(inst);
        self.code.len() - 1
    }

    fn patch(&mut self, at: usize, target: usize) {
        self.code[at] = match self.code[at] {
            CondJump(_) => CondJump(target),
            Jump(_) => Jump(target),
            Call(_) => Call(target),
            other => other,
        };
    }

    // Registers a runtime error message; the result is the operand for Halt.
    fn error(&mut self, msg: String) -> usize {
        self.errors.push(msg);
        self.errors.len()
    }

    fn finish(mut self) -> AvrowResult<Program> {
        let mut starts = Vec::with_capacity(self.bodies.len());
        let mut i = 0;
        while i < self.bodies.len() {
            starts.push(self.pc());
            let (w, r) = self.bodies[i];
            match r {
                Some(r) => self.record_body(w, r)?,
                None => self.skip_body(w)?,
            }
            self.emit(Return);
            i += 1;
        }
        for (at, body) in std::mem::take(&mut self.calls) {
            self.patch(at, starts[body]);
        }
        Ok(Program {
            instructions: self.code,
            errors: self.errors,
        })
    }

    fn call(&mut self, key: MethodKey, w: &'a Variant, r: Option<&'a Variant>) {
        let next = self.bodies.len();
        let body = *self.methods.entry(key).or_insert(next);
        if body == next {
            self.bodies.push((w, r));
        }
        let at = self.emit(Call(0));
        self.calls.push((at, body));
    }

    fn resolve(&mut self, w: &'a Variant, r: &'a Variant) -> AvrowResult<()> {
        let w = self.w_cxt.resolve(w)?;
        let r = self.r_cxt.resolve(r)?;
        match (w, r) {
            (Variant::Union { variants }, _) => return self.writer_union(variants, r),
            (_, Variant::Union { variants }) => {
                let j = self.select(w, variants)?.ok_or_else(|| {
                    incompatible(format!(
                        "writer {} is not in reader union {}",
                        describe(w),
                        describe(r)
                    ))
                })?;
                return self.enter_branch(w, variants, j);
            }
            _ => {}
        }
        if let Some((read, set)) = promotion(w, r) {
            self.emit(Read(read));
            self.emit(Set(set));
            return Ok(());
        }
        match (w, r) {
            (
                Variant::Record { name: wn, .. },
                Variant::Record {
                    name: rn, aliases, ..
                },
            ) => {
                if !names_match(wn, rn, aliases) {
                    return Err(incompatible(format!(
                        "writer record {} does not match reader record {}",
                        wn.fullname(),
                        rn.fullname()
                    )));
                }
                self.call(MethodKey::Resolve(wn.fullname(), rn.fullname()), w, Some(r));
                Ok(())
            }
            (
                Variant::Enum {
                    name: wn,
                    symbols: ws,
                    ..
                },
                Variant::Enum {
                    name: rn,
                    aliases,
                    symbols: rs,
                    default,
                },
            ) => {
                if !names_match(wn, rn, aliases) {
                    return Err(incompatible(format!(
                        "writer enum {} does not match reader enum {}",
                        wn.fullname(),
                        rn.fullname()
                    )));
                }
                self.enum_table(ws, rs, default.as_deref(), rn);
                Ok(())
            }
            (
                Variant::Fixed {
                    name: wn, size: ws, ..
                },
                Variant::Fixed {
                    name: rn,
                    aliases,
                    size: rs,
                },
            ) => {
                if !names_match(wn, rn, aliases) || ws != rs {
                    return Err(incompatible(format!(
                        "writer fixed {} ({} bytes) does not match reader fixed {} ({} bytes)",
                        wn.fullname(),
                        ws,
                        rn.fullname(),
                        rs
                    )));
                }
                self.emit(Read(Kind::Fixed(*ws)));
                self.emit(Set(Kind::Fixed(*rs)));
                Ok(())
            }
            (Variant::Array { items: wi }, Variant::Array { items: ri }) => {
                let empty = self.zero_width(wi, &mut vec![]);
                self.block_loop(empty, |c| {
                    c.emit(AppendArray);
                    c.resolve(wi, ri)?;
                    c.emit(Exit);
                    Ok(())
                })
            }
            (Variant::Map { values: wv }, Variant::Map { values: rv }) => self.block_loop(false, |c| {
                c.emit(Read(Kind::String));
                c.emit(AppendMap);
                c.resolve(wv, rv)?;
                c.emit(Exit);
                Ok(())
            }),
            _ => Err(incompatible(format!(
                "cannot read writer {} as reader {}",
                describe(w),
                describe(r)
            ))),
        }
    }

    // Reads the branch index and dispatches to code for each writer branch.
    fn writer_union(&mut self, branches: &'a [Variant], r: &'a Variant) -> AvrowResult<()> {
        self.emit(Read(Kind::Long));
        let mut jumps = Vec::with_capacity(branches.len());
        for i in 0..branches.len() {
            self.emit(EvalEqual(i as i64));
            jumps.push(self.emit(CondJump(0)));
        }
        let bad = self.error("invalid union index".to_string());
        self.emit(Halt(bad));

        let mut ends = vec![];
        for (i, wb) in branches.iter().enumerate() {
            let here = self.pc();
            self.patch(jumps[i], here);
            let wb = self.w_cxt.resolve(wb)?;
            match r {
                Variant::Union { variants } => match self.select(wb, variants)? {
                    Some(j) => self.enter_branch(wb, variants, j)?,
                    None => {
                        let e = self.error(format!(
                            "writer union branch {} is not in reader union",
                            describe(wb)
                        ));
                        self.emit(Halt(e));
                        continue;
                    }
                },
                _ if self.matches(wb, r, false) => self.resolve(wb, r)?,
                _ => {
                    let e = self.error(format!(
                        "writer union branch {} cannot be read as {}",
                        describe(wb),
                        describe(r)
                    ));
                    self.emit(Halt(e));
                    continue;
                }
            }
            ends.push(self.emit(Jump(0)));
        }
        let end = self.pc();
        for at in ends {
            self.patch(at, end);
        }
        Ok(())
    }

    fn enter_branch(&mut self, w: &'a Variant, branches: &'a [Variant], j: usize) -> AvrowResult<()> {
        self.emit(SetLong(j as i64));
        self.emit(Set(Kind::Long));
        self.emit(Enter(j));
        self.resolve(w, &branches[j])?;
        self.emit(Exit);
        Ok(())
    }

    // The first reader branch matching `w`, preferring one of the same type
    // over one reached by promotion.
    fn select(&self, w: &Variant, branches: &'a [Variant]) -> AvrowResult<Option<usize>> {
        let w = self.w_cxt.resolve(w)?;
        for exact in [true, false] {
            for (j, rb) in branches.iter().enumerate() {
                let rb = self.r_cxt.resolve(rb)?;
                if self.matches(w, rb, exact) {
                    return Ok(Some(j));
                }
            }
        }
        Ok(None)
    }

    fn matches(&self, w: &Variant, r: &Variant, exact: bool) -> bool {
        match (w, r) {
            (Variant::Record { name: wn, .. }, Variant::Record { name: rn, aliases, .. })
            | (Variant::Enum { name: wn, .. }, Variant::Enum { name: rn, aliases, .. }) => {
                names_match(wn, rn, aliases)
            }
            (
                Variant::Fixed {
                    name: wn, size: ws, ..
                },
                Variant::Fixed {
                    name: rn,
                    aliases,
                    size: rs,
                },
            ) => ws == rs && names_match(wn, rn, aliases),
            (Variant::Array { .. }, Variant::Array { .. })
            | (Variant::Map { .. }, Variant::Map { .. }) => true,
            _ => match promotion(w, r) {
                Some(_) if exact => std::mem::discriminant(w) == std::mem::discriminant(r),
                Some(_) => true,
                None => false,
            },
        }
    }

    fn enum_table(&mut self, ws: &[String], rs: &[String], default: Option<&str>, rn: &Name) {
        self.emit(Read(Kind::Long));
        if ws == rs {
            self.emit(Set(Kind::Long));
            return;
        }
        let mut jumps = Vec::with_capacity(ws.len());
        for i in 0..ws.len() {
            self.emit(EvalEqual(i as i64));
            jumps.push(self.emit(CondJump(0)));
        }
        let bad = self.error("invalid enum index".to_string());
        self.emit(Halt(bad));
        let fallback = default.and_then(|d| rs.iter().position(|s| s == d));
        let mut ends = vec![];
        for (i, sym) in ws.iter().enumerate() {
            let here = self.pc();
            self.patch(jumps[i], here);
            match rs.iter().position(|s| s == sym).or(fallback) {
                Some(ri) => {
                    self.emit(SetLong(ri as i64));
                    self.emit(Set(Kind::Long));
                    ends.push(self.emit(Jump(0)));
                }
                None => {
                    let e = self.error(format!(
                        "symbol {:?} is not in reader enum {}",
                        sym,
                        rn.fullname()
                    ));
                    self.emit(Halt(e));
                }
            }
        }
        let end = self.pc();
        for at in ends {
            self.patch(at, end);
        }
    }

    // Emits a loop over the blocks of an array or map. Each item runs `body`
    // with the remaining count saved on the loop stack. Items that take no
    // bytes (`empty`) cap the block count, since the input cannot.
    fn block_loop(
        &mut self,
        empty: bool,
        body: impl FnOnce(&mut Self) -> AvrowResult<()>,
    ) -> AvrowResult<()> {
        let block = self.emit(Read(Kind::Long));
        self.emit(EvalEqual(0));
        let to_end = self.emit(CondJump(0));
        self.emit(EvalGreater(0));
        let to_count = self.emit(CondJump(0));
        // A negative count is followed by the block's size in bytes.
        self.emit(Read(Kind::UnusedLong));
        self.emit(MultLong(-1));
        let count = self.pc();
        self.patch(to_count, count);
        let too_many = if empty {
            self.emit(EvalGreater(MAX_EMPTY_ITEMS));
            Some(self.emit(CondJump(0)))
        } else {
            None
        };
        let items = self.pc();
        self.emit(PushLoop);
        body(self)?;
        self.emit(PopLoop);
        self.emit(AddLong(-1));
        self.emit(EvalEqual(0));
        self.emit(CondJump(block));
        self.emit(Jump(items));
        if let Some(at) = too_many {
            let halt = self.pc();
            self.patch(at, halt);
            let e = self.error(format!(
                "block of more than {} empty items",
                MAX_EMPTY_ITEMS
            ));
            self.emit(Halt(e));
        }
        let end = self.pc();
        self.patch(to_end, end);
        Ok(())
    }

    // Whether values of writer schema `w` take no bytes on the wire.
    fn zero_width(&self, w: &Variant, records: &mut Vec<String>) -> bool {
        match self.w_cxt.resolve(w) {
            Ok(Variant::Null) => true,
            Ok(Variant::Fixed { size, .. }) => *size == 0,
            Ok(Variant::Record { name, fields, .. }) => {
                let full = name.fullname();
                if records.contains(&full) {
                    return false;
                }
                records.push(full);
                fields.values().all(|f| self.zero_width(&f.ty, records))
            }
            _ => false,
        }
    }

    fn record_body(&mut self, w: &'a Variant, r: &'a Variant) -> AvrowResult<()> {
        let (wfields, rfields, rname) = match (w, r) {
            (
                Variant::Record { fields: wf, .. },
                Variant::Record {
                    fields: rf, name, ..
                },
            ) => (wf, rf, name),
            _ => return Err(incompatible("record body over non-record schemas".to_string())),
        };
        let mut seen = vec![false; rfields.len()];
        for (wname, wfield) in wfields {
            match reader_field(rfields, wname) {
                Some((ri, rfield)) => {
                    seen[ri] = true;
                    self.emit(Enter(ri));
                    self.resolve(&wfield.ty, &rfield.ty)?;
                    self.emit(Exit);
                }
                None => self.skip(&wfield.ty)?,
            }
        }
        for (ri, rfield) in rfields.values().enumerate() {
            if seen[ri] {
                continue;
            }
            if !rfield.has_default() {
                return Err(incompatible(format!(
                    "field {} in reader is not present in writer and has no default value",
                    rfield.name
                )));
            }
            log::trace!("{}.{} takes its default", rname.fullname(), rfield.name);
            self.emit(SetDefault(ri));
        }
        Ok(())
    }

    fn skip_body(&mut self, w: &'a Variant) -> AvrowResult<()> {
        if let Variant::Record { fields, .. } = w {
            for field in fields.values() {
                self.skip(&field.ty)?;
            }
        }
        Ok(())
    }

    // Reads past a value of the writer schema without storing it.
    fn skip(&mut self, w: &'a Variant) -> AvrowResult<()> {
        let w = self.w_cxt.resolve(w)?;
        match w {
            Variant::Null => {}
            Variant::Boolean => {
                self.emit(Read(Kind::Boolean));
            }
            Variant::Int | Variant::Long | Variant::Enum { .. } => {
                self.emit(Read(Kind::Long));
            }
            Variant::Float => {
                self.emit(Read(Kind::Float));
            }
            Variant::Double => {
                self.emit(Read(Kind::Double));
            }
            Variant::Bytes | Variant::Str => {
                self.emit(Read(Kind::Bytes));
            }
            Variant::Fixed { size, .. } => {
                self.emit(Read(Kind::Fixed(*size)));
            }
            Variant::Array { items } => {
                let empty = self.zero_width(items, &mut vec![]);
                self.block_loop(empty, |c| c.skip(items))?
            }
            Variant::Map { values } => self.block_loop(false, |c| {
                c.emit(Read(Kind::Bytes));
                c.skip(values)
            })?,
            Variant::Union { variants } => {
                self.emit(Read(Kind::Long));
                let mut jumps = Vec::with_capacity(variants.len());
                for i in 0..variants.len() {
                    self.emit(EvalEqual(i as i64));
                    jumps.push(self.emit(CondJump(0)));
                }
                let bad = self.error("invalid union index".to_string());
                self.emit(Halt(bad));
                let mut ends = vec![];
                for (i, branch) in variants.iter().enumerate() {
                    let here = self.pc();
                    self.patch(jumps[i], here);
                    self.skip(branch)?;
                    ends.push(self.emit(Jump(0)));
                }
                let end = self.pc();
                for at in ends {
                    self.patch(at, end);
                }
            }
            Variant::Record { name, .. } => self.call(MethodKey::Skip(name.fullname()), w, None),
            Variant::Named(_) | Variant::Logical { .. } => {
                return Err(incompatible(format!("unresolved schema {}", describe(w))))
            }
        }
        Ok(())
    }
}

fn incompatible(msg: String) -> AvrowErr {
    AvrowErr::IncompatibleSchemas(msg)
}

fn describe(v: &Variant) -> String {
    v.union_key()
}

fn names_match(writer: &Name, reader: &Name, reader_aliases: &Option<Vec<String>>) -> bool {
    let full = writer.fullname();
    reader.fullname() == full
        || reader.name == writer.name
        || reader_aliases
            .as_ref()
            .map_or(false, |a| a.iter().any(|a| *a == full))
}

// The reader field a writer field is read into: by name first, then alias.
fn reader_field<'f>(fields: &'f IndexMap<String, Field>, name: &str) -> Option<(usize, &'f Field)> {
    fields
        .values()
        .enumerate()
        .find(|(_, f)| f.name == name)
        .or_else(|| fields.values().enumerate().find(|(_, f)| f.answers_to(name)))
}

// The Read and Set kinds for a primitive writer/reader pair, if the writer
// can be read as the reader.
fn promotion(w: &Variant, r: &Variant) -> Option<(Kind, Kind)> {
    use Variant as V;
    Some(match (w, r) {
        (V::Null, V::Null) => (Kind::Null, Kind::Null),
        (V::Boolean, V::Boolean) => (Kind::Boolean, Kind::Boolean),
        (V::Int, V::Int) => (Kind::Int, Kind::Int),
        (V::Int, V::Long) => (Kind::Int, Kind::Long),
        (V::Int, V::Float) => (Kind::Int, Kind::Float),
        (V::Int, V::Double) => (Kind::Int, Kind::Double),
        (V::Long, V::Long) => (Kind::Long, Kind::Long),
        (V::Long, V::Float) => (Kind::Long, Kind::Float),
        (V::Long, V::Double) => (Kind::Long, Kind::Double),
        (V::Float, V::Float) => (Kind::Float, Kind::Float),
        (V::Float, V::Double) => (Kind::Float, Kind::Double),
        (V::Double, V::Double) => (Kind::Double, Kind::Double),
        // Both are length-prefixed, so the reader's kind reads either.
        (V::Bytes, V::Bytes) | (V::Str, V::Bytes) => (Kind::Bytes, Kind::Bytes),
        (V::Str, V::Str) | (V::Bytes, V::Str) => (Kind::String, Kind::String),
        _ => return None,
    })
}
