//! Runs an analyzed program over an encoded message.

use crate::analyze::{DecodeProgram, EnterBinding};
use crate::config::MAX_DEPTH;
use crate::error::{AvrowErr, AvrowResult};
use crate::host::Scalar;
use crate::program::{Instruction, Kind};
use crate::util::{
    decode_bool, decode_bytes, decode_double, decode_fixed, decode_float, decode_int,
    decode_long, decode_string,
};
use std::any::Any;
use std::borrow::Cow;

/// Decodes `data` into `target`, which must be the host type the program
/// was analyzed for. Bytes after the value are ignored.
pub(crate) fn run(prog: &DecodeProgram, data: &[u8], target: &mut dyn Any) -> AvrowResult<()> {
    let mut machine = Machine {
        prog,
        input: data,
        loops: vec![],
        depth: 0,
    };
    let mut frame = Frame::default();
    match machine.eval(0, &mut frame, target)? {
        Stop::Halt => Ok(()),
        Stop::Exit(pc) | Stop::Return(pc) => Err(AvrowErr::DecodeFailed(format!(
            "program left its root at {}",
            pc
        ))),
    }
}

// Registers of one level of nesting.
#[derive(Default)]
struct Frame {
    boolean: bool,
    int: i64,
    float: f64,
    bytes: Vec<u8>,
    string: String,
    cond: bool,
}

enum Stop {
    Exit(usize),
    Return(usize),
    Halt,
}

struct Machine<'p, 'd> {
    prog: &'p DecodeProgram,
    input: &'d [u8],
    // Remaining item counts of the enclosing array and map blocks.
    loops: Vec<i64>,
    // Nested values and record calls currently open.
    depth: usize,
}

fn broken(pc: usize, what: &str) -> AvrowErr {
    AvrowErr::DecodeFailed(format!("{} at {}", what, pc))
}

impl<'p, 'd> Machine<'p, 'd> {
    fn eval(&mut self, mut pc: usize, frame: &mut Frame, target: &mut dyn Any) -> AvrowResult<Stop> {
        let prog = self.prog;
        let code = &prog.program.instructions;
        loop {
            let inst = *code.get(pc).ok_or_else(|| broken(pc, "ran off the program"))?;
            match inst {
                Instruction::Read(kind) => self.read(kind, frame)?,
                Instruction::Set(kind) => match prog.set[pc] {
                    Some(write) => {
                        write(target, scalar(kind, frame)).map_err(AvrowErr::DecodeFailed)?
                    }
                    None if kind == Kind::Null => {}
                    None => return Err(broken(pc, "unbound Set")),
                },
                Instruction::SetDefault(_) => {
                    let b = prog.defaults[pc]
                        .as_ref()
                        .ok_or_else(|| broken(pc, "unbound SetDefault"))?;
                    let field = (b.field)(target).ok_or_else(|| broken(pc, "field not found"))?;
                    if !b.host.assign(field, (b.make)()) {
                        return Err(AvrowErr::DecodeFailed(format!(
                            "default value does not fit {}",
                            b.host.name()
                        )));
                    }
                }
                Instruction::Enter(_) | Instruction::AppendArray | Instruction::AppendMap => {
                    pc = self.enter(pc, frame, target)?;
                    continue;
                }
                Instruction::Exit => return Ok(Stop::Exit(pc)),
                Instruction::Call(to) => {
                    self.descend(pc)?;
                    let stop = self.eval(to, frame, target);
                    self.depth -= 1;
                    match stop? {
                        Stop::Return(_) => {}
                        _ => return Err(broken(to, "subroutine did not return")),
                    }
                }
                Instruction::Return => return Ok(Stop::Return(pc)),
                Instruction::Jump(to) => {
                    pc = to;
                    continue;
                }
                Instruction::CondJump(to) => {
                    if frame.cond {
                        pc = to;
                        continue;
                    }
                }
                Instruction::EvalGreater(n) => frame.cond = frame.int > n,
                Instruction::EvalEqual(n) => frame.cond = frame.int == n,
                Instruction::SetLong(n) => frame.int = n,
                Instruction::AddLong(n) => {
                    frame.int = frame
                        .int
                        .checked_add(n)
                        .ok_or_else(|| broken(pc, "count overflow"))?
                }
                Instruction::MultLong(n) => {
                    frame.int = frame
                        .int
                        .checked_mul(n)
                        .ok_or_else(|| broken(pc, "count overflow"))?
                }
                Instruction::PushLoop => self.loops.push(frame.int),
                Instruction::PopLoop => {
                    frame.int = self.loops.pop().ok_or_else(|| broken(pc, "loop underflow"))?
                }
                Instruction::Halt(0) => return Ok(Stop::Halt),
                Instruction::Halt(n) => {
                    let msg = prog.program.halt_message(n).unwrap_or_default();
                    return Err(AvrowErr::ProgramHalted(msg.to_string()));
                }
            }
            pc += 1;
        }
    }

    fn read(&mut self, kind: Kind, frame: &mut Frame) -> AvrowResult<()> {
        let input = &mut self.input;
        match kind {
            Kind::Null => {}
            Kind::Boolean => frame.boolean = decode_bool(input)?,
            Kind::Int => {
                frame.int = i64::from(decode_int(input)?);
                frame.float = frame.int as f64;
            }
            Kind::Long => {
                frame.int = decode_long(input)?;
                frame.float = frame.int as f64;
            }
            Kind::UnusedLong => {
                decode_long(input)?;
            }
            Kind::Float => frame.float = f64::from(decode_float(input)?),
            Kind::Double => frame.float = decode_double(input)?,
            Kind::Bytes => frame.bytes = decode_bytes(input)?,
            Kind::String => frame.string = decode_string(input)?,
            Kind::Fixed(n) => frame.bytes = decode_fixed(input, n)?,
        }
        Ok(())
    }

    // Descends into the value an Enter or Append instruction selects, runs
    // the nested code and returns the pc after its Exit.
    fn enter(&mut self, pc: usize, frame: &mut Frame, target: &mut dyn Any) -> AvrowResult<usize> {
        let prog = self.prog;
        let binding = prog.enter[pc]
            .as_ref()
            .ok_or_else(|| broken(pc, "unbound Enter"))?;
        let missing = || broken(pc, "value not found");
        match binding {
            EnterBinding::Field(get) => {
                let child = get(target).ok_or_else(missing)?;
                self.nested(pc + 1, child)
            }
            EnterBinding::Nullable { insert } => {
                let child = insert(target).ok_or_else(missing)?;
                self.nested(pc + 1, child)
            }
            EnterBinding::NullOption { clear } => {
                if !clear(target) {
                    return Err(missing());
                }
                self.nested(pc + 1, &mut ())
            }
            EnterBinding::NullVariant { select } => {
                if !select(target) {
                    return Err(missing());
                }
                self.nested(pc + 1, &mut ())
            }
            EnterBinding::Variant { host, commit } => {
                let mut fresh = host.new_value();
                let next = self.nested(pc + 1, &mut *fresh)?;
                if !commit(target, fresh) {
                    return Err(broken(pc, "union alternative does not fit"));
                }
                Ok(next)
            }
            EnterBinding::ArrayElem { push } => {
                let child = push(target).ok_or_else(missing)?;
                self.nested(pc + 1, child)
            }
            EnterBinding::MapElem { host, insert } => {
                let key = std::mem::take(&mut frame.string);
                let mut fresh = host.new_value();
                let next = self.nested(pc + 1, &mut *fresh)?;
                if !insert(target, key, fresh) {
                    return Err(broken(pc, "map value does not fit"));
                }
                Ok(next)
            }
        }
    }

    fn nested(&mut self, pc: usize, target: &mut dyn Any) -> AvrowResult<usize> {
        self.descend(pc)?;
        let mut frame = Frame::default();
        let stop = self.eval(pc, &mut frame, target);
        self.depth -= 1;
        match stop? {
            Stop::Exit(at) => Ok(at + 1),
            _ => Err(broken(pc, "nested value did not exit")),
        }
    }

    fn descend(&mut self, pc: usize) -> AvrowResult<()> {
        if self.depth >= MAX_DEPTH {
            return Err(AvrowErr::DecodeFailed(format!(
                "value nested deeper than {} levels at {}",
                MAX_DEPTH, pc
            )));
        }
        self.depth += 1;
        Ok(())
    }
}

// Takes the register that a Set of `kind` stores.
fn scalar(kind: Kind, frame: &mut Frame) -> Scalar<'static> {
    match kind {
        Kind::Boolean => Scalar::Boolean(frame.boolean),
        Kind::Int | Kind::Long => Scalar::Long(frame.int),
        Kind::Float | Kind::Double => Scalar::Double(frame.float),
        Kind::Bytes | Kind::Fixed(_) => Scalar::Bytes(Cow::Owned(std::mem::take(&mut frame.bytes))),
        Kind::String => Scalar::String(Cow::Owned(std::mem::take(&mut frame.string))),
        Kind::Null | Kind::UnusedLong => Scalar::Null,
    }
}
