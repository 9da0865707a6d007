//! The schema resolution instruction set.
//!
//! A program reads a message written with one schema into a value shaped
//! by another. Structural instructions (`Enter`, `AppendArray`,
//! `AppendMap`, `Exit`) move a cursor over the destination value; `Read`
//! pulls a primitive off the wire into a register and `Set` stores the
//! register into the value under the cursor. Record bodies are subroutines
//! reached with `Call`, which is what lets recursive schemas compile to a
//! finite program.

use std::fmt::{self, Display};

/// The wire primitive moved by a `Read` or `Set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Fixed(usize),
    // A long that is read and thrown away, such as a block's byte size.
    UnusedLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Instruction {
    Read(Kind),
    Set(Kind),
    // Sets a reader field the writer does not have to its default.
    SetDefault(usize),
    // Moves the cursor to a field of a record or an alternative of a union.
    Enter(usize),
    Exit,
    AppendArray,
    AppendMap,
    Call(usize),
    Return,
    Jump(usize),
    CondJump(usize),
    EvalGreater(i64),
    EvalEqual(i64),
    SetLong(i64),
    AddLong(i64),
    MultLong(i64),
    PushLoop,
    PopLoop,
    // Halt(0) stops normally; Halt(n) fails with the n-th error message.
    Halt(usize),
}

impl Instruction {
    // Instructions that the analyzer must bind to an accessor.
    pub(crate) fn is_structural(&self) -> bool {
        matches!(
            self,
            Instruction::Enter(_)
                | Instruction::AppendArray
                | Instruction::AppendMap
                | Instruction::SetDefault(_)
        ) || matches!(self, Instruction::Set(k) if *k != Kind::Null)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Read(k) => write!(f, "Read({:?})", k),
            Instruction::Set(k) => write!(f, "Set({:?})", k),
            Instruction::SetDefault(i) => write!(f, "SetDefault({})", i),
            Instruction::Enter(i) => write!(f, "Enter({})", i),
            Instruction::Call(pc) => write!(f, "Call({})", pc),
            Instruction::Jump(pc) => write!(f, "Jump({})", pc),
            Instruction::CondJump(pc) => write!(f, "CondJump({})", pc),
            Instruction::EvalGreater(n) => write!(f, "EvalGreater({})", n),
            Instruction::EvalEqual(n) => write!(f, "EvalEqual({})", n),
            Instruction::SetLong(n) => write!(f, "SetLong({})", n),
            Instruction::AddLong(n) => write!(f, "AddLong({})", n),
            Instruction::MultLong(n) => write!(f, "MultLong({})", n),
            Instruction::Halt(n) => write!(f, "Halt({})", n),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A compiled resolution program.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Program {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) errors: Vec<String>,
}

impl Program {
    /// Returns the message reported by `Halt(n)`, or `None` for a normal stop.
    pub(crate) fn halt_message(&self, n: usize) -> Option<&str> {
        if n == 0 {
            return None;
        }
        Some(
            self.errors
                .get(n - 1)
                .map(String::as_str)
                .unwrap_or("program halted with an unknown error"),
        )
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, inst) in self.instructions.iter().enumerate() {
            match inst {
                Instruction::Halt(n) if *n > 0 => writeln!(
                    f,
                    "{:>4}: {} {:?}",
                    pc,
                    inst,
                    self.halt_message(*n).unwrap_or_default()
                )?,
                _ => writeln!(f, "{:>4}: {}", pc, inst)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing() {
        let prog = Program {
            instructions: vec![
                Instruction::Read(Kind::Long),
                Instruction::Set(Kind::Long),
                Instruction::Halt(0),
                Instruction::Halt(1),
            ],
            errors: vec!["bad".to_string()],
        };
        assert_eq!(
            prog.to_string(),
            "   0: Read(Long)\n   1: Set(Long)\n   2: Halt(0)\n   3: Halt(1) \"bad\"\n"
        );
        assert_eq!(prog.halt_message(0), None);
        assert_eq!(prog.halt_message(1), Some("bad"));
    }

    #[test]
    fn structural_instructions() {
        assert!(Instruction::Enter(0).is_structural());
        assert!(Instruction::Set(Kind::Int).is_structural());
        assert!(!Instruction::Set(Kind::Null).is_structural());
        assert!(!Instruction::Read(Kind::Int).is_structural());
    }
}
