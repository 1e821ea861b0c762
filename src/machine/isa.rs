//! Instruction set definitions.
//!
//! The [`for_each_op!`](crate::for_each_op) macro holds the canonical
//! instruction table and invokes a callback macro for code generation, so the
//! opcode enum, the instruction words, the assembler's operand parser and the
//! image codec all come from a single definition list.
//!
//! Operand kinds in the table:
//! - `Imm`: plain word immediate
//! - `Lbl`: instruction address; assembly source may use a label
//! - `Sym`: data address; assembly source may use a global symbol name
//!
//! # Image format
//!
//! An instruction word encodes as its opcode byte followed by its operands as
//! little-endian words.

use std::fmt;

use crate::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::machine::errors::VmError;
use crate::machine::word::Word;

/// Invokes a callback macro with the complete instruction definition list.
///
/// Lets several modules generate instruction-related code without duplicating
/// the definitions; see [`assembler`](super::assembler) for the operand
/// parser generated from the same list.
#[macro_export]
macro_rules! for_each_op {
    ($callback:ident) => {
        $callback! {
            /// Halt ; end the run
            Halt = 0x00, "Halt" => [],
            /// Nop ; no effect
            Nop = 0x01, "Nop" => [],
            /// Dup ; duplicate the top of stack
            Dup = 0x02, "Dup" => [],
            /// Add ; s[t-2] <- s[t-2] + s[t-1], pop one
            Add = 0x03, "Add" => [],
            /// Sub ; s[t-2] <- s[t-2] - s[t-1], pop one
            Sub = 0x04, "Sub" => [],
            /// Mul ; s[t-2] <- s[t-2] * s[t-1], pop one
            Mul = 0x05, "Mul" => [],
            /// Div ; floored signed division, traps on zero divisor
            Div = 0x06, "Div" => [],
            /// Equ ; s[t-2] <- s[t-2] == s[t-1], pop one
            Equ = 0x07, "Equ" => [],
            /// NEqu ; s[t-2] <- s[t-2] != s[t-1], pop one
            NEqu = 0x08, "NEqu" => [],
            /// Lss ; s[t-2] <- s[t-2] < s[t-1], pop one
            Lss = 0x09, "Lss" => [],
            /// LssEq ; s[t-2] <- s[t-2] <= s[t-1], pop one
            LssEq = 0x0A, "LssEq" => [],
            /// Gtr ; s[t-2] <- s[t-2] > s[t-1], pop one
            Gtr = 0x0B, "Gtr" => [],
            /// GtrEq ; s[t-2] <- s[t-2] >= s[t-1], pop one
            GtrEq = 0x0C, "GtrEq" => [],
            /// Neg ; bitwise complement of the top of stack
            Neg = 0x0D, "Neg" => [],
            /// Ret ; pop the return address into PC
            Ret = 0x0E, "Ret" => [],
            /// Read ; push the next input word
            Read = 0x0F, "Read" => [],
            /// Write ; append the decimal rendering of the top of stack
            Write = 0x10, "Write" => [],
            /// WriteS ; append the C-string the top of stack points at
            WriteS = 0x11, "WriteS" => [],
            /// Print ; emit the print buffer as one output line, pop one
            Print = 0x12, "Print" => [],
            /// Leave ; tear down the current frame
            Leave = 0x13, "Leave" => [],
            /// StoG a ; pop into global address a (0-2 are PC/TOP/BP)
            StoG = 0x14, "StoG" => [target: Sym],
            /// LoadG a ; push global address a (0-2 are PC/TOP/BP)
            LoadG = 0x15, "LoadG" => [target: Sym],
            /// Const a ; push the immediate
            Const = 0x16, "Const" => [value: Imm],
            /// Enter a ; build a frame with a local slots
            Enter = 0x17, "Enter" => [locals: Imm],
            /// Jmp a ; unconditional jump
            Jmp = 0x18, "Jmp" => [target: Lbl],
            /// FJmp a ; pop, jump when the value is zero
            FJmp = 0x19, "FJmp" => [target: Lbl],
            /// Load a b ; push local slot b from a static levels out
            Load = 0x1A, "Load" => [level: Imm, slot: Imm],
            /// Sto a b ; pop into local slot b, a static levels out
            Sto = 0x1B, "Sto" => [level: Imm, slot: Imm],
            /// Call a b ; push return address and lexical delta a, jump to b
            Call = 0x1C, "Call" => [level: Imm, target: Lbl],
            /// StoArr a b ; rank-b row-major store into the array at a
            StoArr = 0x1D, "StoArr" => [target: Sym, rank: Imm],
            /// LoadArr a b ; rank-b row-major load from the array at a
            LoadArr = 0x1E, "LoadArr" => [target: Sym, rank: Imm],
        }
    };
}

macro_rules! define_ops {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// Opcode tags, one per entry in the instruction table.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Op {
            $( $name = $opcode, )*
        }

        impl Op {
            /// Every opcode, in table order.
            pub const ALL: &'static [Op] = &[ $( Op::$name, )* ];

            /// The assembly mnemonic.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Op::$name => $mnemonic, )*
                }
            }

            /// Number of immediate operands the instruction carries.
            pub const fn operand_count(self) -> usize {
                match self {
                    $( Op::$name => define_ops!(@count $( $field ),*), )*
                }
            }

            /// Looks an opcode up by its assembly mnemonic (case-sensitive).
            pub fn from_mnemonic(name: &str) -> Result<Op, VmError> {
                match name {
                    $( $mnemonic => Ok(Op::$name), )*
                    _ => Err(VmError::UnknownMnemonic {
                        name: name.to_string(),
                    }),
                }
            }
        }

        /// One instruction word: an opcode with its decoded operands.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Instr {
            $(
                $(#[$doc])*
                $name { $( $field: Word ),* },
            )*
        }

        impl Instr {
            /// The opcode tag of this instruction word.
            pub const fn op(&self) -> Op {
                match self {
                    $( Instr::$name { .. } => Op::$name, )*
                }
            }
        }

        impl fmt::Display for Instr {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(
                        Instr::$name { $( $field ),* } => {
                            write!(f, $mnemonic)?;
                            $( write!(f, " {}", $field)?; )*
                            Ok(())
                        }
                    )*
                }
            }
        }

        impl Encode for Instr {
            fn encode<S: EncodeSink>(&self, out: &mut S) {
                match self {
                    $(
                        Instr::$name { $( $field ),* } => {
                            out.write(&[$opcode]);
                            $( $field.encode(out); )*
                        }
                    )*
                }
            }
        }

        impl Decode for Instr {
            fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                match u8::decode(input)? {
                    $(
                        $opcode => Ok(Instr::$name {
                            $( $field: Word::decode(input)?, )*
                        }),
                    )*
                    _ => Err(DecodeError::InvalidValue),
                }
            }
        }
    };

    (@count $( $field:ident ),*) => {
        <[()]>::len(&[ $( define_ops!(@unit $field) ),* ])
    };
    (@unit $field:ident) => { () };
}

for_each_op!(define_ops);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Decode, Encode};

    #[test]
    fn opcodes_are_unique() {
        for (i, a) in Op::ALL.iter().enumerate() {
            for b in &Op::ALL[i + 1..] {
                assert_ne!(*a as u8, *b as u8, "{a:?} and {b:?} share an opcode");
            }
        }
    }

    #[test]
    fn mnemonics_round_trip() {
        for op in Op::ALL {
            assert_eq!(Op::from_mnemonic(op.mnemonic()).unwrap(), *op);
        }
    }

    #[test]
    fn from_mnemonic_is_case_sensitive() {
        assert!(matches!(
            Op::from_mnemonic("add"),
            Err(VmError::UnknownMnemonic { .. })
        ));
        assert!(matches!(
            Op::from_mnemonic("HALT"),
            Err(VmError::UnknownMnemonic { .. })
        ));
    }

    #[test]
    fn operand_counts() {
        assert_eq!(Op::Halt.operand_count(), 0);
        assert_eq!(Op::Neg.operand_count(), 0);
        assert_eq!(Op::Const.operand_count(), 1);
        assert_eq!(Op::Enter.operand_count(), 1);
        assert_eq!(Op::Load.operand_count(), 2);
        assert_eq!(Op::StoArr.operand_count(), 2);
    }

    #[test]
    fn display_renders_assembly() {
        assert_eq!(Instr::Halt {}.to_string(), "Halt");
        assert_eq!(Instr::Const { value: -7 }.to_string(), "Const -7");
        assert_eq!(
            Instr::Call { level: 1, target: 17 }.to_string(),
            "Call 1 17"
        );
    }

    #[test]
    fn instr_op_matches_variant() {
        assert_eq!(Instr::Ret {}.op(), Op::Ret);
        assert_eq!(Instr::Jmp { target: 3 }.op(), Op::Jmp);
    }

    #[test]
    fn codec_round_trips() {
        let samples = [
            Instr::Halt {},
            Instr::Const { value: -32768 },
            Instr::Load { level: 2, slot: 5 },
            Instr::Call { level: 0, target: 100 },
            Instr::LoadArr { target: 3, rank: 3 },
        ];
        for instr in samples {
            assert_eq!(Instr::from_bytes(&instr.to_bytes()).unwrap(), instr);
        }
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        assert!(Instr::from_bytes(&[0xFF]).is_err());
    }

    #[test]
    fn decode_rejects_truncated_operands() {
        // Const takes a word; give it one byte.
        assert!(Instr::from_bytes(&[0x16, 0x01]).is_err());
    }
}
