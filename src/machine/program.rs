//! Assembled program representation and image serialization.
//!
//! A [`Program`] bundles the instruction vector the loader pours into
//! instruction memory with the symbol table declared by the assembly header.
//! Images carry a magic tag and a format version so stale files are rejected
//! instead of misread.

use tastier_derive::BinaryCodec;

use crate::encoding::{Decode, Encode};
use crate::machine::errors::VmError;
use crate::machine::isa::Instr;
use crate::machine::word::Word;

/// Magic bytes identifying a serialized program image.
const MAGIC: &[u8; 3] = b"TVC";

/// Current image format version.
const CURRENT_VERSION: Version = Version::new(1, 0, 0);

/// Semantic version for image format compatibility.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, BinaryCodec)]
struct Version {
    major: u8,
    minor: u8,
    patch: u8,
}

impl Version {
    const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Declared type of a global variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub enum VarType {
    Integer = 1,
    Boolean = 2,
    String = 3,
}

impl TryFrom<Word> for VarType {
    type Error = VmError;

    fn try_from(value: Word) -> Result<Self, VmError> {
        match value {
            1 => Ok(VarType::Integer),
            2 => Ok(VarType::Boolean),
            3 => Ok(VarType::String),
            _ => Err(VmError::InvalidOperand {
                token: value.to_string(),
            }),
        }
    }
}

/// Kind and resolved address of a globally-visible symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub enum SymbolKind {
    /// Global variable with its assigned data address.
    Var { ty: VarType, address: Word },
    /// Global constant cell with its assigned data address.
    Const { address: Word },
    /// Globally-visible procedure and its entry address.
    Proc { address: Word },
    /// Variable to be resolved by an external linker.
    ExternalVar { ty: VarType },
    /// Procedure to be resolved by an external linker.
    ExternalProc,
}

/// One entry of the symbol table.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
}

/// An assembled program: resolved instructions plus the symbol table.
///
/// The machine itself only consumes the instructions; the symbol table is
/// loader-facing metadata kept for external linking and tooling.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct Program {
    /// Instruction memory image, labels already resolved.
    pub code: Vec<Instr>,
    /// Globally-visible symbols in declaration order.
    pub symbols: Vec<Symbol>,
}

impl Program {
    /// Serializes the program to a portable image.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        MAGIC.encode(&mut out);
        CURRENT_VERSION.encode(&mut out);
        Encode::encode(self, &mut out);
        out
    }

    /// Deserializes a program image, validating magic, version and length.
    pub fn from_bytes(mut input: &[u8]) -> Result<Self, VmError> {
        if &<[u8; 3]>::decode(&mut input)? != MAGIC {
            return Err(VmError::DecodeError {
                reason: "bad magic".to_string(),
            });
        }
        if Version::decode(&mut input)? != CURRENT_VERSION {
            return Err(VmError::DecodeError {
                reason: "unsupported version".to_string(),
            });
        }
        let program = <Program as Decode>::decode(&mut input)?;
        if !input.is_empty() {
            return Err(VmError::DecodeError {
                reason: "trailing bytes".to_string(),
            });
        }
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program {
            code: vec![
                Instr::Const { value: 42 },
                Instr::StoG { target: 3 },
                Instr::Halt {},
            ],
            symbols: vec![
                Symbol {
                    name: "counter".to_string(),
                    kind: SymbolKind::Var {
                        ty: VarType::Integer,
                        address: 3,
                    },
                },
                Symbol {
                    name: "Main".to_string(),
                    kind: SymbolKind::Proc { address: 0 },
                },
                Symbol {
                    name: "PrintLine".to_string(),
                    kind: SymbolKind::ExternalProc,
                },
            ],
        }
    }

    #[test]
    fn roundtrip_empty() {
        let program = Program {
            code: vec![],
            symbols: vec![],
        };
        assert_eq!(Program::from_bytes(&program.to_bytes()).unwrap(), program);
    }

    #[test]
    fn roundtrip_with_code_and_symbols() {
        let program = sample();
        assert_eq!(Program::from_bytes(&program.to_bytes()).unwrap(), program);
    }

    #[test]
    fn from_bytes_truncated() {
        let err = Program::from_bytes(&[b'T']).unwrap_err();
        assert!(matches!(err, VmError::DecodeError { ref reason } if reason == "truncated"));
    }

    #[test]
    fn from_bytes_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        let err = Program::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, VmError::DecodeError { ref reason } if reason == "bad magic"));
    }

    #[test]
    fn from_bytes_unsupported_version() {
        let mut bytes = sample().to_bytes();
        bytes[3] = 99;
        let err = Program::from_bytes(&bytes).unwrap_err();
        assert!(
            matches!(err, VmError::DecodeError { ref reason } if reason == "unsupported version")
        );
    }

    #[test]
    fn from_bytes_trailing_bytes() {
        let mut bytes = sample().to_bytes();
        bytes.push(0xFF);
        let err = Program::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, VmError::DecodeError { ref reason } if reason == "trailing bytes"));
    }

    #[test]
    fn from_bytes_corrupt_opcode() {
        let mut bytes = sample().to_bytes();
        // First opcode byte sits right after magic, version and the code
        // vector's length prefix.
        let first_opcode = MAGIC.len() + 3 + 4;
        bytes[first_opcode] = 0xEE;
        assert!(Program::from_bytes(&bytes).is_err());
    }

    #[test]
    fn var_type_try_from() {
        assert_eq!(VarType::try_from(1).unwrap(), VarType::Integer);
        assert_eq!(VarType::try_from(2).unwrap(), VarType::Boolean);
        assert_eq!(VarType::try_from(3).unwrap(), VarType::String);
        assert!(matches!(
            VarType::try_from(4),
            Err(VmError::InvalidOperand { .. })
        ));
    }
}
