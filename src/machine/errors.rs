//! The closed error set for assembly, image loading and execution.

use tastier_derive::Error;

use crate::encoding::DecodeError;
use crate::machine::word::Word;

/// Errors that can occur while assembling, loading or running a program.
///
/// Runtime faults carry the address of the faulting instruction; none of them
/// are recoverable mid-run.
#[derive(Debug, Error)]
pub enum VmError {
    // ---- runtime faults ----
    /// An array index fell outside its declared dimension.
    #[error("pc {pc}: index {index} out of bounds for dimension of extent {extent}")]
    IndexOutOfBounds { pc: Word, index: Word, extent: Word },
    /// `WriteS` was given a pointer that does not reach data memory.
    #[error("pc {pc}: string pointer {pointer} does not reach data memory")]
    NullStringPointer { pc: Word, pointer: Word },
    /// `Read` executed with no input words left.
    #[error("pc {pc}: input exhausted")]
    InputExhausted { pc: Word },
    /// Execution reached an address with no instruction.
    #[error("no instruction at address {pc}")]
    IllegalInstruction { pc: Word },
    /// `Div` with a zero divisor.
    #[error("pc {pc}: division by zero")]
    DivideByZero { pc: Word },
    /// A memory access fell outside its bank.
    #[error("pc {pc}: {memory} address {address} outside [0, 4096)")]
    MemoryFault {
        pc: Word,
        memory: &'static str,
        address: i64,
    },

    // ---- assembly and loading ----
    /// Any assembly failure, with its source location.
    #[error("line {line}: {source}")]
    AssemblyError {
        line: usize,
        offset: usize,
        source: String,
    },
    /// Unrecognized instruction mnemonic.
    #[error("unknown mnemonic `{name}`")]
    UnknownMnemonic { name: String },
    /// Unrecognized header directive.
    #[error("unknown directive `{directive}`")]
    UnknownDirective { directive: String },
    /// A header directive appeared after the first instruction.
    #[error("directive `{directive}` must precede the first instruction")]
    MisplacedDirective { directive: String },
    /// Wrong number of operands for a mnemonic.
    #[error("{mnemonic} takes {expected} operand(s), got {actual}")]
    OperandCount {
        mnemonic: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Operand token is neither a word nor a resolvable name.
    #[error("invalid operand `{token}`")]
    InvalidOperand { token: String },
    /// Label defined more than once.
    #[error("duplicate label `{label}`")]
    DuplicateLabel { label: String },
    /// Symbol declared more than once.
    #[error("duplicate symbol `{name}`")]
    DuplicateSymbol { name: String },
    /// Reference to a name no label or symbol defines.
    #[error("undefined name `{name}`")]
    UndefinedName { name: String },
    /// An external symbol was used where a resolved address is required.
    #[error("`{name}` is external and has no address here")]
    UnresolvedExternal { name: String },
    /// `.names` disagrees with the number of symbol directives.
    #[error(".names declared {declared} symbols but {actual} were defined")]
    SymbolCountMismatch { declared: usize, actual: usize },
    /// More instructions than instruction memory holds.
    #[error("program has {count} instructions, more than instruction memory holds")]
    ProgramTooLarge { count: usize },
    /// File could not be read or written.
    #[error("{path}: {message}")]
    Io { path: String, message: String },
    /// Program image failed to decode.
    #[error("program image rejected: {reason}")]
    DecodeError { reason: String },
}

impl From<DecodeError> for VmError {
    fn from(err: DecodeError) -> Self {
        let reason = match err {
            DecodeError::UnexpectedEof => "truncated",
            DecodeError::InvalidValue => "invalid value",
            DecodeError::LengthOverflow => "length overflow",
        };
        VmError::DecodeError {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_faults_name_the_pc() {
        let err = VmError::DivideByZero { pc: 17 };
        assert_eq!(err.to_string(), "pc 17: division by zero");

        let err = VmError::MemoryFault {
            pc: 3,
            memory: "stack",
            address: -1,
        };
        assert_eq!(err.to_string(), "pc 3: stack address -1 outside [0, 4096)");
    }

    #[test]
    fn assembly_error_names_the_line() {
        let err = VmError::AssemblyError {
            line: 4,
            offset: 9,
            source: "unknown mnemonic `Fetch`".to_string(),
        };
        assert_eq!(err.to_string(), "line 4: unknown mnemonic `Fetch`");
    }

    #[test]
    fn decode_error_conversion() {
        let err: VmError = DecodeError::UnexpectedEof.into();
        assert!(matches!(
            err,
            VmError::DecodeError { ref reason } if reason == "truncated"
        ));
    }
}
