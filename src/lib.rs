//! Stack-based virtual machine for the Tastier toy language.
//!
//! A 16-bit word machine with separate instruction, data and stack memories,
//! nested lexical scoping through static links, and a small assembly dialect
//! produced by the Tastier compiler. The crate bundles the machine itself,
//! the assembler/loader for the textual format, and a versioned binary
//! program-image format.

pub mod encoding;
pub mod machine;
pub mod utils;
