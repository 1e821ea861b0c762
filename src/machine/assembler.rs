//! Assembler and loader for Tastier assembly text.
//!
//! Converts the compiler's textual assembly into a [`Program`]: resolves
//! labels to instruction addresses, assigns data addresses to the globals the
//! header declares, and checks operand shapes. Two passes: the first collects
//! labels, symbols and instruction slots; the second parses operands once
//! every name is resolvable.
//!
//! # Syntax
//!
//! ```text
//! label: Mnemonic operand1 operand2   ; comment
//! ```
//!
//! - Header directives (`.names`, `.var`, `.const`, `.proc`, `.external`)
//!   precede the first instruction
//! - Operands are signed decimal words; jump targets may be labels and
//!   global addresses may be declared symbol names
//! - `;` starts a comment, commas between operands are ignored
//! - Labels may contain `$`, used by the `outer$inner` nested-procedure
//!   naming scheme

use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;

use crate::for_each_op;
use crate::machine::errors::VmError;
use crate::machine::isa::{Instr, Op};
use crate::machine::program::{Program, Symbol, SymbolKind, VarType};
use crate::machine::word::{GLOBAL_BASE, MEMORY_SIZE, Word};

const COMMENT_CHAR: char = ';';
const LABEL_SUFFIX: char = ':';
const DIRECTIVE_PREFIX: char = '.';

/// One whitespace-delimited token with its 1-based column.
#[derive(Debug, Clone)]
struct Token<'a> {
    text: &'a str,
    offset: usize,
}

/// Splits a line into tokens. Commas separate like whitespace; `;` starts a
/// comment.
fn tokenize(line: &str) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;

    for (i, byte) in line.bytes().enumerate() {
        if byte == COMMENT_CHAR as u8 {
            if let Some(s) = start.take() {
                out.push(Token {
                    text: &line[s..i],
                    offset: s + 1,
                });
            }
            return out;
        }
        if byte == b',' || byte.is_ascii_whitespace() {
            if let Some(s) = start.take() {
                out.push(Token {
                    text: &line[s..i],
                    offset: s + 1,
                });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push(Token {
            text: &line[s..],
            offset: s + 1,
        });
    }
    out
}

/// Assembly state: labels, declared symbols, and data-address allocation.
struct AsmContext {
    symbols: Vec<Symbol>,
    labels: HashMap<String, usize>,
    declared_names: Option<usize>,
    next_data: Word,
}

impl AsmContext {
    fn new() -> Self {
        Self {
            symbols: Vec::new(),
            labels: HashMap::new(),
            declared_names: None,
            next_data: GLOBAL_BASE,
        }
    }

    /// Registers a label at the given instruction index.
    fn define_label(&mut self, name: &str, index: usize) -> Result<(), VmError> {
        if self.labels.contains_key(name) {
            return Err(VmError::DuplicateLabel {
                label: name.to_string(),
            });
        }
        self.labels.insert(name.to_string(), index);
        Ok(())
    }

    /// Resolves a label to its instruction address.
    fn resolve_label(&self, name: &str) -> Result<Word, VmError> {
        self.labels
            .get(name)
            .map(|index| *index as Word)
            .ok_or_else(|| VmError::UndefinedName {
                name: name.to_string(),
            })
    }

    /// Resolves a symbol name to a data address.
    ///
    /// Only variables and constants carry data addresses; externals have no
    /// address here and procedures live in instruction memory.
    fn resolve_data(&self, name: &str) -> Result<Word, VmError> {
        let symbol = self
            .symbols
            .iter()
            .find(|symbol| symbol.name == name)
            .ok_or_else(|| VmError::UndefinedName {
                name: name.to_string(),
            })?;
        match symbol.kind {
            SymbolKind::Var { address, .. } | SymbolKind::Const { address } => Ok(address),
            SymbolKind::ExternalVar { .. } | SymbolKind::ExternalProc => {
                Err(VmError::UnresolvedExternal {
                    name: name.to_string(),
                })
            }
            SymbolKind::Proc { .. } => Err(VmError::InvalidOperand {
                token: name.to_string(),
            }),
        }
    }

    /// Declares a symbol, keeping declaration order.
    fn declare(&mut self, name: &str, kind: SymbolKind) -> Result<(), VmError> {
        if self.symbols.iter().any(|symbol| symbol.name == name) {
            return Err(VmError::DuplicateSymbol {
                name: name.to_string(),
            });
        }
        self.symbols.push(Symbol {
            name: name.to_string(),
            kind,
        });
        Ok(())
    }

    /// Hands out the next free global data address.
    fn alloc_data(&mut self) -> Word {
        let address = self.next_data;
        self.next_data += 1;
        address
    }
}

/// Parses a signed decimal word.
fn parse_word(token: &str) -> Result<Word, VmError> {
    token.parse::<Word>().map_err(|_| VmError::InvalidOperand {
        token: token.to_string(),
    })
}

/// Parses a word immediate or resolves a label reference.
fn parse_word_or_label(token: &str, ctx: &AsmContext) -> Result<Word, VmError> {
    if let Ok(value) = token.parse::<Word>() {
        return Ok(value);
    }
    ctx.resolve_label(token)
}

/// Parses a word immediate or resolves a global symbol to its data address.
fn parse_word_or_symbol(token: &str, ctx: &AsmContext) -> Result<Word, VmError> {
    if let Ok(value) = token.parse::<Word>() {
        return Ok(value);
    }
    ctx.resolve_data(token)
}

macro_rules! define_parser {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// Parses one instruction line (mnemonic plus operands) into an
        /// [`Instr`], resolving label and symbol operands.
        fn parse_instruction(ctx: &AsmContext, tokens: &[Token]) -> Result<Instr, VmError> {
            let op = Op::from_mnemonic(tokens[0].text)?;
            if tokens.len() != op.operand_count() + 1 {
                return Err(VmError::OperandCount {
                    mnemonic: op.mnemonic(),
                    expected: op.operand_count(),
                    actual: tokens.len() - 1,
                });
            }

            match op {
                $(
                    Op::$name => {
                        #[allow(unused_mut, unused_variables)]
                        let mut operands = tokens.iter().skip(1);
                        Ok(Instr::$name {
                            $(
                                $field: define_parser!(
                                    @operand $kind, operands.next().expect("arity checked"), ctx
                                ),
                            )*
                        })
                    }
                )*
            }
        }
    };

    (@operand Imm, $token:expr, $ctx:expr) => { parse_word($token.text)? };
    (@operand Lbl, $token:expr, $ctx:expr) => { parse_word_or_label($token.text, $ctx)? };
    (@operand Sym, $token:expr, $ctx:expr) => { parse_word_or_symbol($token.text, $ctx)? };
}

for_each_op!(define_parser);

/// Handles one header directive line.
fn parse_directive(ctx: &mut AsmContext, tokens: &[Token]) -> Result<(), VmError> {
    let arity = |expected: usize| -> Result<(), VmError> {
        if tokens.len() != expected {
            return Err(VmError::InvalidOperand {
                token: tokens
                    .last()
                    .map(|token| token.text.to_string())
                    .unwrap_or_default(),
            });
        }
        Ok(())
    };

    match tokens[0].text {
        ".names" => {
            arity(2)?;
            let count =
                tokens[1]
                    .text
                    .parse::<usize>()
                    .map_err(|_| VmError::InvalidOperand {
                        token: tokens[1].text.to_string(),
                    })?;
            ctx.declared_names = Some(count);
            Ok(())
        }
        ".var" => {
            arity(3)?;
            let ty = VarType::try_from(parse_word(tokens[1].text)?)?;
            let address = ctx.alloc_data();
            ctx.declare(tokens[2].text, SymbolKind::Var { ty, address })
        }
        ".const" => {
            arity(2)?;
            let address = ctx.alloc_data();
            ctx.declare(tokens[1].text, SymbolKind::Const { address })
        }
        ".proc" => {
            arity(2)?;
            // Entry address is filled in once all labels are known.
            ctx.declare(tokens[1].text, SymbolKind::Proc { address: 0 })
        }
        ".external" => match tokens.get(1).map(|token| token.text) {
            Some("var") => {
                arity(4)?;
                let ty = VarType::try_from(parse_word(tokens[2].text)?)?;
                ctx.declare(tokens[3].text, SymbolKind::ExternalVar { ty })
            }
            Some("proc") => {
                arity(3)?;
                ctx.declare(tokens[2].text, SymbolKind::ExternalProc)
            }
            _ => Err(VmError::UnknownDirective {
                directive: ".external".to_string(),
            }),
        },
        other => Err(VmError::UnknownDirective {
            directive: other.to_string(),
        }),
    }
}

fn is_label_def(token: &str) -> bool {
    token.ends_with(LABEL_SUFFIX) && token.len() > 1
}

fn label_name(token: &str) -> &str {
    &token[..token.len() - 1]
}

/// Wraps an error with its source location.
fn at_line(line: usize, offset: usize) -> impl Fn(VmError) -> VmError {
    move |err| VmError::AssemblyError {
        line,
        offset,
        source: err.to_string(),
    }
}

/// Assembles a full source string into a [`Program`].
///
/// Pass 1 tokenizes every line, records label positions and header symbols,
/// and counts instruction slots. Pass 2 parses instructions with labels and
/// symbols resolvable.
pub fn assemble_source(source: impl Into<String>) -> Result<Program, VmError> {
    assemble_source_with_name(&source.into(), "<source>")
}

/// Assembles source with an associated filename for diagnostics.
///
/// On failure a compiler-style diagnostic with the offending source line is
/// logged to stderr.
fn assemble_source_with_name(source: &str, source_name: &str) -> Result<Program, VmError> {
    let result = assemble(source);
    if let Err(err) = &result {
        log_assembly_error(source_name, source, err);
    }
    result
}

fn assemble(source: &str) -> Result<Program, VmError> {
    let mut ctx = AsmContext::new();
    let mut instruction_lines: Vec<(usize, Vec<Token>)> = Vec::new();
    let mut seen_instruction = false;

    // Pass 1: labels, directives, instruction slots.
    for (line_index, line) in source.lines().enumerate() {
        let line_no = line_index + 1;
        let mut tokens = tokenize(line);
        if tokens.is_empty() {
            continue;
        }

        if is_label_def(tokens[0].text) {
            let label = label_name(tokens[0].text);
            ctx.define_label(label, instruction_lines.len())
                .map_err(at_line(line_no, tokens[0].offset))?;
            tokens.remove(0);
            if tokens.is_empty() {
                continue;
            }
        }

        if tokens[0].text.starts_with(DIRECTIVE_PREFIX) {
            if seen_instruction {
                return Err(at_line(line_no, tokens[0].offset)(
                    VmError::MisplacedDirective {
                        directive: tokens[0].text.to_string(),
                    },
                ));
            }
            parse_directive(&mut ctx, &tokens).map_err(at_line(line_no, tokens[0].offset))?;
            continue;
        }

        // Catch unknown mnemonics in pass 1 so the earliest line is blamed.
        Op::from_mnemonic(tokens[0].text).map_err(at_line(line_no, tokens[0].offset))?;
        seen_instruction = true;
        instruction_lines.push((line_no, tokens));
    }

    if instruction_lines.len() > MEMORY_SIZE {
        return Err(VmError::ProgramTooLarge {
            count: instruction_lines.len(),
        });
    }

    // Procedure symbols take the address of their label.
    for symbol in &mut ctx.symbols {
        if let SymbolKind::Proc { address } = &mut symbol.kind {
            *address = *ctx
                .labels
                .get(&symbol.name)
                .ok_or_else(|| VmError::UndefinedName {
                    name: symbol.name.clone(),
                })? as Word;
        }
    }

    if let Some(declared) = ctx.declared_names
        && declared != ctx.symbols.len()
    {
        return Err(VmError::SymbolCountMismatch {
            declared,
            actual: ctx.symbols.len(),
        });
    }

    // Pass 2: operand parsing and resolution.
    let mut code = Vec::with_capacity(instruction_lines.len());
    for (line_no, tokens) in instruction_lines {
        let instr =
            parse_instruction(&ctx, &tokens).map_err(at_line(line_no, tokens[0].offset))?;
        if let Instr::StoArr { rank, .. } | Instr::LoadArr { rank, .. } = instr
            && rank < 1
        {
            return Err(at_line(line_no, tokens[0].offset)(VmError::InvalidOperand {
                token: rank.to_string(),
            }));
        }
        code.push(instr);
    }

    Ok(Program {
        code,
        symbols: ctx.symbols,
    })
}

/// Convenience: assemble directly from a file path.
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Program, VmError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|err| VmError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    assemble_source_with_name(&source, &path.display().to_string())
}

/// Returns the line/column/message triple of a located assembly error.
fn assembly_error_location(err: &VmError) -> Option<(usize, usize, &str)> {
    match err {
        VmError::AssemblyError {
            line,
            offset,
            source,
        } => Some((*line, *offset, source)),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for an assembly failure.
fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    offset: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{line:>4} | {text}");
        let _ = writeln!(diag, "  | {underline}^");
    }

    diag
}

/// Emits a diagnostic to stderr for an assembly failure.
fn log_assembly_error(file: &str, source: &str, err: &VmError) {
    if let Some((line, offset, message)) = assembly_error_location(err) {
        eprintln!(
            "{}",
            render_assembly_diagnostic(file, source, line, offset, message)
        );
    } else {
        eprintln!("error: {err}");
    }
}
