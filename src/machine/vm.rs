//! Core virtual machine.
//!
//! A 16-bit word stack machine: separate instruction, data and stack banks of
//! 4096 words, `PC`/`TOP`/`BP` registers, and activation frames linked for
//! nested lexical scoping. All arithmetic wraps in two's complement; division
//! is floored. The fetch-dispatch loop in [`Machine::run`] is the only
//! mutator of machine state.
//!
//! Frame layout, growing upward from `BP`:
//!
//! ```text
//! BP+0  return address          pushed by Call
//! BP+1  lexical-level delta     pushed by Call
//! BP+2  static link             written by Enter
//! BP+3  dynamic link            written by Enter
//! BP+4  locals...
//! ```

use std::collections::VecDeque;
use std::mem;

use crate::machine::errors::VmError;
use crate::machine::isa::Instr;
use crate::machine::program::Program;
use crate::machine::word::{GLOBAL_BASE, MEMORY_SIZE, Word, chr, floor_div};
use crate::utils::log::Logger;

/// Frame slot of the static link, relative to `BP`.
const FRAME_STATIC_LINK: i64 = 2;
/// Frame slot of the dynamic link, relative to `BP`.
const FRAME_DYNAMIC_LINK: i64 = 3;
/// First local slot, relative to `BP`.
const FRAME_LOCALS: i64 = 4;

/// Word count of each memory bank, as an address.
const BANK: i64 = MEMORY_SIZE as i64;

/// The virtual machine: registers, memories and I/O state.
///
/// Input words are consumed by `Read`; `Print` moves the print buffer into
/// the ordered output lines the driver reads back after the run.
pub struct Machine {
    /// Instruction memory, read-only after load.
    code: Vec<Instr>,
    /// Data memory: globals, arrays and string cells.
    data: Vec<Word>,
    /// Stack memory: operands and activation frames.
    stack: Vec<Word>,
    /// Index of the next instruction.
    pc: Word,
    /// Index of the next free stack slot.
    top: Word,
    /// Base of the current frame.
    bp: Word,
    /// Words not yet consumed by `Read`.
    input: VecDeque<Word>,
    /// Accumulates `Write`/`WriteS` text until the next `Print`.
    print_buf: String,
    /// Completed output lines.
    lines: Vec<String>,
    /// Outstanding `Call`s; a `Ret` at depth zero ends the run.
    call_depth: usize,
    running: bool,
    trace: bool,
    logger: Logger,
}

impl Machine {
    /// Creates a machine with the program loaded and all state zeroed.
    pub fn new(program: Program) -> Machine {
        Machine {
            code: program.code,
            data: vec![0; MEMORY_SIZE],
            stack: vec![0; MEMORY_SIZE],
            pc: 0,
            top: 0,
            bp: 0,
            input: VecDeque::new(),
            print_buf: String::new(),
            lines: Vec::new(),
            call_depth: 0,
            running: false,
            trace: false,
            logger: Logger::new("vm"),
        }
    }

    /// Appends words to the input sequence `Read` consumes.
    pub fn feed<I: IntoIterator<Item = Word>>(&mut self, words: I) {
        self.input.extend(words);
    }

    /// Turns the per-instruction trace on or off.
    ///
    /// Trace lines go to the debug log level; enable it with
    /// `log::init(Level::Debug)` to see them.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Output lines produced so far, in emission order.
    pub fn output(&self) -> &[String] {
        &self.lines
    }

    /// Runs until `Halt`, a `Ret` with no outstanding call, or a fault.
    pub fn run(&mut self) -> Result<(), VmError> {
        self.running = true;
        while self.running {
            let at = self.pc;
            let instr = self.fetch(at)?;
            if self.trace {
                self.logger
                    .debug(&format!("{at:>4}: {instr}  top={} bp={}", self.top, self.bp));
            }
            self.pc = at.wrapping_add(1);
            self.exec(instr, at)?;
        }
        Ok(())
    }

    fn fetch(&self, at: Word) -> Result<Instr, VmError> {
        usize::try_from(at)
            .ok()
            .and_then(|index| self.code.get(index))
            .copied()
            .ok_or(VmError::IllegalInstruction { pc: at })
    }

    /// Executes one instruction. `at` is its own address; `self.pc` already
    /// points past it, so jumps simply overwrite `self.pc`.
    fn exec(&mut self, instr: Instr, at: Word) -> Result<(), VmError> {
        match instr {
            Instr::Halt {} => {
                self.running = false;
                Ok(())
            }
            Instr::Nop {} => Ok(()),
            Instr::Dup {} => self.op_dup(at),
            Instr::Add {} => self.binary_op(at, |lhs, rhs| lhs.wrapping_add(rhs)),
            Instr::Sub {} => self.binary_op(at, |lhs, rhs| lhs.wrapping_sub(rhs)),
            Instr::Mul {} => self.binary_op(at, |lhs, rhs| lhs.wrapping_mul(rhs)),
            Instr::Div {} => self.op_div(at),
            Instr::Equ {} => self.binary_op(at, |lhs, rhs| Word::from(lhs == rhs)),
            Instr::NEqu {} => self.binary_op(at, |lhs, rhs| Word::from(lhs != rhs)),
            Instr::Lss {} => self.binary_op(at, |lhs, rhs| Word::from(lhs < rhs)),
            Instr::LssEq {} => self.binary_op(at, |lhs, rhs| Word::from(lhs <= rhs)),
            Instr::Gtr {} => self.binary_op(at, |lhs, rhs| Word::from(lhs > rhs)),
            Instr::GtrEq {} => self.binary_op(at, |lhs, rhs| Word::from(lhs >= rhs)),
            Instr::Neg {} => self.op_neg(at),
            Instr::Ret {} => self.op_ret(at),
            Instr::Read {} => self.op_read(at),
            Instr::Write {} => self.op_write(at),
            Instr::WriteS {} => self.op_write_string(at),
            Instr::Print {} => self.op_print(at),
            Instr::Leave {} => self.op_leave(at),
            Instr::StoG { target } => self.op_store_global(at, target),
            Instr::LoadG { target } => self.op_load_global(at, target),
            Instr::Const { value } => self.push(at, value),
            Instr::Enter { locals } => self.op_enter(at, locals),
            Instr::Jmp { target } => {
                self.pc = target;
                Ok(())
            }
            Instr::FJmp { target } => self.op_false_jump(at, target),
            Instr::Load { level, slot } => self.op_load(at, level, slot),
            Instr::Sto { level, slot } => self.op_store(at, level, slot),
            Instr::Call { level, target } => self.op_call(at, level, target),
            Instr::StoArr { target, rank } => self.op_store_array(at, target, rank),
            Instr::LoadArr { target, rank } => self.op_load_array(at, target, rank),
        }
    }

    // ---- memory access ----

    fn stack_read(&self, at: Word, address: i64) -> Result<Word, VmError> {
        usize::try_from(address)
            .ok()
            .and_then(|index| self.stack.get(index))
            .copied()
            .ok_or(VmError::MemoryFault {
                pc: at,
                memory: "stack",
                address,
            })
    }

    fn stack_write(&mut self, at: Word, address: i64, value: Word) -> Result<(), VmError> {
        let slot = usize::try_from(address)
            .ok()
            .and_then(|index| self.stack.get_mut(index))
            .ok_or(VmError::MemoryFault {
                pc: at,
                memory: "stack",
                address,
            })?;
        *slot = value;
        Ok(())
    }

    fn data_read(&self, at: Word, address: i64) -> Result<Word, VmError> {
        usize::try_from(address)
            .ok()
            .and_then(|index| self.data.get(index))
            .copied()
            .ok_or(VmError::MemoryFault {
                pc: at,
                memory: "data",
                address,
            })
    }

    fn data_write(&mut self, at: Word, address: i64, value: Word) -> Result<(), VmError> {
        let slot = usize::try_from(address)
            .ok()
            .and_then(|index| self.data.get_mut(index))
            .ok_or(VmError::MemoryFault {
                pc: at,
                memory: "data",
                address,
            })?;
        *slot = value;
        Ok(())
    }

    fn push(&mut self, at: Word, value: Word) -> Result<(), VmError> {
        self.stack_write(at, i64::from(self.top), value)?;
        self.top += 1;
        Ok(())
    }

    fn pop(&mut self, at: Word) -> Result<Word, VmError> {
        let value = self.stack_read(at, i64::from(self.top) - 1)?;
        self.top -= 1;
        Ok(value)
    }

    fn peek(&self, at: Word) -> Result<Word, VmError> {
        self.stack_read(at, i64::from(self.top) - 1)
    }

    /// Walks the static-link chain `hops` frames out from `from`.
    fn follow_chain(&self, at: Word, hops: Word, from: Word) -> Result<Word, VmError> {
        let mut base = from;
        let mut remaining = hops;
        while remaining > 0 {
            base = self.stack_read(at, i64::from(base) + FRAME_STATIC_LINK)?;
            remaining -= 1;
        }
        Ok(base)
    }

    /// Replaces the top two operands with `f(below, top)`.
    fn binary_op(&mut self, at: Word, f: impl Fn(Word, Word) -> Word) -> Result<(), VmError> {
        let rhs = self.stack_read(at, i64::from(self.top) - 1)?;
        let lhs = self.stack_read(at, i64::from(self.top) - 2)?;
        self.stack_write(at, i64::from(self.top) - 2, f(lhs, rhs))?;
        self.top -= 1;
        Ok(())
    }

    // ---- handlers ----

    fn op_dup(&mut self, at: Word) -> Result<(), VmError> {
        let value = self.peek(at)?;
        self.push(at, value)
    }

    fn op_div(&mut self, at: Word) -> Result<(), VmError> {
        let divisor = self.peek(at)?;
        if divisor == 0 {
            return Err(VmError::DivideByZero { pc: at });
        }
        self.binary_op(at, floor_div)
    }

    fn op_neg(&mut self, at: Word) -> Result<(), VmError> {
        let value = self.peek(at)?;
        self.stack_write(at, i64::from(self.top) - 1, !value)
    }

    fn op_ret(&mut self, at: Word) -> Result<(), VmError> {
        if self.call_depth == 0 {
            // Returning from the initial frame ends the run.
            self.running = false;
            return Ok(());
        }
        self.call_depth -= 1;
        self.pc = self.pop(at)?;
        Ok(())
    }

    fn op_read(&mut self, at: Word) -> Result<(), VmError> {
        let word = self
            .input
            .pop_front()
            .ok_or(VmError::InputExhausted { pc: at })?;
        self.push(at, word)
    }

    fn op_write(&mut self, at: Word) -> Result<(), VmError> {
        let value = self.peek(at)?;
        self.print_buf.push_str(&value.to_string());
        Ok(())
    }

    /// Appends the string the top of stack points at: characters are read
    /// downward from the pointed cell until a zero terminator.
    fn op_write_string(&mut self, at: Word) -> Result<(), VmError> {
        let pointer = self.peek(at)?;
        if pointer < GLOBAL_BASE {
            return Err(VmError::NullStringPointer { pc: at, pointer });
        }
        let mut address = i64::from(pointer) - i64::from(GLOBAL_BASE);
        loop {
            let word = self.data_read(at, address)?;
            if word == 0 {
                return Ok(());
            }
            self.print_buf.push(chr(word));
            address -= 1;
        }
    }

    fn op_print(&mut self, at: Word) -> Result<(), VmError> {
        self.pop(at)?;
        self.lines.push(mem::take(&mut self.print_buf));
        Ok(())
    }

    /// Restores the caller's frame, leaving the return address on top for a
    /// following `Ret`. Both effects read the frame being left.
    fn op_leave(&mut self, at: Word) -> Result<(), VmError> {
        let frame = self.bp;
        let dynamic_link = self.stack_read(at, i64::from(frame) + FRAME_DYNAMIC_LINK)?;
        self.top = frame + 1;
        self.bp = dynamic_link;
        Ok(())
    }

    /// Stores into a register or data cell selected by the global address:
    /// 0 is `PC` (the store is a jump), 1 is `TOP`, 2 is `BP`, anything else
    /// is the data cell at `target - 3`.
    fn op_store_global(&mut self, at: Word, target: Word) -> Result<(), VmError> {
        let value = self.pop(at)?;
        match target {
            0 => {
                self.pc = value;
                Ok(())
            }
            1 => self.set_top(at, value),
            2 => {
                self.bp = value;
                Ok(())
            }
            _ => self.data_write(at, i64::from(target) - i64::from(GLOBAL_BASE), value),
        }
    }

    /// Pushes a register or data cell selected as in [`Self::op_store_global`].
    /// `LoadG 0` pushes the address of the `LoadG` itself; `LoadG 1` pushes
    /// `TOP` as observed before the push.
    fn op_load_global(&mut self, at: Word, target: Word) -> Result<(), VmError> {
        let value = match target {
            0 => at,
            1 => self.top,
            2 => self.bp,
            _ => self.data_read(at, i64::from(target) - i64::from(GLOBAL_BASE))?,
        };
        self.push(at, value)
    }

    fn set_top(&mut self, at: Word, value: Word) -> Result<(), VmError> {
        let address = i64::from(value);
        if !(0..=BANK).contains(&address) {
            return Err(VmError::MemoryFault {
                pc: at,
                memory: "stack",
                address,
            });
        }
        self.top = value;
        Ok(())
    }

    fn op_load(&mut self, at: Word, level: Word, slot: Word) -> Result<(), VmError> {
        let base = self.follow_chain(at, level, self.bp)?;
        let value = self.stack_read(at, i64::from(base) + FRAME_LOCALS + i64::from(slot))?;
        self.push(at, value)
    }

    fn op_store(&mut self, at: Word, level: Word, slot: Word) -> Result<(), VmError> {
        let value = self.pop(at)?;
        let base = self.follow_chain(at, level, self.bp)?;
        self.stack_write(at, i64::from(base) + FRAME_LOCALS + i64::from(slot), value)
    }

    fn op_false_jump(&mut self, at: Word, target: Word) -> Result<(), VmError> {
        let value = self.pop(at)?;
        if value == 0 {
            self.pc = target;
        }
        Ok(())
    }

    /// Pushes the return address and the lexical-level delta, then jumps.
    /// `Enter` in the callee completes the frame.
    fn op_call(&mut self, at: Word, level: Word, target: Word) -> Result<(), VmError> {
        self.stack_write(at, i64::from(self.top), at.wrapping_add(1))?;
        self.stack_write(at, i64::from(self.top) + 1, level)?;
        self.top += 2;
        self.pc = target;
        self.call_depth += 1;
        Ok(())
    }

    /// Completes the frame `Call` started: computes the static link with the
    /// caller's `BP`, writes the two link words, and reserves `locals` slots.
    fn op_enter(&mut self, at: Word, locals: Word) -> Result<(), VmError> {
        if self.top < 2 {
            return Err(VmError::MemoryFault {
                pc: at,
                memory: "stack",
                address: i64::from(self.top) - 2,
            });
        }
        let delta = self.stack_read(at, i64::from(self.top) - 1)?;
        let static_link = self.follow_chain(at, delta, self.bp)?;
        let frame = self.top - 2;
        self.stack_write(at, i64::from(self.top), static_link)?;
        self.stack_write(at, i64::from(self.top) + 1, self.bp)?;
        self.bp = frame;
        let new_top = i64::from(self.top) + i64::from(locals) + 2;
        if !(0..=BANK).contains(&new_top) {
            return Err(VmError::MemoryFault {
                pc: at,
                memory: "stack",
                address: new_top,
            });
        }
        self.top = new_top as Word;
        Ok(())
    }

    /// Row-major element offset from the dimension and index groups on the
    /// stack: dimensions sit below the indices, one word per axis. Every
    /// index is checked against its dimension, negatives included.
    fn array_offset(&self, at: Word, rank: Word) -> Result<i64, VmError> {
        if rank < 1 {
            return Err(VmError::IllegalInstruction { pc: at });
        }
        let rank = i64::from(rank);
        let dims_base = i64::from(self.top) - 2 * rank;
        let index_base = i64::from(self.top) - rank;
        let mut offset: i64 = 0;
        for axis in 0..rank {
            let extent = self.stack_read(at, dims_base + axis)?;
            let index = self.stack_read(at, index_base + axis)?;
            if index < 0 || index >= extent {
                return Err(VmError::IndexOutOfBounds {
                    pc: at,
                    index,
                    extent,
                });
            }
            offset = offset
                .saturating_mul(i64::from(extent))
                .saturating_add(i64::from(index));
        }
        Ok(offset)
    }

    fn op_load_array(&mut self, at: Word, target: Word, rank: Word) -> Result<(), VmError> {
        let offset = self.array_offset(at, rank)?;
        let value = self.data_read(at, i64::from(target) - i64::from(GLOBAL_BASE) + offset)?;
        self.top = (i64::from(self.top) - 2 * i64::from(rank)) as Word;
        self.push(at, value)
    }

    fn op_store_array(&mut self, at: Word, target: Word, rank: Word) -> Result<(), VmError> {
        let offset = self.array_offset(at, rank)?;
        let value = self.stack_read(at, i64::from(self.top) - 2 * i64::from(rank) - 1)?;
        self.data_write(at, i64::from(target) - i64::from(GLOBAL_BASE) + offset, value)?;
        self.top = (i64::from(self.top) - 2 * i64::from(rank) - 1) as Word;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::assembler::assemble_source;

    fn machine(source: &str) -> Machine {
        Machine::new(assemble_source(source).expect("assembly failed"))
    }

    fn run_source(source: &str) -> Machine {
        let mut m = machine(source);
        m.run().expect("run failed");
        m
    }

    fn run_top(source: &str) -> Word {
        let m = run_source(source);
        m.stack[usize::try_from(m.top - 1).expect("stack not empty")]
    }

    fn run_with_input(source: &str, input: &[Word]) -> Vec<String> {
        let mut m = machine(source);
        m.feed(input.iter().copied());
        m.run().expect("run failed");
        m.lines
    }

    fn run_expect_err(source: &str) -> VmError {
        let mut m = machine(source);
        m.run().expect_err("expected a fault")
    }

    // ==================== Stack primitives ====================

    #[test]
    fn const_pushes() {
        let m = run_source("Const 5\nConst -3\nHalt");
        assert_eq!(m.top, 2);
        assert_eq!(&m.stack[..2], &[5, -3]);
    }

    #[test]
    fn dup_duplicates_top() {
        assert_eq!(run_top("Const 3\nDup\nMul\nHalt"), 9);
    }

    #[test]
    fn nop_changes_nothing_but_pc() {
        let m = run_source("Nop\nConst 1\nNop\nHalt");
        assert_eq!(m.top, 1);
    }

    #[test]
    fn add_sub_mul() {
        assert_eq!(run_top("Const 10\nConst 32\nAdd\nHalt"), 42);
        assert_eq!(run_top("Const 50\nConst 8\nSub\nHalt"), 42);
        assert_eq!(run_top("Const 6\nConst 7\nMul\nHalt"), 42);
    }

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(run_top("Const 32767\nConst 1\nAdd\nHalt"), -32768);
        assert_eq!(run_top("Const -32768\nConst 1\nSub\nHalt"), 32767);
        assert_eq!(run_top("Const 16384\nConst 2\nMul\nHalt"), -32768);
    }

    #[test]
    fn div_is_floored() {
        assert_eq!(run_top("Const 7\nConst 2\nDiv\nHalt"), 3);
        assert_eq!(run_top("Const -7\nConst 2\nDiv\nHalt"), -4);
        assert_eq!(run_top("Const 7\nConst -2\nDiv\nHalt"), -4);
        assert_eq!(run_top("Const -7\nConst -2\nDiv\nHalt"), 3);
    }

    #[test]
    fn div_by_zero_faults() {
        assert!(matches!(
            run_expect_err("Const 1\nConst 0\nDiv"),
            VmError::DivideByZero { pc: 2 }
        ));
    }

    #[test]
    fn relational_ops() {
        assert_eq!(run_top("Const 3\nConst 5\nLss\nHalt"), 1);
        assert_eq!(run_top("Const 5\nConst 3\nLss\nHalt"), 0);
        assert_eq!(run_top("Const 3\nConst 5\nGtr\nHalt"), 0);
        assert_eq!(run_top("Const 5\nConst 3\nGtr\nHalt"), 1);
        assert_eq!(run_top("Const 5\nConst 5\nEqu\nHalt"), 1);
        assert_eq!(run_top("Const 5\nConst 4\nEqu\nHalt"), 0);
        assert_eq!(run_top("Const 5\nConst 4\nNEqu\nHalt"), 1);
        assert_eq!(run_top("Const 5\nConst 5\nLssEq\nHalt"), 1);
        assert_eq!(run_top("Const 6\nConst 5\nLssEq\nHalt"), 0);
        assert_eq!(run_top("Const 5\nConst 5\nGtrEq\nHalt"), 1);
        assert_eq!(run_top("Const 4\nConst 5\nGtrEq\nHalt"), 0);
    }

    #[test]
    fn neg_is_bitwise_complement() {
        assert_eq!(run_top("Const 5\nNeg\nHalt"), -6);
        assert_eq!(run_top("Const 0\nNeg\nHalt"), -1);
        // The compiler's negation idiom: complement then add one.
        assert_eq!(run_top("Const 5\nNeg\nConst 1\nAdd\nHalt"), -5);
    }

    #[test]
    fn neg_twice_restores() {
        assert_eq!(run_top("Const 1234\nNeg\nNeg\nHalt"), 1234);
    }

    #[test]
    fn stack_underflow_faults() {
        assert!(matches!(
            run_expect_err("Add"),
            VmError::MemoryFault {
                pc: 0,
                memory: "stack",
                address: -1,
            }
        ));
    }

    #[test]
    fn stack_overflow_faults() {
        let err = run_expect_err("again: Const 1\nJmp again");
        assert!(matches!(
            err,
            VmError::MemoryFault {
                memory: "stack",
                address: 4096,
                ..
            }
        ));
    }

    // ==================== Jumps ====================

    #[test]
    fn jmp_is_unconditional() {
        let m = run_source("Jmp skip\nConst 1\nskip: Halt");
        assert_eq!(m.top, 0);
    }

    #[test]
    fn fjmp_jumps_on_zero() {
        let source = "\
Const 0
FJmp taken
Const 1
StoG 3
Halt
taken: Const 2
StoG 3
Halt";
        assert_eq!(run_source(source).data[0], 2);
    }

    #[test]
    fn fjmp_falls_through_on_nonzero() {
        let source = "\
Const 5
FJmp taken
Const 1
StoG 3
Halt
taken: Const 2
StoG 3
Halt";
        assert_eq!(run_source(source).data[0], 1);
    }

    #[test]
    fn fjmp_falls_through_on_negative() {
        let source = "\
Const -1
FJmp taken
Const 1
StoG 3
Halt
taken: Const 2
StoG 3
Halt";
        assert_eq!(run_source(source).data[0], 1);
    }

    #[test]
    fn jmp_outside_code_faults() {
        assert!(matches!(
            run_expect_err("Jmp 100"),
            VmError::IllegalInstruction { pc: 100 }
        ));
        assert!(matches!(
            run_expect_err("Jmp -1"),
            VmError::IllegalInstruction { pc: -1 }
        ));
    }

    #[test]
    fn running_past_the_end_faults() {
        assert!(matches!(
            run_expect_err("Nop"),
            VmError::IllegalInstruction { pc: 1 }
        ));
    }

    #[test]
    fn empty_program_faults() {
        assert!(matches!(
            run_expect_err(""),
            VmError::IllegalInstruction { pc: 0 }
        ));
    }

    // ==================== Control registers ====================

    #[test]
    fn loadg_zero_pushes_own_address() {
        assert_eq!(run_top("Nop\nLoadG 0\nHalt"), 1);
    }

    #[test]
    fn loadg_one_pushes_top_before_increment() {
        let m = run_source("Const 7\nLoadG 1\nHalt");
        assert_eq!(m.top, 2);
        assert_eq!(&m.stack[..2], &[7, 1]);
    }

    #[test]
    fn stog_zero_is_a_jump() {
        let m = run_source("Const 3\nStoG 0\nConst 99\nHalt");
        assert_eq!(m.top, 0);
    }

    #[test]
    fn stog_one_overwrites_top() {
        let m = run_source("Const 9\nConst 9\nConst 9\nConst 1\nStoG 1\nHalt");
        assert_eq!(m.top, 1);
    }

    #[test]
    fn stog_one_range_checked() {
        assert!(matches!(
            run_expect_err("Const 9999\nStoG 1"),
            VmError::MemoryFault {
                memory: "stack",
                address: 9999,
                ..
            }
        ));
    }

    #[test]
    fn bp_register_round_trips() {
        let m = run_source("Const 7\nStoG 2\nLoadG 2\nHalt");
        assert_eq!(m.bp, 7);
        assert_eq!(m.stack[0], 7);
    }

    #[test]
    fn globals_live_at_address_minus_three() {
        let m = run_source("Const 42\nStoG 3\nLoadG 3\nHalt");
        assert_eq!(m.data[0], 42);
        assert_eq!(m.stack[0], 42);
    }

    #[test]
    fn negative_global_address_faults() {
        assert!(matches!(
            run_expect_err("Const 1\nStoG -1"),
            VmError::MemoryFault {
                memory: "data",
                address: -4,
                ..
            }
        ));
    }

    #[test]
    fn global_address_past_data_faults() {
        assert!(matches!(
            run_expect_err("LoadG 4099"),
            VmError::MemoryFault {
                memory: "data",
                address: 4096,
                ..
            }
        ));
    }

    // ==================== Calls and frames ====================

    #[test]
    fn call_and_enter_build_the_frame() {
        let m = run_source("Call 1 2\nHalt\nEnter 1\nHalt");
        // [return address, lexical delta, static link, dynamic link, local]
        assert_eq!(&m.stack[..5], &[1, 1, 0, 0, 0]);
        assert_eq!(m.bp, 0);
        assert_eq!(m.top, 5);
    }

    #[test]
    fn call_cycle_restores_registers() {
        let source = "\
Const 5
Call 0 3
Halt
Enter 2
Leave
Ret";
        let m = run_source(source);
        assert_eq!(m.top, 1);
        assert_eq!(m.bp, 0);
        assert_eq!(m.stack[0], 5);
    }

    #[test]
    fn ret_without_outstanding_call_ends_the_run() {
        let m = run_source("Const 9\nRet\nConst 1");
        assert_eq!(m.top, 1);
        assert_eq!(m.stack[0], 9);
    }

    #[test]
    fn enter_with_negative_locals_faults() {
        assert!(matches!(
            run_expect_err("Call 0 2\nHalt\nEnter -10"),
            VmError::MemoryFault { memory: "stack", .. }
        ));
    }

    #[test]
    fn enter_on_a_shallow_stack_faults() {
        assert!(matches!(
            run_expect_err("Enter 1"),
            VmError::MemoryFault { memory: "stack", .. }
        ));
    }

    #[test]
    fn locals_are_per_frame() {
        // The callee's Sto 0 0 must not clobber the caller's local 0.
        let source = "\
       Jmp main
outer: Enter 1
       Const 7
       Sto 0 0
       Call 0 inner
       Load 0 0
       Write
       Print
       Leave
       Ret
inner: Enter 1
       Const 9
       Sto 0 0
       Leave
       Ret
main:  Call 0 outer
       Halt";
        let m = run_source(source);
        assert_eq!(m.lines, vec!["7"]);
    }

    #[test]
    fn static_link_reaches_enclosing_scope() {
        let source = "\
       Jmp main
outer: Enter 1
       Const 7
       Sto 0 0
       Call 0 outer$inner
       Leave
       Ret
outer$inner: Enter 0
       Load 1 0
       Write
       Print
       Leave
       Ret
main:  Call 0 outer
       Halt";
        assert_eq!(run_source(source).lines, vec!["7"]);
    }

    #[test]
    fn static_link_chain_two_levels_out() {
        let source = "\
       Jmp main
a:     Enter 1
       Const 11
       Sto 0 0
       Call 0 a$b
       Leave
       Ret
a$b:   Enter 0
       Call 0 a$b$c
       Leave
       Ret
a$b$c: Enter 0
       Load 2 0
       Write
       Print
       Leave
       Ret
main:  Call 0 a
       Halt";
        assert_eq!(run_source(source).lines, vec!["11"]);
    }

    #[test]
    fn recursive_factorial() {
        let source = "\
       Jmp main
Fact:  Enter 0
       Load 0 -5
       Const 1
       Gtr
       FJmp done
       Load 0 -5
       Const 1
       Sub
       Call 0 Fact
       Load 0 -5
       Mul
       Sto 0 -5
done:  Leave
       Ret
main:  Const 5
       Call 0 Fact
       Write
       Print
       Halt";
        assert_eq!(run_source(source).lines, vec!["120"]);
    }

    // ==================== I/O ====================

    #[test]
    fn read_pushes_input_words() {
        let mut m = machine("Read\nRead\nAdd\nWrite\nPrint\nHalt");
        m.feed([30, 12]);
        m.run().unwrap();
        assert_eq!(m.lines, vec!["42"]);
    }

    #[test]
    fn read_past_input_faults() {
        let mut m = machine("Read\nRead\nHalt");
        m.feed([1]);
        assert!(matches!(
            m.run().unwrap_err(),
            VmError::InputExhausted { pc: 1 }
        ));
    }

    #[test]
    fn write_leaves_the_operand_in_place() {
        let m = run_source("Const 7\nWrite\nWrite\nPrint\nHalt");
        assert_eq!(m.lines, vec!["77"]);
        assert_eq!(m.top, 0);
    }

    #[test]
    fn write_renders_negative_decimals() {
        assert_eq!(run_source("Const -7\nWrite\nPrint\nHalt").lines, vec!["-7"]);
    }

    #[test]
    fn print_emits_one_line_per_flush() {
        let source = "Const 1\nWrite\nPrint\nConst 2\nWrite\nPrint\nHalt";
        assert_eq!(run_source(source).lines, vec!["1", "2"]);
    }

    #[test]
    fn print_on_empty_stack_faults() {
        assert!(matches!(
            run_expect_err("Print"),
            VmError::MemoryFault { memory: "stack", .. }
        ));
    }

    #[test]
    fn write_string_walks_downward() {
        // "Hi" laid out last-char-first: terminator lowest, pointer at 'H'.
        let source = "\
Const 0
StoG 3
Const 105
StoG 4
Const 72
StoG 5
Const 5
WriteS
Print
Halt";
        assert_eq!(run_source(source).lines, vec!["Hi"]);
    }

    #[test]
    fn write_string_terminator_at_seed_is_empty() {
        // Data memory is zeroed, so the walk stops immediately.
        assert_eq!(run_source("Const 3\nWriteS\nPrint\nHalt").lines, vec![""]);
    }

    #[test]
    fn write_string_null_pointer_faults() {
        assert!(matches!(
            run_expect_err("Const 2\nWriteS"),
            VmError::NullStringPointer { pc: 1, pointer: 2 }
        ));
        assert!(matches!(
            run_expect_err("Const -5\nWriteS"),
            VmError::NullStringPointer { pc: 1, pointer: -5 }
        ));
    }

    #[test]
    fn write_string_without_terminator_faults() {
        // Nonzero at the bottom of data memory, walk runs off the edge.
        let err = run_expect_err("Const 7\nStoG 3\nConst 3\nWriteS");
        assert!(matches!(
            err,
            VmError::MemoryFault {
                memory: "data",
                address: -1,
                ..
            }
        ));
    }

    // ==================== Arrays ====================

    #[test]
    fn two_dimensional_store_and_load() {
        let source = "\
Const 42
Const 2
Const 3
Const 1
Const 2
StoArr 3 2
Const 2
Const 3
Const 1
Const 2
LoadArr 3 2
Write
Print
Halt";
        let m = run_source(source);
        // Row-major: offset 1*3 + 2 = 5.
        assert_eq!(m.data[5], 42);
        assert_eq!(m.lines, vec!["42"]);
        assert_eq!(m.top, 0);
    }

    #[test]
    fn out_of_bounds_store_reports_faulting_pc() {
        let source = "\
Const 7
Const 2
Const 3
Const 2
Const 0
StoArr 3 2";
        assert!(matches!(
            run_expect_err(source),
            VmError::IndexOutOfBounds {
                pc: 5,
                index: 2,
                extent: 2,
            }
        ));
    }

    #[test]
    fn negative_index_is_out_of_bounds() {
        let source = "Const 9\nConst 4\nConst -1\nStoArr 3 1";
        assert!(matches!(
            run_expect_err(source),
            VmError::IndexOutOfBounds {
                index: -1,
                extent: 4,
                ..
            }
        ));
    }

    #[test]
    fn rank_one_boundary_indices() {
        let low = "Const 9\nConst 4\nConst 0\nStoArr 3 1\nHalt";
        assert_eq!(run_source(low).data[0], 9);

        let high = "Const 9\nConst 4\nConst 3\nStoArr 3 1\nHalt";
        assert_eq!(run_source(high).data[3], 9);

        let past = "Const 9\nConst 4\nConst 4\nStoArr 3 1";
        assert!(matches!(
            run_expect_err(past),
            VmError::IndexOutOfBounds {
                index: 4,
                extent: 4,
                ..
            }
        ));
    }

    #[test]
    fn rank_three_offsets_are_row_major() {
        let source = "\
Const 7
Const 2
Const 3
Const 4
Const 1
Const 2
Const 3
StoArr 3 3
Const 2
Const 3
Const 4
Const 1
Const 2
Const 3
LoadArr 3 3
Halt";
        let m = run_source(source);
        // (1*3 + 2)*4 + 3 = 23.
        assert_eq!(m.data[23], 7);
        assert_eq!(m.stack[0], 7);
        assert_eq!(m.top, 1);
    }

    #[test]
    fn array_cell_outside_data_faults() {
        let source = "Const 1\nConst 1\nConst 0\nStoArr 5000 1";
        assert!(matches!(
            run_expect_err(source),
            VmError::MemoryFault {
                memory: "data",
                address: 4997,
                ..
            }
        ));
    }

    #[test]
    fn array_operands_missing_from_stack_fault() {
        // Rank 2 needs four operand slots; only one is there.
        assert!(matches!(
            run_expect_err("Const 1\nLoadArr 3 2"),
            VmError::MemoryFault { memory: "stack", .. }
        ));
    }

    // ==================== End-to-end programs ====================

    #[test]
    fn echo_positive_sums() {
        let source = "\
start: Read
       StoG 3
       LoadG 3
       Const 0
       Gtr
       FJmp done
       Const 0
       StoG 4
       Const 1
       StoG 5
loop:  LoadG 5
       LoadG 3
       LssEq
       FJmp emit
       LoadG 4
       LoadG 5
       Add
       StoG 4
       LoadG 5
       Const 1
       Add
       StoG 5
       Jmp loop
emit:  LoadG 4
       Write
       Print
       Jmp start
done:  Halt";
        assert_eq!(run_with_input(source, &[3, 5, 0]), vec!["6", "15"]);
    }

    #[test]
    fn symbolic_globals_run_end_to_end() {
        let source = "\
.names 2
.var 1 counter
.proc Main
Main:  Const 9
       StoG counter
       LoadG counter
       Write
       Print
       Halt";
        let m = run_source(source);
        assert_eq!(m.lines, vec!["9"]);
        assert_eq!(m.data[0], 9);
    }

    #[test]
    fn trace_does_not_disturb_execution() {
        let mut m = machine("Const 2\nConst 3\nAdd\nWrite\nPrint\nHalt");
        m.set_trace(true);
        m.run().unwrap();
        assert_eq!(m.lines, vec!["5"]);
    }
}
