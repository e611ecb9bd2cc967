//! Breakpoints for continuous runs.
//!
//! A [`Breakpoint`] placed in [`Simulator::breakpoints`] is checked after every
//! macro step of [`Simulator::run_while`] (and the runs built on it).
//! Checks only look at state between macro steps, so a breakpoint can never
//! interrupt an instruction halfway through its microcode block.
//!
//! ```
//! use vn_ensemble::sim::Simulator;
//! use vn_ensemble::sim::debug::Breakpoint;
//!
//! let mut sim = Simulator::default();
//! // INC, SAVE 9, JMP 0
//! sim.load_ram_text("7000\n4009\n5000\n").unwrap();
//! sim.breakpoints.insert(Breakpoint::Write(9));
//!
//! sim.run_while(|_| true).unwrap();
//! assert!(sim.hit_breakpoint());
//! assert_eq!(sim.mem().read(9).unwrap(), 1);
//! ```
//!
//! [`Simulator::breakpoints`]: super::Simulator::breakpoints
//! [`Simulator::run_while`]: super::Simulator::run_while
use std::ops::RangeInclusive;

use super::mem::Reg;
use super::Simulator;

/// A condition which pauses a continuous run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Breakpoint {
    /// Break when the program counter reaches this address,
    /// i.e., before the instruction there is fetched.
    Address(usize),
    /// Break when the next instruction to be fetched has this opcode.
    Opcode(u32),
    /// Break when a register holds a value in the range.
    Reg {
        /// Register to watch.
        reg: Reg,
        /// Values that break.
        range: RangeInclusive<u32>,
    },
    /// Break when the last macro step wrote to this memory address.
    Write(usize),
}

impl Breakpoint {
    /// Creates a [`Breakpoint::Opcode`] for the macro instruction with the given name,
    /// if the machine's program has one.
    pub fn instruction(sim: &Simulator, name: &str) -> Option<Self> {
        let opcode = sim.ucode().opcode_of(name)?;
        Some(Self::Opcode(opcode as u32))
    }

    /// Checks if a break should occur.
    pub fn check(&self, sim: &Simulator) -> bool {
        let pc = sim.reg_file()[Reg::ProgramCounter] as usize;
        match self {
            Self::Address(addr) => pc == *addr,
            Self::Opcode(opcode) => sim.mem().read(pc).is_ok_and(|w| sim.geometry().opcode(w) == *opcode),
            Self::Reg { reg, range } => range.contains(&sim.reg_file()[*reg]),
            Self::Write(addr) => sim.observer.get_mem_accesses(*addr).written(),
        }
    }
}
impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "PC = {addr:03}"),
            Self::Opcode(opcode) => write!(f, "next opcode {opcode}"),
            Self::Reg { reg, range } if range.start() == range.end() => write!(f, "{reg} = {}", range.start()),
            Self::Reg { reg, range } => write!(f, "{reg} in {}..={}", range.start(), range.end()),
            Self::Write(addr) => write!(f, "write to {addr:03}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::mem::Reg;
    use crate::sim::Simulator;

    use super::Breakpoint;

    #[test]
    fn test_check_between_steps() {
        let mut sim = Simulator::default();
        // TAKE 4, JMP 0, ..., 42
        sim.write_mem(0, 1004).unwrap();
        sim.write_mem(1, 5000).unwrap();
        sim.write_mem(4, 42).unwrap();

        assert!(Breakpoint::Address(0).check(&sim));
        assert!(Breakpoint::Opcode(1).check(&sim));
        assert!(Breakpoint::instruction(&sim, "take").is_some_and(|bp| bp.check(&sim)));
        assert_eq!(Breakpoint::instruction(&sim, "NOPE"), None);

        sim.macro_step().unwrap();
        assert!(Breakpoint::Address(1).check(&sim));
        assert!(Breakpoint::Opcode(5).check(&sim));
        assert!(Breakpoint::Reg { reg: Reg::Accumulator, range: 40..=50 }.check(&sim));
        assert!(!Breakpoint::Reg { reg: Reg::Accumulator, range: 0..=41 }.check(&sim));
        // a load is not a write
        assert!(!Breakpoint::Write(4).check(&sim));
    }

    #[test]
    fn test_empty_word_has_opcode_zero() {
        let mut sim = Simulator::default();
        sim.set_register(Reg::ProgramCounter, 999).unwrap();
        assert!(Breakpoint::Opcode(0).check(&sim));
        assert!(Breakpoint::Address(999).check(&sim));
    }

    #[test]
    fn test_display() {
        assert_eq!(Breakpoint::Address(7).to_string(), "PC = 007");
        assert_eq!(Breakpoint::Opcode(2).to_string(), "next opcode 2");
        assert_eq!(Breakpoint::Reg { reg: Reg::Accumulator, range: 3..=3 }.to_string(), "ACC = 3");
        assert_eq!(Breakpoint::Reg { reg: Reg::DataBus, range: 0..=9 }.to_string(), "DB in 0..=9");
        assert_eq!(Breakpoint::Write(12).to_string(), "write to 012");
    }
}
