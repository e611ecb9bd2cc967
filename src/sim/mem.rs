//! Memory handling for the machine.
//!
//! This module consists of:
//! - [`Mem`]: The memory (RAM), a fixed-length array of bounded words.
//! - [`RegFile`]: The register file, six bounded scalar registers.
//! - [`Reg`]: The names of those registers.
//!
//! Both hold plain `u32` words. Every write is checked against the machine's
//! [`Geometry`]: memory writes outside the bounds are rejected,
//! whereas register writes are clamped into range.

use crate::config::Geometry;

use super::SimErr;

/// Memory.
///
/// This is addressed with any `usize` in `0..memory_size`.
/// Instructions and data are indistinguishable here; both are words in `[0, max_value]`.
///
/// ```
/// use vn_ensemble::config::Geometry;
/// use vn_ensemble::sim::mem::Mem;
///
/// let mut mem = Mem::new(Geometry::default());
/// mem.write(3, 9006).unwrap();
/// assert_eq!(mem.read(3).unwrap(), 9006);
/// assert!(mem.write(3, 20000).is_err());
/// assert!(mem.read(1000).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mem {
    data: Box<[u32]>,
    max_value: u32,
}
impl Mem {
    /// Creates a zeroed memory sized for the given geometry.
    pub fn new(geo: Geometry) -> Self {
        Self {
            data: vec![0; geo.memory_size()].into_boxed_slice(),
            max_value: geo.max_value(),
        }
    }

    /// Creates a memory from its words, zero-padding up to the memory size.
    ///
    /// This fails if there are too many words or any word is out of range.
    pub fn from_words(geo: Geometry, words: &[u32]) -> Result<Self, SimErr> {
        let mut mem = Self::new(geo);
        if words.len() > mem.len() {
            return Err(SimErr::AddressOutOfRange(words.len() - 1));
        }
        for (addr, &word) in words.iter().enumerate() {
            mem.write(addr, word)?;
        }
        Ok(mem)
    }

    /// The number of words in memory.
    pub fn len(&self) -> usize {
        self.data.len()
    }
    /// Memory always has at least one word, so this is always false.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads the word at the provided address.
    pub fn read(&self, addr: usize) -> Result<u32, SimErr> {
        self.data.get(addr)
            .copied()
            .ok_or(SimErr::AddressOutOfRange(addr))
    }

    /// Writes a word to the provided address.
    ///
    /// If the address or value is out of range, this errors and memory is unchanged.
    pub fn write(&mut self, addr: usize, value: u32) -> Result<(), SimErr> {
        if value > self.max_value {
            return Err(SimErr::ValueOutOfRange { value: i64::from(value), max: self.max_value });
        }
        let slot = self.data.get_mut(addr).ok_or(SimErr::AddressOutOfRange(addr))?;
        *slot = value;
        Ok(())
    }

    /// The highest address holding a nonzero word, or `None` if memory is all zero.
    pub fn last_used_address(&self) -> Option<usize> {
        self.data.iter().rposition(|&w| w != 0)
    }

    /// Fills memory with zero.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Views the raw words of memory.
    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    /// The words of memory with trailing zeros removed.
    pub fn trimmed(&self) -> &[u32] {
        let end = self.last_used_address().map_or(0, |a| a + 1);
        &self.data[..end]
    }

    /// Moves the word at `from` to `to` without range checks on the value.
    ///
    /// Both addresses must be in range.
    pub(crate) fn copy_within(&mut self, from: usize, to: usize) {
        self.data[to] = self.data[from];
    }
}

macro_rules! regs {
    ($($(#[$m:meta])* $name:ident = $idx:literal, $short:literal);+ $(;)?) => {
        /// A register of the machine.
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
        pub enum Reg {
            $($(#[$m])* $name = $idx),+
        }
        impl Reg {
            /// All registers, in display order.
            pub const ALL: [Reg; 6] = [$(Reg::$name),+];

            /// The short display name of this register (e.g., `AB`, `ACC`).
            pub fn short_name(self) -> &'static str {
                match self {
                    $(Reg::$name => $short),+
                }
            }
        }
    }
}
regs! {
    /// Address bus. Always a valid memory address.
    AddressBus = 0, "AB";
    /// Data bus. Holds any word.
    DataBus = 1, "DB";
    /// Accumulator. Holds any word.
    Accumulator = 2, "ACC";
    /// Program counter. Always a valid memory address.
    ProgramCounter = 3, "PC";
    /// Instruction register. Holds any word.
    InstructionRegister = 4, "IR";
    /// Microcode counter. Always a valid microcode address.
    MicroCodeCounter = 5, "MC";
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A register write that did not fit and was pulled to the register's bound.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Clamp {
    /// The register that was written.
    pub reg: Reg,
    /// The value that was requested.
    pub requested: i64,
    /// The value that was stored.
    pub stored: u32,
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`] to read a register.
/// Registers are written through [`RegFile::set`], which clamps into range.
///
/// ```
/// use vn_ensemble::config::Geometry;
/// use vn_ensemble::sim::mem::{Reg, RegFile};
///
/// let mut regs = RegFile::new(Geometry::default());
/// assert!(regs.set(Reg::Accumulator, 11).is_none());
/// assert_eq!(regs[Reg::Accumulator], 11);
///
/// let clamp = regs.set(Reg::ProgramCounter, 5000).unwrap();
/// assert_eq!(clamp.stored, 999);
/// assert_eq!(regs[Reg::ProgramCounter], 999);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegFile {
    regs: [u32; 6],
    geo: Geometry,
}
impl RegFile {
    /// Creates a register file with all registers zeroed.
    pub fn new(geo: Geometry) -> Self {
        Self { regs: [0; 6], geo }
    }

    /// The largest value the given register can hold.
    pub fn max_of(&self, reg: Reg) -> u32 {
        match reg {
            Reg::AddressBus | Reg::ProgramCounter => (self.geo.memory_size() - 1) as u32,
            Reg::DataBus | Reg::Accumulator | Reg::InstructionRegister => self.geo.max_value(),
            Reg::MicroCodeCounter => (self.geo.microcode_size() - 1) as u32,
        }
    }

    /// Writes a register, clamping the value into `[0, max]`.
    ///
    /// If clamping was needed, this returns a description of it.
    pub fn set(&mut self, reg: Reg, value: i64) -> Option<Clamp> {
        let max = self.max_of(reg);
        let stored = value.clamp(0, i64::from(max)) as u32;
        self.regs[reg as usize] = stored;

        (i64::from(stored) != value).then_some(Clamp { reg, requested: value, stored })
    }

    /// Zeroes every register.
    pub fn clear(&mut self) {
        self.regs = [0; 6];
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u32;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.regs[index as usize]
    }
}
