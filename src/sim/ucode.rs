//! The microcode program and the macro instruction name table.
//!
//! A [`MicroProgram`] is a fixed-length array of micro-op ids, split into
//! blocks of [`BLOCK_LEN`] slots. Block `k` starts at slot `k * 10` and holds
//! the micro-steps executed for macro opcode `k`. Block 0 is the fetch cycle.
//!
//! Every macro opcode can carry a display name of 1 to 5 characters.

use std::collections::BTreeMap;

use crate::config::{Geometry, BLOCK_LEN};

use super::micro::MicroOp;
use super::SimErr;

/// The longest allowed instruction name, in characters.
pub const MAX_NAME_LEN: usize = 5;

/// The macro opcode of the default `HLT` instruction.
pub const HALT_OPCODE: u32 = 10;

/// Micro-steps of the default program, by block.
const DEFAULT_BLOCKS: [(&str, &[u8]); 11] = [
    ("FETCH", &[8, 2, 3, 9, 5]),
    ("TAKE",  &[4, 2, 18, 7]),
    ("ADD",   &[4, 2, 13, 7]),
    ("SUB",   &[4, 2, 14, 7]),
    ("SAVE",  &[4, 15, 1, 7]),
    ("JMP",   &[11, 7]),
    ("TST",   &[10, 7]),
    ("INC",   &[16, 7]),
    ("DEC",   &[17, 7]),
    ("NULL",  &[12, 7]),
    ("HLT",   &[19]),
];

/// Checks that a name is usable as an instruction name.
pub fn validate_name(name: &str) -> Result<(), SimErr> {
    let len = name.chars().count();
    match (1..=MAX_NAME_LEN).contains(&len) {
        true  => Ok(()),
        false => Err(SimErr::InvalidName(name.to_string())),
    }
}

/// The microcode program.
///
/// ```
/// use vn_ensemble::config::Geometry;
/// use vn_ensemble::sim::ucode::MicroProgram;
///
/// let mut prog = MicroProgram::new(Geometry::default());
/// assert_eq!(prog.read(0).unwrap(), 8);
/// assert_eq!(prog.instruction_name(2), Some("ADD"));
///
/// assert!(prog.write(50, 6).is_err()); // reserved
/// prog.write(50, 12).unwrap();
/// assert_eq!(prog.read(50).unwrap(), 12);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroProgram {
    ops: Box<[u8]>,
    names: BTreeMap<usize, String>,
}
impl MicroProgram {
    /// Creates the default program for the given geometry.
    ///
    /// Default blocks which do not fit in the geometry are left out.
    pub fn new(geo: Geometry) -> Self {
        let mut ops = vec![0; geo.microcode_size()].into_boxed_slice();
        let mut names = BTreeMap::new();

        for (opcode, (name, steps)) in DEFAULT_BLOCKS.iter().enumerate().take(geo.block_count()) {
            let start = opcode * BLOCK_LEN;
            ops[start..start + steps.len()].copy_from_slice(steps);
            names.insert(opcode, name.to_string());
        }

        Self { ops, names }
    }

    /// Creates a program from its values and names.
    ///
    /// Values are zero-padded up to the microcode size.
    /// This fails if there are too many values, any value is not a valid micro-op id,
    /// or any name entry is invalid.
    pub fn from_parts(geo: Geometry, values: &[u32], names: BTreeMap<usize, String>) -> Result<Self, SimErr> {
        let mut prog = Self {
            ops: vec![0; geo.microcode_size()].into_boxed_slice(),
            names: BTreeMap::new(),
        };
        if values.len() > prog.len() {
            return Err(SimErr::AddressOutOfRange(values.len() - 1));
        }
        for (addr, &value) in values.iter().enumerate() {
            prog.write(addr, value)?;
        }
        for (opcode, name) in names {
            prog.set_instruction_name(opcode, &name)?;
        }
        Ok(prog)
    }

    /// The number of slots in the program.
    pub fn len(&self) -> usize {
        self.ops.len()
    }
    /// The program always has at least one block, so this is always false.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
    /// The number of macro instructions the program has room for.
    pub fn block_count(&self) -> usize {
        self.ops.len() / BLOCK_LEN
    }

    /// Reads the micro-op id at the given slot.
    pub fn read(&self, addr: usize) -> Result<u32, SimErr> {
        self.ops.get(addr)
            .map(|&op| u32::from(op))
            .ok_or(SimErr::AddressOutOfRange(addr))
    }

    /// Writes a micro-op id to the given slot.
    ///
    /// The value must be in `0..=19` and must not be the reserved id 6.
    /// On error, the program is unchanged.
    pub fn write(&mut self, addr: usize, value: u32) -> Result<(), SimErr> {
        let op = MicroOp::try_from(value)
            .ok()
            .filter(|op| op.is_programmable())
            .ok_or(SimErr::InvalidMicroOp(value))?;
        let slot = self.ops.get_mut(addr).ok_or(SimErr::AddressOutOfRange(addr))?;
        *slot = op as u8;
        Ok(())
    }

    /// Gets the display name of a macro opcode, if it has one.
    pub fn instruction_name(&self, opcode: usize) -> Option<&str> {
        self.names.get(&opcode).map(String::as_str)
    }

    /// Sets the display name of a macro opcode.
    pub fn set_instruction_name(&mut self, opcode: usize, name: &str) -> Result<(), SimErr> {
        if opcode >= self.block_count() {
            return Err(SimErr::InvalidOpcode(opcode));
        }
        validate_name(name)?;
        self.names.insert(opcode, name.to_string());
        Ok(())
    }

    /// Finds the opcode carrying the given name (case-insensitive).
    pub fn opcode_of(&self, name: &str) -> Option<usize> {
        self.names.iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(&op, _)| op)
    }

    /// The opcode of the halt instruction.
    ///
    /// This is the opcode named `HLT` if there is one, otherwise [`HALT_OPCODE`]
    /// if the program has a block for it.
    pub fn halt_opcode(&self) -> Option<u32> {
        self.opcode_of("HLT")
            .or_else(|| Some(HALT_OPCODE as usize).filter(|&op| op < self.block_count()))
            .map(|op| op as u32)
    }

    /// Iterates over every named opcode, in opcode order.
    pub fn names(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.names.iter().map(|(&op, n)| (op, n.as_str()))
    }

    /// The slots of one macro instruction's block.
    pub fn block(&self, opcode: usize) -> Option<&[u8]> {
        let start = opcode.checked_mul(BLOCK_LEN)?;
        self.ops.get(start..start + BLOCK_LEN)
    }

    /// Views the raw micro-op ids.
    pub fn as_slice(&self) -> &[u8] {
        &self.ops
    }

    /// The micro-op ids with trailing zeros removed.
    pub fn trimmed(&self) -> Vec<u32> {
        let end = self.ops.iter().rposition(|&op| op != 0).map_or(0, |a| a + 1);
        self.ops[..end].iter().map(|&op| u32::from(op)).collect()
    }

    /// Restores the default program and name table.
    pub fn reset(&mut self, geo: Geometry) {
        *self = Self::new(geo);
    }
}
