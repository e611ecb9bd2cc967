//! Row editing for memory.
//!
//! Inserting or deleting a row shifts every word between the edited row and the
//! last used address by one slot. Optionally, operands that point at or past the
//! edited row are adjusted so jumps and loads keep pointing at the words they
//! used to (see [`fix_operands`] and [`FixUp`]).
//!
//! These functions work on a bare [`Mem`] and return the addresses whose words
//! changed. [`Simulator::insert_row_above`] and [`Simulator::delete_row`] wrap them
//! and report those changes.
//!
//! ```
//! use vn_ensemble::config::Geometry;
//! use vn_ensemble::edit::{delete_row, insert_row_above, FixUp};
//! use vn_ensemble::sim::mem::Mem;
//!
//! let geo = Geometry::default();
//! let mut mem = Mem::from_words(geo, &[1005, 2006, 10000]).unwrap();
//!
//! insert_row_above(&mut mem, geo, 1, FixUp::Off).unwrap();
//! assert_eq!(mem.trimmed(), &[1005, 0, 2006, 10000]);
//!
//! delete_row(&mut mem, geo, 1, FixUp::Off).unwrap();
//! assert_eq!(mem.trimmed(), &[1005, 2006, 10000]);
//! ```
//!
//! [`Simulator::insert_row_above`]: crate::sim::Simulator::insert_row_above
//! [`Simulator::delete_row`]: crate::sim::Simulator::delete_row

use crate::config::Geometry;
use crate::sim::mem::Mem;
use crate::sim::ucode::MicroProgram;
use crate::sim::SimErr;

/// Whether a row shift also adjusts operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixUp {
    /// Operands are left alone.
    Off,
    /// Operands are adjusted, except in words with opcode 0 or the halt opcode.
    On {
        /// The opcode whose operand is not an address, if the program has a halt instruction.
        halt_opcode: Option<u32>,
    },
}
impl FixUp {
    /// Creates the fix-up for a program, taking the halt opcode from its name table
    /// (see [`MicroProgram::halt_opcode`]).
    pub fn new(enabled: bool, ucode: &MicroProgram) -> Self {
        match enabled {
            true  => FixUp::On { halt_opcode: ucode.halt_opcode() },
            false => FixUp::Off,
        }
    }
}

/// Inserts an empty row at `selected`, shifting it and every word after it down by one.
///
/// If memory is all zero, this does nothing.
/// If the last word of memory is in use, this fails with [`SimErr::MemoryFull`]
/// and memory is unchanged.
pub fn insert_row_above(mem: &mut Mem, geo: Geometry, selected: usize, fix: FixUp) -> Result<Vec<usize>, SimErr> {
    if selected >= mem.len() {
        return Err(SimErr::AddressOutOfRange(selected));
    }
    let Some(last) = mem.last_used_address() else { return Ok(vec![]) };
    if last == mem.len() - 1 {
        return Err(SimErr::MemoryFull);
    }

    let before = mem.as_slice().to_vec();
    // High to low, so nothing is overwritten before it moves.
    for addr in (selected + 1..=last + 1).rev() {
        mem.copy_within(addr - 1, addr);
    }
    mem.write(selected, 0)?;

    if let FixUp::On { halt_opcode } = fix {
        fix_operands(mem, geo, selected, 1, halt_opcode)?;
    }
    Ok(changed(&before, mem))
}

/// Deletes the row at `selected`, shifting every word after it up by one.
///
/// If memory is all zero, or `selected` is past the last used address, this does nothing.
pub fn delete_row(mem: &mut Mem, geo: Geometry, selected: usize, fix: FixUp) -> Result<Vec<usize>, SimErr> {
    if selected >= mem.len() {
        return Err(SimErr::AddressOutOfRange(selected));
    }
    let Some(last) = mem.last_used_address() else { return Ok(vec![]) };
    if selected > last {
        return Ok(vec![]);
    }

    let before = mem.as_slice().to_vec();
    for addr in selected..last {
        mem.copy_within(addr + 1, addr);
    }
    mem.write(last, 0)?;

    if let FixUp::On { halt_opcode } = fix {
        fix_operands(mem, geo, selected, -1, halt_opcode)?;
    }
    Ok(changed(&before, mem))
}

/// Shifts the operand of every instruction word whose operand is at least `selected` by `delta`.
///
/// Words with opcode 0 (the fetch block) or `halt_opcode` are left alone,
/// since their operands are not addresses. Data words that merely look like
/// instructions are adjusted too; there is no way to tell them apart.
/// Adjusted operands are kept within memory.
pub fn fix_operands(mem: &mut Mem, geo: Geometry, selected: usize, delta: i64, halt_opcode: Option<u32>) -> Result<(), SimErr> {
    let max_operand = (geo.memory_size() - 1) as i64;

    for addr in 0..mem.len() {
        let word = mem.read(addr)?;
        let opcode = geo.opcode(word);
        if word == 0 || opcode == 0 || Some(opcode) == halt_opcode {
            continue;
        }

        let operand = geo.operand(word);
        if operand as usize >= selected {
            let fixed = (i64::from(operand) + delta).clamp(0, max_operand) as u32;
            mem.write(addr, geo.pack(opcode, fixed))?;
        }
    }
    Ok(())
}

fn changed(before: &[u32], mem: &Mem) -> Vec<usize> {
    before.iter()
        .zip(mem.as_slice())
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(addr, _)| addr)
        .collect()
}
