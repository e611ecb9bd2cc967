//! Recording manual micro-steps into a microcode block.
//!
//! Recording is started on a block-aligned microcode slot with a name for the new
//! macro instruction. While it is active, every manually executed micro-op
//! ([`Simulator::manual_step`]) is also written at the recording cursor,
//! and the cursor advances.
//!
//! A recording is confined to its own block: once all 10 slots are used,
//! further steps are refused with [`SimErr::RecordingOverflow`] instead of
//! spilling into the next instruction's block.
//!
//! [`Simulator::manual_step`]: super::Simulator::manual_step

use crate::config::BLOCK_LEN;

use super::ucode::{validate_name, MicroProgram};
use super::SimErr;

/// Records micro-ops into a microcode block.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Recorder {
    cursor: Option<usize>,
    block_end: usize,
}
impl Recorder {
    /// Creates an inactive recorder.
    pub fn new() -> Self {
        Default::default()
    }

    /// Starts recording at `start`, naming the macro instruction that block belongs to.
    ///
    /// `start` must be the first slot of a block, and `name` must be 1 to 5 characters.
    /// On error, neither the recorder nor the program is changed.
    pub fn start(&mut self, prog: &mut MicroProgram, start: usize, name: &str) -> Result<(), SimErr> {
        if start % BLOCK_LEN != 0 || start + BLOCK_LEN > prog.len() {
            return Err(SimErr::RecordingConfig(format!(
                "start slot {start} must be a multiple of {BLOCK_LEN} in [0, {}]",
                prog.len() - BLOCK_LEN
            )));
        }
        validate_name(name)
            .map_err(|_| SimErr::RecordingConfig(format!("name {name:?} must be 1 to 5 characters")))?;

        prog.set_instruction_name(start / BLOCK_LEN, name)?;
        self.cursor = Some(start);
        self.block_end = start + BLOCK_LEN;
        Ok(())
    }

    /// Whether another op can be recorded without leaving the block.
    ///
    /// Fails with [`SimErr::RecordingOverflow`] if the block is full.
    /// An inactive recorder always has room.
    pub fn check_room(&self) -> Result<(), SimErr> {
        match self.cursor {
            Some(c) if c >= self.block_end => Err(SimErr::RecordingOverflow { block: (self.block_end / BLOCK_LEN) - 1 }),
            _ => Ok(()),
        }
    }

    /// Writes `id` at the cursor and advances it.
    ///
    /// This returns the slot written, or `None` if the recorder is inactive.
    pub fn record(&mut self, prog: &mut MicroProgram, id: u32) -> Result<Option<usize>, SimErr> {
        let Some(cursor) = self.cursor else { return Ok(None) };
        self.check_room()?;

        prog.write(cursor, id)?;
        self.cursor = Some(cursor + 1);
        Ok(Some(cursor))
    }

    /// Stops recording.
    pub fn stop(&mut self) {
        self.cursor = None;
    }

    /// Whether recording is active.
    pub fn is_active(&self) -> bool {
        self.cursor.is_some()
    }

    /// The slot the next recorded op will be written to.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Geometry;
    use crate::sim::ucode::MicroProgram;
    use crate::sim::SimErr;

    use super::Recorder;

    #[test]
    fn test_record_block() {
        let mut prog = MicroProgram::new(Geometry::default());
        let mut rec = Recorder::new();

        assert_eq!(rec.record(&mut prog, 1).unwrap(), None);

        rec.start(&mut prog, 20, "LOOP").unwrap();
        assert_eq!(rec.record(&mut prog, 1).unwrap(), Some(20));
        assert_eq!(rec.record(&mut prog, 2).unwrap(), Some(21));
        assert_eq!(prog.read(20).unwrap(), 1);
        assert_eq!(prog.read(21).unwrap(), 2);
        assert_eq!(prog.instruction_name(2), Some("LOOP"));
        assert_eq!(rec.cursor(), Some(22));

        rec.stop();
        assert!(!rec.is_active());
        assert_eq!(rec.record(&mut prog, 3).unwrap(), None);
        assert_eq!(prog.read(22).unwrap(), 0);
    }

    #[test]
    fn test_start_validation() {
        let mut prog = MicroProgram::new(Geometry::default());
        let before = prog.clone();
        let mut rec = Recorder::new();

        assert!(matches!(rec.start(&mut prog, 15, "X"), Err(SimErr::RecordingConfig(_))));
        assert!(matches!(rec.start(&mut prog, 200, "X"), Err(SimErr::RecordingConfig(_))));
        assert!(matches!(rec.start(&mut prog, 30, ""), Err(SimErr::RecordingConfig(_))));
        assert!(matches!(rec.start(&mut prog, 30, "SIXSIX"), Err(SimErr::RecordingConfig(_))));
        assert!(!rec.is_active());
        assert_eq!(prog, before);

        rec.start(&mut prog, 190, "LAST").unwrap();
        assert_eq!(prog.instruction_name(19), Some("LAST"));
    }

    #[test]
    fn test_overflow() {
        let mut prog = MicroProgram::new(Geometry::default());
        let mut rec = Recorder::new();
        rec.start(&mut prog, 110, "FILL").unwrap();

        for i in 0..10 {
            assert_eq!(rec.record(&mut prog, 12).unwrap(), Some(110 + i));
        }
        assert!(matches!(rec.record(&mut prog, 12), Err(SimErr::RecordingOverflow { block: 11 })));
        assert_eq!(prog.read(120).unwrap(), 0);
    }

    #[test]
    fn test_invalid_op_does_not_advance() {
        let mut prog = MicroProgram::new(Geometry::default());
        let mut rec = Recorder::new();
        rec.start(&mut prog, 110, "BAD").unwrap();

        assert!(matches!(rec.record(&mut prog, 6), Err(SimErr::InvalidMicroOp(6))));
        assert_eq!(rec.cursor(), Some(110));
    }
}
