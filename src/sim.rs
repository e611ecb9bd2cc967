//! Simulating and execution for the machine.
//!
//! This module consists of:
//! - [`Simulator`]: The struct that holds a machine and drives its control unit.
//! - [`mem`]: The module handling memory and the registers.
//! - [`ucode`]: The module handling the microcode program and instruction names.
//! - [`micro`]: The module defining the micro-instruction set.
//! - [`recorder`]: The module handling recording manual steps into microcode.
//! - [`observer`]: The module handling change notifications.
//! - [`debug`]: The module handling types of breakpoints for the simulator.
//!
//! # Usage
//!
//! A new simulator starts with zeroed memory and the default microcode program
//! (`FETCH`, `TAKE`, `ADD`, `SUB`, `SAVE`, `JMP`, `TST`, `INC`, `DEC`, `NULL`, `HLT`).
//! A memory word packs a macro opcode and an operand: with the default geometry,
//! `2005` is `ADD 5`.
//!
//! ```
//! use vn_ensemble::sim::Simulator;
//! use vn_ensemble::sim::mem::Reg;
//!
//! let mut sim = Simulator::default();
//! sim.flags.run_delay_ms = 0;
//!
//! // TAKE 4, ADD 5, SAVE 6, HLT
//! for (addr, word) in [1004, 2005, 4006, 10000, 7, 5].into_iter().enumerate() {
//!     sim.write_mem(addr, word).unwrap();
//! }
//! sim.run().unwrap();
//!
//! assert!(sim.hit_halt());
//! assert_eq!(sim.reg_file()[Reg::Accumulator], 12);
//! assert_eq!(sim.mem().read(6).unwrap(), 12);
//! ```
//!
//! ## Execution
//!
//! Beyond the basic [`Simulator::run`] (which runs until halting),
//! there are also:
//! - [`Simulator::micro_step`], [`Simulator::macro_step`]: stepping by one micro-op or one macro instruction
//! - [`Simulator::manual_step`]: executing a single micro-op out of sequence (optionally recording it)
//! - [`Simulator::run_while`], [`Simulator::run_with_limit`]: more advanced programmatic execution
//!
//! A continuous run can be stopped from another thread by clearing the flag
//! returned by [`Simulator::running`]. The flag is only checked between macro steps.
//!
//! While a run is active, every other mutating method fails with [`SimErr::Busy`].
//!
//! ## Faults
//!
//! Execution faults ([`SimErr::InvalidMicroOp`], [`SimErr::FetchFault`], [`SimErr::InvalidOpcode`],
//! and [`SimErr::MicroLoop`]) halt the machine. The machine stays halted until [`Simulator::reset`].
pub mod mem;
pub mod ucode;
pub mod micro;
pub mod recorder;
pub mod observer;
pub mod debug;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Geometry, Settings, SimFlags, BLOCK_LEN};
use crate::edit::{self, FixUp};
use crate::project::{self, ProjectErr, ProjectStore, Snapshot};

use self::debug::Breakpoint;
use self::mem::{Clamp, Mem, Reg, RegFile};
use self::micro::MicroOp;
use self::observer::{AccessSet, ChangeEvent, ChangeObserver};
use self::recorder::Recorder;
use self::ucode::MicroProgram;

/// Errors that can occur during simulation or editing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimErr {
    /// An address was outside of memory (or of the microcode program).
    #[error("address {0} is out of range")]
    AddressOutOfRange(usize),
    /// A value was outside of the range a word can hold.
    #[error("value {value} is outside of [0, {max}]")]
    ValueOutOfRange {
        /// The rejected value.
        value: i64,
        /// The largest allowed value.
        max: u32,
    },
    /// A micro-op id was unknown, reserved, or an empty slot was dispatched.
    #[error("invalid micro-op {0}")]
    InvalidMicroOp(u32),
    /// The instruction fetched for decoding had opcode 0.
    ///
    /// This usually means the program ran into uninitialized memory (a missing `HLT`).
    #[error("fetched an empty instruction from address {addr} (missing halt?)")]
    FetchFault {
        /// The address the instruction was fetched from.
        addr: usize,
    },
    /// An insert was attempted while the last memory word is in use.
    #[error("memory is full")]
    MemoryFull,
    /// A macro opcode has no microcode block.
    #[error("opcode {0} has no microcode block")]
    InvalidOpcode(usize),
    /// An instruction name was empty or too long.
    #[error("instruction name {0:?} must be 1 to 5 characters")]
    InvalidName(String),
    /// Recording could not be started with the given start slot or name.
    #[error("cannot start recording: {0}")]
    RecordingConfig(String),
    /// A recording filled its whole block.
    #[error("recording is full (block {block} has no free slot)")]
    RecordingOverflow {
        /// The block being recorded.
        block: usize,
    },
    /// A macro step ran this many micro-steps without returning to the fetch cycle.
    #[error("macro step did not return to fetch after {0} micro-steps")]
    MicroLoop(usize),
    /// The machine is in a continuous run.
    #[error("machine is running")]
    Busy,
}

/// Anything that can cause a step to abruptly fail to finish.
enum StepBreak {
    /// A halt was executed.
    Halt,
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Reason for why execution paused if it wasn't due to an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
enum PauseCondition {
    /// Program reached a halt.
    Halt,
    /// The running flag was cleared.
    Stopped,
    /// Program hit a breakpoint.
    Breakpoint,
    /// Program hit a tripwire condition.
    Tripwire,
    /// Program hit an error and did not pause successfully.
    #[default]
    Unsuccessful
}

/// The state of the control unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    /// Not halted, and not in a continuous run.
    Idle,
    /// In a continuous run.
    Stepping,
    /// Halted (by `HLT` or a fault). Only a reset leaves this state.
    Halted,
}

/// The result of a single step request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// The step executed.
    Stepped,
    /// The step executed and halted the machine.
    Halted,
    /// The machine was already halted, so nothing executed.
    AlreadyHalted,
}

/// A shared flag which is set while the simulator is in a continuous run.
///
/// Clearing it stops the run after the current macro step.
pub type RunFlag = Arc<AtomicBool>;

/// Executes microcode and holds the state of the machine.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ MACHINE STATE ------------------
    mem: Mem,
    reg_file: RegFile,
    ucode: MicroProgram,
    halted: bool,
    recorder: Recorder,
    /// Set when executed micro-ops changed memory since the last save.
    unsaved: bool,

    /// The number of micro-steps dispatched by the control unit since the last reset.
    ///
    /// Manual steps are not counted.
    pub micro_steps_run: u64,

    /// The number of macro instructions completed since the last reset.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// Indicates the reason why the last execution (via [`Simulator::run_while`] and adjacent)
    /// had paused.
    pause_condition: PauseCondition,

    /// Reports changes in machine state.
    pub observer: ChangeObserver,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    geo: Geometry,

    /// Set while a continuous run is active.
    ///
    /// This is publicly accessible via a reference through [`Simulator::running`].
    running: RunFlag,

    /// Configuration settings for the simulator.
    ///
    /// These are preserved between resets.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: HashSet<Breakpoint>,

    /// Where the project is saved after every edit, if anywhere.
    pub store: Option<ProjectStore>,
}
impl Simulator where Simulator: Send + Sync {}

impl Simulator {
    /// Creates a new simulator with the default geometry.
    pub fn new(flags: SimFlags) -> Self {
        Self::with_settings(Settings { geometry: Geometry::default(), flags })
    }

    /// Creates a new simulator with the given geometry and flags.
    pub fn with_settings(settings: Settings) -> Self {
        let Settings { geometry: geo, flags } = settings;

        Self {
            mem: Mem::new(geo),
            reg_file: RegFile::new(geo),
            ucode: MicroProgram::new(geo),
            halted: false,
            recorder: Recorder::new(),
            unsaved: false,
            micro_steps_run: 0,
            instructions_run: 0,
            pause_condition: Default::default(),
            observer: Default::default(),

            geo,
            running: Arc::default(),
            flags,
            breakpoints: Default::default(),
            store: None,
        }
    }

    /// Resets the control unit.
    ///
    /// This zeroes every register, leaves the halted state, and stops recording.
    /// Memory and microcode are kept (see [`Simulator::reset_memory`] and [`Simulator::reset_microcode`]).
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Breakpoints
    /// - Observer listeners
    /// - The running flag reference
    pub fn reset(&mut self) -> Result<(), SimErr> {
        self.ensure_idle()?;

        self.reg_file.clear();
        for reg in Reg::ALL {
            self.observer.emit(ChangeEvent::Register { reg, value: 0 });
        }
        if std::mem::take(&mut self.halted) {
            self.observer.emit(ChangeEvent::Halted(false));
        }
        self.stop_recording();

        self.micro_steps_run = 0;
        self.instructions_run = 0;
        self.pause_condition = Default::default();
        self.observer.clear();
        tracing::info!("machine reset");
        Ok(())
    }

    /// Fills memory with zero.
    pub fn reset_memory(&mut self) -> Result<(), SimErr> {
        self.ensure_idle()?;
        self.replace_mem(Mem::new(self.geo));
        self.persist();
        Ok(())
    }

    /// Restores the default microcode program and instruction names.
    ///
    /// This also stops recording.
    pub fn reset_microcode(&mut self) -> Result<(), SimErr> {
        self.ensure_idle()?;
        self.replace_ucode(MicroProgram::new(self.geo));
        self.persist();
        Ok(())
    }

    /// The memory.
    pub fn mem(&self) -> &Mem {
        &self.mem
    }
    /// The microcode program and instruction names.
    pub fn ucode(&self) -> &MicroProgram {
        &self.ucode
    }
    /// The register file.
    pub fn reg_file(&self) -> &RegFile {
        &self.reg_file
    }
    /// The sizes of this machine.
    pub fn geometry(&self) -> Geometry {
        self.geo
    }
    /// Whether the machine is halted.
    pub fn halted(&self) -> bool {
        self.halted
    }
    /// Gets a reference to the running flag.
    pub fn running(&self) -> &RunFlag {
        // The flag field is not exposed because that allows someone to swap it
        // with another AtomicBool, which would detach every existing handle.
        &self.running
    }
    /// The current state of the control unit.
    pub fn state(&self) -> ControlState {
        match (self.halted, self.running.load(Ordering::Relaxed)) {
            (true, _)      => ControlState::Halted,
            (false, true)  => ControlState::Stepping,
            (false, false) => ControlState::Idle,
        }
    }
    /// The microcode slot the next recorded step is written to, if recording.
    pub fn recording_cursor(&self) -> Option<usize> {
        self.recorder.cursor()
    }

    /// Indicates whether the last execution of the simulator hit a breakpoint.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Breakpoint)
    }

    /// Indicates whether the last execution of the simulator ended in a halt.
    pub fn hit_halt(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Halt)
    }

    fn ensure_idle(&self) -> Result<(), SimErr> {
        match self.running.load(Ordering::Relaxed) {
            true  => Err(SimErr::Busy),
            false => Ok(()),
        }
    }

    /// Halts the machine because of an execution fault.
    fn fault(&mut self, err: SimErr) -> SimErr {
        tracing::error!(mc = self.reg_file[Reg::MicroCodeCounter], pc = self.reg_file[Reg::ProgramCounter], "execution fault: {err}");
        self.running.store(false, Ordering::Relaxed);
        self.halted = true;
        self.observer.emit(ChangeEvent::Halted(true));
        err
    }

    fn persist(&mut self) {
        if let Some(store) = &self.store {
            store.persist(&self.snapshot());
        }
        self.unsaved = false;
    }

    /// Saves memory written by executed micro-ops, if any was.
    fn persist_executed(&mut self) {
        if self.unsaved {
            self.persist();
        }
    }

    fn set_reg(&mut self, reg: Reg, value: i64) -> Option<Clamp> {
        let clamp = self.reg_file.set(reg, value);
        if let Some(c) = clamp {
            tracing::warn!(%reg, requested = c.requested, stored = c.stored, "register value clamped");
            self.observer.emit(ChangeEvent::Clamped(c));
        }
        self.observer.emit(ChangeEvent::Register { reg, value: self.reg_file[reg] });
        clamp
    }

    fn reg(&self, reg: Reg) -> i64 {
        i64::from(self.reg_file[reg])
    }

    /// Writes a register, clamping the value into its range.
    ///
    /// If clamping was needed, this returns a description of it.
    pub fn set_register(&mut self, reg: Reg, value: i64) -> Result<Option<Clamp>, SimErr> {
        self.ensure_idle()?;
        Ok(self.set_reg(reg, value))
    }

    /// Writes a word to memory.
    pub fn write_mem(&mut self, addr: usize, value: u32) -> Result<(), SimErr> {
        self.ensure_idle()?;
        self.mem.write(addr, value)?;
        self.observer.emit(ChangeEvent::Memory { addr, value });
        self.persist();
        Ok(())
    }

    /// Writes a micro-op id to the microcode program.
    pub fn write_ucode(&mut self, addr: usize, value: u32) -> Result<(), SimErr> {
        self.ensure_idle()?;
        self.ucode.write(addr, value)?;
        self.observer.emit(ChangeEvent::Microcode { addr, value });
        self.persist();
        Ok(())
    }

    /// Sets the display name of a macro opcode.
    pub fn set_instruction_name(&mut self, opcode: usize, name: &str) -> Result<(), SimErr> {
        self.ensure_idle()?;
        self.ucode.set_instruction_name(opcode, name)?;
        self.observer.emit(ChangeEvent::InstructionName { opcode, name: name.to_string() });
        self.persist();
        Ok(())
    }

    /// Inserts an empty memory row at `selected`, shifting the rows below it down.
    ///
    /// If [`SimFlags::fix_operands`] is set, operands pointing at or past `selected` are incremented.
    /// See [`edit::insert_row_above`].
    pub fn insert_row_above(&mut self, selected: usize) -> Result<(), SimErr> {
        self.ensure_idle()?;
        let fix = FixUp::new(self.flags.fix_operands, &self.ucode);
        let changed = edit::insert_row_above(&mut self.mem, self.geo, selected, fix)?;
        self.report_mem_edit(&changed);
        Ok(())
    }

    /// Deletes the memory row at `selected`, shifting the rows below it up.
    ///
    /// If [`SimFlags::fix_operands`] is set, operands pointing at or past `selected` are decremented.
    /// See [`edit::delete_row`].
    pub fn delete_row(&mut self, selected: usize) -> Result<(), SimErr> {
        self.ensure_idle()?;
        let fix = FixUp::new(self.flags.fix_operands, &self.ucode);
        let changed = edit::delete_row(&mut self.mem, self.geo, selected, fix)?;
        self.report_mem_edit(&changed);
        Ok(())
    }

    fn report_mem_edit(&mut self, changed: &[usize]) {
        if changed.is_empty() { return };

        for &addr in changed {
            let value = self.mem.as_slice()[addr];
            self.observer.emit(ChangeEvent::Memory { addr, value });
        }
        tracing::debug!(rows = changed.len(), "memory rows shifted");
        self.persist();
    }

    // ------------------ EXECUTION ------------------

    /// Simulate one micro-step, executing the micro-op at the microcode counter.
    ///
    /// If the machine is halted, nothing happens and [`StepOutcome::AlreadyHalted`] is returned.
    /// An execution fault halts the machine and is returned as an error.
    pub fn micro_step(&mut self) -> Result<StepOutcome, SimErr> {
        self.ensure_idle()?;
        if self.halted {
            tracing::info!("machine is halted, step ignored");
            return Ok(StepOutcome::AlreadyHalted);
        }

        self.observer.clear();
        let result = self.step_micro();
        self.finish_step(result)
    }

    /// Simulate one macro instruction, micro-stepping until the microcode counter returns to 0.
    ///
    /// If the machine is halted, nothing happens and [`StepOutcome::AlreadyHalted`] is returned.
    /// An execution fault halts the machine and is returned as an error.
    pub fn macro_step(&mut self) -> Result<StepOutcome, SimErr> {
        self.ensure_idle()?;
        if self.halted {
            tracing::info!("machine is halted, step ignored");
            return Ok(StepOutcome::AlreadyHalted);
        }

        self.observer.clear();
        let result = self.step_macro();
        self.finish_step(result)
    }

    fn finish_step(&mut self, result: Result<(), StepBreak>) -> Result<StepOutcome, SimErr> {
        self.persist_executed();
        match result {
            Ok(()) => Ok(StepOutcome::Stepped),
            Err(StepBreak::Halt) => Ok(StepOutcome::Halted),
            Err(StepBreak::Err(e)) => Err(self.fault(e)),
        }
    }

    /// Executes one micro-op out of sequence, without moving the microcode counter.
    ///
    /// If recording is active, the id is also written at the recording cursor.
    /// A full recording block rejects the step before it executes.
    ///
    /// ```
    /// use vn_ensemble::sim::Simulator;
    ///
    /// let mut sim = Simulator::default();
    /// sim.start_recording(110, "TWICE").unwrap();
    /// sim.manual_step(16).unwrap(); // ACC := ACC + 1
    /// sim.manual_step(16).unwrap();
    /// sim.manual_step(7).unwrap();  // MC := 0
    /// sim.stop_recording();
    ///
    /// assert_eq!(sim.ucode().block(11).unwrap()[..4], [16, 16, 7, 0]);
    /// assert_eq!(sim.ucode().instruction_name(11), Some("TWICE"));
    /// ```
    pub fn manual_step(&mut self, id: u32) -> Result<StepOutcome, SimErr> {
        self.ensure_idle()?;
        if self.halted {
            tracing::info!("machine is halted, step ignored");
            return Ok(StepOutcome::AlreadyHalted);
        }
        self.recorder.check_room()?;

        self.observer.clear();
        let Ok(op) = MicroOp::try_from(id) else {
            return Err(self.fault(SimErr::InvalidMicroOp(id)));
        };
        tracing::trace!(%op, "manual micro-step");

        let outcome = match self.execute(op) {
            Ok(()) => StepOutcome::Stepped,
            Err(StepBreak::Halt) => StepOutcome::Halted,
            Err(StepBreak::Err(e)) => return Err(self.fault(e)),
        };

        if let Some(addr) = self.recorder.record(&mut self.ucode, id)? {
            self.observer.emit(ChangeEvent::Microcode { addr, value: id });
            self.persist();
        }
        self.persist_executed();
        Ok(outcome)
    }

    fn step_micro(&mut self) -> Result<(), StepBreak> {
        let mc = self.reg_file[Reg::MicroCodeCounter] as usize;
        let id = self.ucode.read(mc)?;

        // An empty slot is never a programmed step.
        let op = match MicroOp::try_from(id) {
            Ok(MicroOp::Nop) | Err(()) => return Err(SimErr::InvalidMicroOp(id).into()),
            Ok(op) => op,
        };
        tracing::trace!(mc, %op, "micro-step");
        self.micro_steps_run += 1;

        self.execute(op)?;
        if op.advances_counter() {
            self.set_reg(Reg::MicroCodeCounter, mc as i64 + 1);
        }
        Ok(())
    }

    fn step_macro(&mut self) -> Result<(), StepBreak> {
        let pc = self.reg_file[Reg::ProgramCounter];
        let limit = self.geo.microcode_size();

        for _ in 0..limit {
            self.step_micro()?;

            if self.reg_file[Reg::MicroCodeCounter] == 0 {
                self.instructions_run += 1;
                tracing::debug!(pc, acc = self.reg_file[Reg::Accumulator], "macro step complete");
                return Ok(());
            }
        }
        Err(SimErr::MicroLoop(limit).into())
    }

    /// Applies the effect of one micro-op.
    ///
    /// This does not advance the microcode counter.
    fn execute(&mut self, op: MicroOp) -> Result<(), StepBreak> {
        use Reg::{Accumulator as ACC, AddressBus as AB, DataBus as DB, InstructionRegister as IR, MicroCodeCounter as MC, ProgramCounter as PC};

        let geo = self.geo;
        match op {
            MicroOp::Nop => {},
            MicroOp::StoreMem => {
                let addr = self.reg_file[AB] as usize;
                let value = self.reg_file[DB];
                let prev = self.mem.read(addr)?;
                self.mem.write(addr, value)?;

                let mut set = AccessSet::WRITTEN;
                if prev != value { set |= AccessSet::MODIFIED };
                self.observer.update_mem_accesses(addr, set);
                self.observer.emit(ChangeEvent::Memory { addr, value });
                self.unsaved = true;
            },
            MicroOp::LoadMem => {
                let addr = self.reg_file[AB] as usize;
                let value = self.mem.read(addr)?;

                self.observer.update_mem_accesses(addr, AccessSet::READ);
                self.set_reg(DB, value.into());
            },
            MicroOp::DataToIr => { self.set_reg(IR, self.reg(DB)); },
            MicroOp::OperandToAddr => { self.set_reg(AB, geo.operand(self.reg_file[IR]).into()); },
            MicroOp::Decode => {
                let opcode = geo.opcode(self.reg_file[IR]) as usize;
                if opcode == 0 {
                    return Err(SimErr::FetchFault { addr: self.reg_file[AB] as usize }.into());
                }
                if opcode >= geo.block_count() {
                    return Err(SimErr::InvalidOpcode(opcode).into());
                }
                self.set_reg(MC, (opcode * BLOCK_LEN) as i64);
            },
            MicroOp::Reserved => return Err(SimErr::InvalidMicroOp(op.id()).into()),
            MicroOp::ResetMc => { self.set_reg(MC, 0); },
            MicroOp::PcToAddr => { self.set_reg(AB, self.reg(PC)); },
            MicroOp::IncPc => { self.set_reg(PC, self.reg(PC) + 1); },
            MicroOp::SkipIfZero => {
                if self.reg_file[ACC] == 0 {
                    self.set_reg(PC, self.reg(PC) + 1);
                }
            },
            MicroOp::OperandToPc => { self.set_reg(PC, geo.operand(self.reg_file[IR]).into()); },
            MicroOp::ClearAcc => { self.set_reg(ACC, 0); },
            MicroOp::AddData => { self.set_reg(ACC, self.reg(ACC) + self.reg(DB)); },
            MicroOp::SubData => { self.set_reg(ACC, self.reg(ACC) - self.reg(DB)); },
            MicroOp::AccToData => { self.set_reg(DB, self.reg(ACC)); },
            MicroOp::IncAcc => { self.set_reg(ACC, self.reg(ACC) + 1); },
            MicroOp::DecAcc => { self.set_reg(ACC, self.reg(ACC) - 1); },
            MicroOp::DataToAcc => { self.set_reg(ACC, self.reg(DB)); },
            MicroOp::Halt => {
                self.halted = true;
                tracing::info!(pc = self.reg_file[PC], "machine halted");
                self.observer.emit(ChangeEvent::Halted(true));
                return Err(StepBreak::Halt);
            },
        }
        Ok(())
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the machine halts
    /// - the running flag is cleared
    /// - A breakpoint matches
    pub fn run_while(&mut self, tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimErr> {
        self.run_inner(Duration::ZERO, tripwire)
    }

    /// Execute the program, waiting [`SimFlags::run_delay`] between macro steps.
    ///
    /// This blocks until the program ends.
    /// If you would like to limit the maximum number of steps to execute, consider [`Simulator::run_with_limit`].
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.run_with_delay(self.flags.run_delay())
    }

    /// Execute the program, waiting `delay` between macro steps.
    pub fn run_with_delay(&mut self, delay: Duration) -> Result<(), SimErr> {
        self.run_inner(delay, |_| true)
    }

    /// Execute the program with a limit on how many macro steps to execute.
    ///
    /// This blocks until the program ends or until the number of steps to execute has been hit.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|sim| sim.instructions_run.wrapping_sub(i) < max_steps)
    }

    fn run_inner(&mut self, delay: Duration, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimErr> {
        self.ensure_idle()?;
        self.observer.clear();
        std::mem::take(&mut self.pause_condition);
        self.running.store(true, Ordering::Relaxed);
        self.observer.emit(ChangeEvent::Running(true));
        tracing::info!(?delay, "run started");

        // event loop
        // run until:
        // 1. the running flag is cleared
        // 2. the machine halts
        // 3. the tripwire condition returns false
        // 4. any of the breakpoints are hit
        let result = loop {
            if !self.running.load(Ordering::Relaxed) {
                break Ok(PauseCondition::Stopped);
            }
            if self.halted {
                break Ok(PauseCondition::Halt);
            }
            if !tripwire(self) {
                break Ok(PauseCondition::Tripwire);
            }

            // Accesses are tracked per macro step, for write breakpoints.
            self.observer.clear();
            match self.step_macro() {
                Ok(()) => {},
                Err(StepBreak::Halt) => break Ok(PauseCondition::Halt),
                Err(StepBreak::Err(e)) => break Err(e),
            }

            // After executing, check that any breakpoints were hit.
            if self.breakpoints.iter().any(|bp| bp.check(self)) {
                break Ok(PauseCondition::Breakpoint);
            }
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        };

        self.running.store(false, Ordering::Relaxed);
        self.observer.emit(ChangeEvent::Running(false));
        self.persist_executed();
        match result {
            Ok(cond) => {
                tracing::info!(?cond, instructions = self.instructions_run, "run paused");
                self.pause_condition = cond;
                Ok(())
            },
            Err(e) => Err(self.fault(e)),
        }
    }

    // ------------------ RECORDING ------------------

    /// Starts recording manual steps into the block starting at `start`,
    /// naming that block's macro instruction `name`.
    pub fn start_recording(&mut self, start: usize, name: &str) -> Result<(), SimErr> {
        self.ensure_idle()?;
        self.recorder.start(&mut self.ucode, start, name)?;

        tracing::info!(start, name, "recording started");
        self.observer.emit(ChangeEvent::InstructionName { opcode: start / BLOCK_LEN, name: name.to_string() });
        self.observer.emit(ChangeEvent::Recording(Some(start)));
        self.persist();
        Ok(())
    }

    /// Stops recording. This does nothing if recording is not active.
    pub fn stop_recording(&mut self) {
        if self.recorder.is_active() {
            self.recorder.stop();
            tracing::info!("recording stopped");
            self.observer.emit(ChangeEvent::Recording(None));
        }
    }

    // ------------------ PROJECTS ------------------

    /// Captures memory, microcode, and instruction names.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.mem, &self.ucode)
    }

    /// Replaces memory, microcode, and instruction names with a snapshot's.
    ///
    /// If any part of the snapshot is invalid, nothing is changed.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), ProjectErr> {
        self.ensure_idle()?;
        let (mem, ucode) = snapshot.build(self.geo)?;

        self.replace_mem(mem);
        self.replace_ucode(ucode);
        tracing::info!("snapshot loaded");
        self.persist();
        Ok(())
    }

    /// Replaces memory, microcode, and instruction names with those in a JSON snapshot.
    pub fn load_snapshot_json(&mut self, src: &str) -> Result<(), ProjectErr> {
        self.load_snapshot(&Snapshot::from_json(src)?)
    }

    /// Replaces memory with the contents of a legacy `.ram` file.
    ///
    /// See [`project::parse_ram`].
    pub fn load_ram_text(&mut self, src: &str) -> Result<(), ProjectErr> {
        self.ensure_idle()?;
        self.replace_mem(project::parse_ram(self.geo, src));
        tracing::info!("ram file loaded");
        self.persist();
        Ok(())
    }

    /// Replaces microcode and instruction names with the contents of a legacy `.mc` file.
    ///
    /// See [`project::parse_mc`]. If the file is rejected, nothing is changed.
    pub fn load_mc_text(&mut self, src: &str) -> Result<(), ProjectErr> {
        self.ensure_idle()?;
        let ucode = project::parse_mc(self.geo, src)?;
        self.replace_ucode(ucode);
        tracing::info!("microcode file loaded");
        self.persist();
        Ok(())
    }

    fn replace_mem(&mut self, mem: Mem) {
        self.mem = mem;
        self.observer.emit(ChangeEvent::MemoryReloaded);
    }

    fn replace_ucode(&mut self, ucode: MicroProgram) {
        self.stop_recording();
        self.ucode = ucode;
        self.observer.emit(ChangeEvent::MicrocodeReloaded);
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{Geometry, Settings, SimFlags};
    use crate::project::{ProjectErr, ProjectStore, Snapshot};

    use super::debug::Breakpoint;
    use super::mem::{Clamp, Reg};
    use super::observer::ChangeEvent;
    use super::{ControlState, SimErr, Simulator, StepOutcome};

    fn sim_with(words: &[u32]) -> Simulator {
        let mut sim = Simulator::new(SimFlags { run_delay_ms: 0, ..Default::default() });
        for (addr, &word) in words.iter().enumerate() {
            sim.write_mem(addr, word).unwrap();
        }
        sim
    }

    #[test]
    fn test_fetch_fault_on_empty_memory() {
        let mut sim = Simulator::default();
        assert_eq!(sim.macro_step(), Err(SimErr::FetchFault { addr: 0 }));
        assert!(sim.halted());
        assert_eq!(sim.state(), ControlState::Halted);
        assert_eq!(sim.reg_file()[Reg::InstructionRegister], 0);
        assert_eq!(sim.reg_file()[Reg::ProgramCounter], 1);

        // halted: further steps do nothing until reset
        assert_eq!(sim.micro_step(), Ok(StepOutcome::AlreadyHalted));
        sim.reset().unwrap();
        assert_eq!(sim.state(), ControlState::Idle);
        assert!(Reg::ALL.iter().all(|&r| sim.reg_file()[r] == 0));
    }

    #[test]
    fn test_invalid_micro_ops_halt() {
        let mut sim = Simulator::default();

        // an empty slot is not a valid active step
        sim.set_register(Reg::MicroCodeCounter, 150).unwrap();
        assert_eq!(sim.micro_step(), Err(SimErr::InvalidMicroOp(0)));
        assert!(sim.halted());

        for id in [6, 20, 255] {
            sim.reset().unwrap();
            assert_eq!(sim.manual_step(id), Err(SimErr::InvalidMicroOp(id)));
            assert!(sim.halted());
        }
    }

    #[test]
    fn test_micro_steps_fetch() {
        let mut sim = sim_with(&[2005]);

        for _ in 0..4 {
            assert_eq!(sim.micro_step(), Ok(StepOutcome::Stepped));
        }
        assert_eq!(sim.reg_file()[Reg::InstructionRegister], 2005);
        assert_eq!(sim.reg_file()[Reg::ProgramCounter], 1);
        assert_eq!(sim.reg_file()[Reg::MicroCodeCounter], 4);

        sim.micro_step().unwrap();
        assert_eq!(sim.reg_file()[Reg::MicroCodeCounter], 20);
        assert_eq!(sim.micro_steps_run, 5);
        assert_eq!(sim.instructions_run, 0);
    }

    #[test]
    fn test_program_runs_to_halt() {
        // TAKE 4, ADD 5, SAVE 6, HLT, 7, 5
        let mut sim = sim_with(&[1004, 2005, 4006, 10000, 7, 5]);
        sim.run().unwrap();

        assert!(sim.hit_halt());
        assert!(sim.halted());
        assert_eq!(sim.reg_file()[Reg::Accumulator], 12);
        assert_eq!(sim.mem().read(6).unwrap(), 12);
        assert_eq!(sim.instructions_run, 3);
        assert_eq!(sim.state(), ControlState::Halted);
        assert!(!sim.running().load(Ordering::Relaxed));
    }

    #[test]
    fn test_skip_and_jump() {
        // TST, HLT, JMP 4, HLT, INC, HLT
        let mut sim = sim_with(&[6000, 10000, 5004, 10000, 7000, 10000]);

        // ACC == 0, so TST skips the first halt
        sim.macro_step().unwrap();
        assert_eq!(sim.reg_file()[Reg::ProgramCounter], 2);
        sim.macro_step().unwrap();
        assert_eq!(sim.reg_file()[Reg::ProgramCounter], 4);
        assert_eq!(sim.macro_step(), Ok(StepOutcome::Stepped));
        assert_eq!(sim.macro_step(), Ok(StepOutcome::Halted));
        assert_eq!(sim.reg_file()[Reg::Accumulator], 1);
    }

    #[test]
    fn test_accumulator_saturates() {
        let mut sim = Simulator::default();
        let events = sim.observer.subscribe();

        sim.set_register(Reg::Accumulator, 19999).unwrap();
        sim.set_register(Reg::DataBus, 1).unwrap();
        sim.manual_step(13).unwrap();
        assert_eq!(sim.reg_file()[Reg::Accumulator], 19999);
        sim.manual_step(16).unwrap();
        assert_eq!(sim.reg_file()[Reg::Accumulator], 19999);

        sim.set_register(Reg::Accumulator, 0).unwrap();
        sim.manual_step(14).unwrap();
        assert_eq!(sim.reg_file()[Reg::Accumulator], 0);
        sim.manual_step(17).unwrap();
        assert_eq!(sim.reg_file()[Reg::Accumulator], 0);

        let clamps: Vec<_> = events.try_iter()
            .filter_map(|e| match e {
                ChangeEvent::Clamped(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(clamps, [
            Clamp { reg: Reg::Accumulator, requested: 20000, stored: 19999 },
            Clamp { reg: Reg::Accumulator, requested: 20000, stored: 19999 },
            Clamp { reg: Reg::Accumulator, requested: -1, stored: 0 },
            Clamp { reg: Reg::Accumulator, requested: -1, stored: 0 },
        ]);
        assert!(!sim.halted());
    }

    #[test]
    fn test_manual_step_keeps_counter() {
        let mut sim = Simulator::default();
        sim.set_register(Reg::MicroCodeCounter, 10).unwrap();
        sim.manual_step(9).unwrap();
        assert_eq!(sim.reg_file()[Reg::ProgramCounter], 1);
        assert_eq!(sim.reg_file()[Reg::MicroCodeCounter], 10);

        assert_eq!(sim.manual_step(19), Ok(StepOutcome::Halted));
        assert_eq!(sim.manual_step(9), Ok(StepOutcome::AlreadyHalted));
        assert_eq!(sim.reg_file()[Reg::ProgramCounter], 1);
    }

    #[test]
    fn test_decode_bad_opcode() {
        let mut sim = Simulator::with_settings(Settings {
            geometry: Geometry::new(10, 50).unwrap(),
            flags: Default::default(),
        });
        // opcode 7 has no block in a 5-block program
        sim.write_mem(0, 70).unwrap();
        assert_eq!(sim.macro_step(), Err(SimErr::InvalidOpcode(7)));
        assert!(sim.halted());
    }

    #[test]
    fn test_micro_loop_guard() {
        let mut sim = sim_with(&[9000]);
        // NULL block that never returns to fetch
        for addr in 91..200 {
            sim.write_ucode(addr, 12).unwrap();
        }
        assert_eq!(sim.macro_step(), Err(SimErr::MicroLoop(200)));
        assert!(sim.halted());
    }

    #[test]
    fn test_recording() {
        let mut sim = Simulator::default();
        let events = sim.observer.subscribe();

        sim.start_recording(20, "LOOP").unwrap();
        assert_eq!(sim.recording_cursor(), Some(20));
        sim.manual_step(1).unwrap();
        sim.manual_step(2).unwrap();

        assert_eq!(sim.ucode().read(20).unwrap(), 1);
        assert_eq!(sim.ucode().read(21).unwrap(), 2);
        assert_eq!(sim.ucode().instruction_name(2), Some("LOOP"));

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events[0], ChangeEvent::InstructionName { opcode: 2, name: "LOOP".to_string() });
        assert_eq!(events[1], ChangeEvent::Recording(Some(20)));
        assert!(events.contains(&ChangeEvent::Microcode { addr: 20, value: 1 }));
        assert!(events.contains(&ChangeEvent::Microcode { addr: 21, value: 2 }));

        sim.stop_recording();
        sim.manual_step(12).unwrap();
        assert_eq!(sim.ucode().read(22).unwrap(), 0);

        assert!(matches!(sim.start_recording(25, "X"), Err(SimErr::RecordingConfig(_))));
    }

    #[test]
    fn test_recording_overflow() {
        let mut sim = Simulator::default();
        sim.start_recording(120, "FULL").unwrap();
        for _ in 0..10 {
            sim.manual_step(12).unwrap();
        }
        sim.set_register(Reg::Accumulator, 5).unwrap();
        assert_eq!(sim.manual_step(12), Err(SimErr::RecordingOverflow { block: 12 }));
        // rejected before executing
        assert_eq!(sim.reg_file()[Reg::Accumulator], 5);
        assert_eq!(sim.ucode().read(130).unwrap(), 0);
        assert!(!sim.halted());
    }

    #[test]
    fn test_busy_while_running() {
        let mut sim = sim_with(&[5000]);
        let mut attempts = vec![];

        sim.run_while(|s| {
            attempts.push(s.manual_step(12));
            attempts.push(s.write_mem(1, 1).map(|()| StepOutcome::Stepped));
            attempts.push(s.start_recording(20, "X").map(|()| StepOutcome::Stepped));
            attempts.push(s.macro_step());
            assert_eq!(s.state(), ControlState::Stepping);
            false
        }).unwrap();

        assert!(attempts.iter().all(|r| *r == Err(SimErr::Busy)));
        assert!(!sim.hit_halt());
        assert_eq!(sim.state(), ControlState::Idle);
        assert_eq!(sim.manual_step(12), Ok(StepOutcome::Stepped));
    }

    #[test]
    fn test_run_with_limit() {
        // JMP 0
        let mut sim = sim_with(&[5000]);
        sim.run_with_limit(25).unwrap();
        assert_eq!(sim.instructions_run, 25);
        assert!(!sim.hit_halt());
        assert!(!sim.halted());
    }

    #[test]
    fn test_stop_from_other_thread() {
        let mut sim = sim_with(&[5000]);
        let flag = Arc::clone(sim.running());
        let events = sim.observer.subscribe();

        let stopper = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                std::thread::yield_now();
            }
            flag.store(false, Ordering::Relaxed);
        });
        sim.run_with_delay(Duration::from_millis(1)).unwrap();
        stopper.join().unwrap();

        assert!(!sim.hit_halt());
        assert!(!sim.halted());
        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events.first(), Some(&ChangeEvent::Running(true)));
        assert_eq!(events.last(), Some(&ChangeEvent::Running(false)));
    }

    #[test]
    fn test_breakpoint() {
        // INC, JMP 0
        let mut sim = sim_with(&[7000, 5000]);
        sim.breakpoints.insert(Breakpoint::Reg { reg: Reg::Accumulator, range: 3..=3 });

        sim.run_while(|_| true).unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.reg_file()[Reg::Accumulator], 3);

        sim.breakpoints.clear();
        sim.breakpoints.insert(Breakpoint::Address(1));
        sim.run_while(|_| true).unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.reg_file()[Reg::Accumulator], 4);
    }

    #[test]
    fn test_fault_stops_run() {
        // INC, then empty memory
        let mut sim = sim_with(&[7000]);
        let events = sim.observer.subscribe();

        assert_eq!(sim.run(), Err(SimErr::FetchFault { addr: 1 }));
        assert!(sim.halted());
        assert!(!sim.hit_halt());
        assert!(!sim.running().load(Ordering::Relaxed));

        let events: Vec<_> = events.try_iter().collect();
        assert!(events.ends_with(&[ChangeEvent::Running(false), ChangeEvent::Halted(true)]));
    }

    #[test]
    fn test_row_edits_report() {
        let mut sim = sim_with(&[1, 2]);
        let events = sim.observer.subscribe();

        sim.insert_row_above(0).unwrap();
        assert_eq!(sim.mem().trimmed(), &[0, 1, 2]);
        let events_seen: Vec<_> = events.try_iter().collect();
        assert_eq!(events_seen, [
            ChangeEvent::Memory { addr: 0, value: 0 },
            ChangeEvent::Memory { addr: 1, value: 1 },
            ChangeEvent::Memory { addr: 2, value: 2 },
        ]);

        sim.delete_row(0).unwrap();
        assert_eq!(sim.mem().trimmed(), &[1, 2]);
        assert_eq!(events.try_iter().count(), 3);

        sim.flags.fix_operands = true;
        sim.reset_memory().unwrap();
        for (addr, word) in [1002, 10000, 9].into_iter().enumerate() {
            sim.write_mem(addr, word).unwrap();
        }
        sim.insert_row_above(1).unwrap();
        assert_eq!(sim.mem().trimmed(), &[1003, 0, 10000, 9]);
    }

    #[test]
    fn test_snapshot_load_is_atomic() {
        let mut sim = sim_with(&[1004, 10000]);
        let before = sim.snapshot();

        let bad = Snapshot { ram: vec![1, 2], micro_code: vec![8, 6], ..Default::default() };
        assert!(matches!(sim.load_snapshot(&bad), Err(ProjectErr::MalformedSnapshot(_))));
        assert_eq!(sim.snapshot(), before);

        let good = Snapshot { ram: vec![3], micro_code: vec![8, 2, 3, 9, 5], ..Default::default() };
        sim.load_snapshot(&good).unwrap();
        assert_eq!(sim.mem().trimmed(), &[3]);
        assert_eq!(sim.ucode().instruction_name(0), None);
    }

    #[test]
    fn test_legacy_loads() {
        let mut sim = Simulator::default();
        sim.load_ram_text("9006\n1005 # comment\n\n").unwrap();
        assert_eq!(sim.mem().trimmed(), &[9006, 1005]);

        let before = sim.ucode().clone();
        let short: String = "12\n".repeat(150);
        assert!(matches!(sim.load_mc_text(&short), Err(ProjectErr::MalformedSnapshot(_))));
        assert_eq!(sim.ucode(), &before);
    }

    #[test]
    fn test_store_persists_edits() {
        let path = std::env::temp_dir().join(format!("vn-ensemble-sim-{}.json", std::process::id()));
        let mut sim = Simulator::default();
        sim.store = Some(ProjectStore::new(&path));

        sim.write_mem(0, 9006).unwrap();
        sim.set_instruction_name(11, "NEW").unwrap();

        let saved = ProjectStore::new(&path).load().unwrap();
        assert_eq!(saved.ram, [9006]);
        assert_eq!(saved.instruction_names.get("11").map(String::as_str), Some("NEW"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_store_persists_executed_writes() {
        let path = std::env::temp_dir().join(format!("vn-ensemble-sim-exec-{}.json", std::process::id()));
        // INC, SAVE 5, HLT
        let mut sim = sim_with(&[7000, 4005, 10000]);
        sim.store = Some(ProjectStore::new(&path));

        sim.run().unwrap();
        let saved = ProjectStore::new(&path).load().unwrap();
        assert_eq!(saved.ram, [7000, 4005, 10000, 0, 0, 1]);

        // a manual store is saved as well
        sim.reset().unwrap();
        sim.set_register(Reg::DataBus, 3).unwrap();
        sim.set_register(Reg::AddressBus, 7).unwrap();
        sim.manual_step(1).unwrap();
        let saved = ProjectStore::new(&path).load().unwrap();
        assert_eq!(saved.ram, [7000, 4005, 10000, 0, 0, 1, 0, 3]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_breakpoint_per_step() {
        // SAVE 9, INC, JMP 0
        let mut sim = sim_with(&[4009, 7000, 5000]);
        sim.breakpoints.insert(Breakpoint::Write(9));

        sim.run_while(|_| true).unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.reg_file()[Reg::ProgramCounter], 1);

        // the next write happens two steps later, not on the step right after
        sim.run_while(|_| true).unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.instructions_run, 4);
        assert_eq!(sim.mem().read(9).unwrap(), 1);
    }
}
