//! A microcoded Von-Neumann teaching machine.
//!
//! The machine has a fixed-size memory of words, six registers, and a control unit
//! which runs a user-editable microcode program. Every macro instruction (`TAKE`, `ADD`, `JMP`, ...)
//! is a block of 10 micro-operations in that program, so the instruction set itself
//! can be changed, or recorded step by step.
//!
//! # Usage
//!
//! Programs are written straight into memory, as words packing an opcode and an operand:
//! ```
//! use vn_ensemble::sim::Simulator;
//! use vn_ensemble::sim::mem::Reg;
//!
//! let mut sim = Simulator::default();
//! // TAKE 3, INC, HLT, 41
//! sim.load_ram_text("1003\n7000\n10000\n41\n").unwrap();
//!
//! sim.macro_step().unwrap();
//! sim.macro_step().unwrap();
//! assert_eq!(sim.reg_file()[Reg::Accumulator], 42);
//! ```
//!
//! A machine's memory and microcode can be exchanged as a [`project::Snapshot`]
//! or as legacy `.ram` and `.mc` line files.
//!
//! If more granularity is needed for simulation, there are also micro-step and manual-step functions.
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod config;
pub mod sim;
pub mod edit;
pub mod project;
