//! Saving and loading machine projects.
//!
//! A project is a machine's memory, microcode program, and instruction names.
//! This module handles three formats:
//! - [`Snapshot`]: the structured (JSON) project format, holding all three.
//! - Legacy `.ram` files ([`parse_ram`], [`write_ram`]): one memory word per line.
//! - Legacy `.mc` files ([`parse_mc`], [`write_mc`]): one micro-op id per line
//!     for the whole program, followed by instruction names one per line.
//!
//! [`ProjectStore`] ties a snapshot file to a [`Simulator`] so that it is saved
//! after every edit.
//!
//! # Usage
//!
//! ```
//! use vn_ensemble::sim::Simulator;
//!
//! let mut sim = Simulator::default();
//! sim.write_mem(0, 10000).unwrap();
//!
//! let json = sim.snapshot().to_json().unwrap();
//!
//! let mut other = Simulator::default();
//! other.load_snapshot_json(&json).unwrap();
//! assert_eq!(other.mem().read(0).unwrap(), 10000);
//! ```
//!
//! [`Simulator`]: crate::sim::Simulator
pub mod lex;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Geometry;
use crate::sim::mem::Mem;
use crate::sim::micro::MicroOp;
use crate::sim::ucode::{validate_name, MicroProgram};
use crate::sim::SimErr;

use self::lex::data_lines;

/// Errors raised while saving or loading a project.
#[derive(Debug, thiserror::Error)]
pub enum ProjectErr {
    /// The project data was rejected. Nothing was applied.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
    /// The machine refused the load.
    #[error(transparent)]
    Sim(#[from] SimErr),
    /// The project file could not be read or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The project could not be serialized.
    #[error("serialize error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The structured project format.
///
/// ```json
/// { "ram": [9006, 1005], "microCode": [8, 2, 3, 9, 5], "instructionNames": { "0": "FETCH" } }
/// ```
///
/// Arrays may be shorter than the machine's sizes (they are zero-padded on load)
/// but may not be longer.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Memory words, with trailing zeros trimmed.
    #[serde(default)]
    pub ram: Vec<u32>,
    /// Micro-op ids, with trailing zeros trimmed.
    #[serde(default)]
    pub micro_code: Vec<u32>,
    /// Instruction names keyed by opcode (as a decimal string).
    #[serde(default)]
    pub instruction_names: BTreeMap<String, String>,
}
impl Snapshot {
    /// Captures a machine's memory and program.
    pub fn capture(mem: &Mem, ucode: &MicroProgram) -> Self {
        Self {
            ram: mem.trimmed().to_vec(),
            micro_code: ucode.trimmed(),
            instruction_names: ucode.names()
                .map(|(op, name)| (op.to_string(), name.to_string()))
                .collect(),
        }
    }

    /// Validates the snapshot against a geometry, building the memory and program it describes.
    ///
    /// Any invalid field rejects the whole snapshot.
    pub fn build(&self, geo: Geometry) -> Result<(Mem, MicroProgram), ProjectErr> {
        let mem = Mem::from_words(geo, &self.ram)
            .map_err(|e| ProjectErr::MalformedSnapshot(format!("ram: {e}")))?;

        let mut names = BTreeMap::new();
        for (key, name) in &self.instruction_names {
            let opcode = key.parse::<usize>()
                .map_err(|_| ProjectErr::MalformedSnapshot(format!("instruction name key {key:?} is not an opcode")))?;
            names.insert(opcode, name.clone());
        }
        let ucode = MicroProgram::from_parts(geo, &self.micro_code, names)
            .map_err(|e| ProjectErr::MalformedSnapshot(format!("microcode: {e}")))?;

        Ok((mem, ucode))
    }

    /// Parses a snapshot from JSON.
    pub fn from_json(src: &str) -> Result<Self, ProjectErr> {
        serde_json::from_str(src)
            .map_err(|e| ProjectErr::MalformedSnapshot(e.to_string()))
    }

    /// Serializes the snapshot to JSON.
    pub fn to_json(&self) -> Result<String, ProjectErr> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Reads a legacy `.ram` file.
///
/// Each data line is one word. Lines which are not a valid word become 0 (with a warning).
/// A file shorter than memory is zero-padded; a longer one is truncated.
pub fn parse_ram(geo: Geometry, src: &str) -> Mem {
    let mut mem = Mem::new(geo);
    let lines = data_lines(src);

    if lines.len() > mem.len() {
        tracing::warn!(lines = lines.len(), memory_size = mem.len(), "ram file is longer than memory, truncating");
    }
    for (addr, line) in lines.iter().take(mem.len()).enumerate() {
        let value = line.value
            .map_err(|e| e.to_string())
            .and_then(|v| mem.write(addr, v).map_err(|e| e.to_string()));

        if let Err(reason) = value {
            tracing::warn!(line = line.line_no, text = line.text, %reason, "invalid ram entry, using 0");
        }
    }
    mem
}

/// Reads a legacy `.mc` file.
///
/// The first `microcode_size` data lines are micro-op ids; invalid ids become 0 (with a warning).
/// Any following lines are instruction names for opcodes 0, 1, 2, and so on,
/// replacing the default names. Fewer than `microcode_size` data lines is an error.
pub fn parse_mc(geo: Geometry, src: &str) -> Result<MicroProgram, ProjectErr> {
    let size = geo.microcode_size();
    let lines = data_lines(src);
    if lines.len() < size {
        return Err(ProjectErr::MalformedSnapshot(format!(
            "microcode file has {} data lines, expected at least {size}", lines.len()
        )));
    }
    let (ops, name_lines) = lines.split_at(size);

    let values: Vec<u32> = ops.iter()
        .map(|line| {
            let value = line.value
                .map_err(|e| e.to_string())
                .and_then(|v| match MicroOp::try_from(v) {
                    Ok(op) if op.is_programmable() => Ok(v),
                    _ => Err(SimErr::InvalidMicroOp(v).to_string()),
                });
            value.unwrap_or_else(|reason| {
                tracing::warn!(line = line.line_no, text = line.text, %reason, "invalid microcode entry, using 0");
                0
            })
        })
        .collect();

    let mut names: BTreeMap<usize, String> = MicroProgram::new(geo).names()
        .map(|(op, name)| (op, name.to_string()))
        .collect();
    for (opcode, line) in name_lines.iter().enumerate() {
        if opcode >= geo.block_count() {
            tracing::warn!(line = line.line_no, "more instruction names than opcodes, ignoring the rest");
            break;
        }
        match validate_name(line.text) {
            Ok(()) => { names.insert(opcode, line.text.to_string()); },
            Err(e) => tracing::warn!(line = line.line_no, "{e}, keeping previous name"),
        }
    }

    Ok(MicroProgram::from_parts(geo, &values, names)?)
}

/// Writes a legacy `.ram` file, up to the last used address.
pub fn write_ram(mem: &Mem) -> String {
    RamFile(mem).to_string()
}
/// Writes a legacy `.mc` file.
///
/// Names are written for every opcode up to the highest named one;
/// unnamed opcodes in between get a placeholder `OP<n>` so the following names stay aligned.
pub fn write_mc(ucode: &MicroProgram) -> String {
    McFile(ucode).to_string()
}

struct RamFile<'a>(&'a Mem);
impl std::fmt::Display for RamFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "# ram")?;
        for word in self.0.trimmed() {
            writeln!(f, "{word}")?;
        }
        Ok(())
    }
}

struct McFile<'a>(&'a MicroProgram);
impl std::fmt::Display for McFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ucode = self.0;
        writeln!(f, "# microcode")?;
        for &op in ucode.as_slice() {
            writeln!(f, "{op}")?;
        }

        let Some(last) = ucode.names().map(|(op, _)| op).last() else { return Ok(()) };
        writeln!(f, "# instruction names")?;
        for opcode in 0..=last {
            match ucode.instruction_name(opcode) {
                Some(name) => writeln!(f, "{name}")?,
                None       => writeln!(f, "OP{opcode}")?,
            }
        }
        Ok(())
    }
}

/// A snapshot file that a machine is saved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectStore {
    path: PathBuf,
}
impl ProjectStore {
    /// Creates a store backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a snapshot to the backing file.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), ProjectErr> {
        std::fs::write(&self.path, snapshot.to_json()?)?;
        Ok(())
    }

    /// Reads the snapshot in the backing file.
    pub fn load(&self) -> Result<Snapshot, ProjectErr> {
        let src = std::fs::read_to_string(&self.path)?;
        Snapshot::from_json(&src)
    }

    /// Writes a snapshot, logging instead of returning any failure.
    pub fn persist(&self, snapshot: &Snapshot) {
        match self.save(snapshot) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "project saved"),
            Err(e) => tracing::warn!(path = %self.path.display(), "could not save project: {e}"),
        }
    }
}
