//! Machine settings.
//!
//! This module consists of:
//! - [`Geometry`]: the fixed sizes of a machine (memory and microcode length),
//!     along with the word layout derived from them.
//! - [`SimFlags`]: runtime flags which can be changed after a [`Simulator`] is created.
//! - [`Settings`]: both of the above, loadable from a JSON settings document.
//!
//! ```
//! use vn_ensemble::config::Settings;
//!
//! let settings = Settings::from_json(r#"{ "flags": { "fix_operands": true } }"#).unwrap();
//! assert!(settings.flags.fix_operands);
//! assert_eq!(settings.geometry.memory_size(), 1000);
//! ```
//!
//! [`Simulator`]: crate::sim::Simulator
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of microcode slots belonging to one macro instruction.
pub const BLOCK_LEN: usize = 10;

/// Errors raised when settings cannot be used to build a machine.
#[derive(Debug, thiserror::Error)]
pub enum ConfigErr {
    /// Memory must hold at least one word.
    #[error("memory size must be nonzero")]
    EmptyMemory,
    /// Microcode must be split evenly into blocks.
    #[error("microcode size {0} is not a positive multiple of {BLOCK_LEN}")]
    MicrocodeSize(usize),
    /// Words or addresses would not fit in 32 bits.
    #[error("memory size {memory_size} with microcode size {microcode_size} does not fit 32-bit words")]
    TooLarge {
        /// Requested memory size.
        memory_size: usize,
        /// Requested microcode size.
        microcode_size: usize,
    },
    /// Settings file could not be read.
    #[error("could not read settings: {0}")]
    Io(#[from] std::io::Error),
    /// Settings document is not valid.
    #[error("could not parse settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// The sizes of a machine.
///
/// A word packs two fields: `opcode = word / operand_modulus` and
/// `operand = word % operand_modulus`, where the operand modulus is the memory size
/// (so an operand can address every memory cell).
///
/// ```
/// use vn_ensemble::config::Geometry;
///
/// let geo = Geometry::default();
/// assert_eq!(geo.max_value(), 19999);
/// assert_eq!(geo.opcode(9006), 9);
/// assert_eq!(geo.operand(9006), 6);
/// assert_eq!(geo.pack(9, 6), 9006);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "RawGeometry", into = "RawGeometry")]
pub struct Geometry {
    memory_size: usize,
    microcode_size: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(default)]
struct RawGeometry {
    memory_size: usize,
    microcode_size: usize,
}
impl Default for RawGeometry {
    fn default() -> Self {
        let Geometry { memory_size, microcode_size } = Geometry::default();
        Self { memory_size, microcode_size }
    }
}
impl TryFrom<RawGeometry> for Geometry {
    type Error = ConfigErr;

    fn try_from(raw: RawGeometry) -> Result<Self, Self::Error> {
        Geometry::new(raw.memory_size, raw.microcode_size)
    }
}
impl From<Geometry> for RawGeometry {
    fn from(geo: Geometry) -> Self {
        Self { memory_size: geo.memory_size, microcode_size: geo.microcode_size }
    }
}

impl Geometry {
    /// Default number of memory words.
    pub const DEFAULT_MEMORY_SIZE: usize = 1000;
    /// Default number of microcode slots.
    pub const DEFAULT_MICROCODE_SIZE: usize = 200;

    /// Creates a geometry, validating the sizes.
    pub fn new(memory_size: usize, microcode_size: usize) -> Result<Self, ConfigErr> {
        if memory_size == 0 {
            return Err(ConfigErr::EmptyMemory);
        }
        if microcode_size == 0 || microcode_size % BLOCK_LEN != 0 {
            return Err(ConfigErr::MicrocodeSize(microcode_size));
        }
        // max_value and operand_modulus are u32
        let max_value = microcode_size.checked_mul(100).map(|n| n - 1);
        let fits = |n: usize| u32::try_from(n).is_ok();
        if !max_value.is_some_and(fits) || !fits(memory_size) {
            return Err(ConfigErr::TooLarge { memory_size, microcode_size });
        }
        Ok(Self { memory_size, microcode_size })
    }

    /// Number of words in memory.
    pub fn memory_size(&self) -> usize {
        self.memory_size
    }
    /// Number of slots in the microcode program.
    pub fn microcode_size(&self) -> usize {
        self.microcode_size
    }
    /// Number of macro instructions (10-slot microcode blocks).
    pub fn block_count(&self) -> usize {
        self.microcode_size / BLOCK_LEN
    }
    /// The largest value a word can hold, `microcode_size * 100 - 1`.
    pub fn max_value(&self) -> u32 {
        (self.microcode_size * 100 - 1) as u32
    }
    /// The divisor separating opcode and operand fields.
    pub fn operand_modulus(&self) -> u32 {
        self.memory_size as u32
    }

    /// Extracts the opcode field of a word.
    pub fn opcode(&self, word: u32) -> u32 {
        word / self.operand_modulus()
    }
    /// Extracts the operand field of a word.
    pub fn operand(&self, word: u32) -> u32 {
        word % self.operand_modulus()
    }
    /// Packs an opcode and operand back into a word.
    pub fn pack(&self, opcode: u32, operand: u32) -> u32 {
        opcode * self.operand_modulus() + operand
    }
}
impl Default for Geometry {
    fn default() -> Self {
        Self {
            memory_size: Self::DEFAULT_MEMORY_SIZE,
            microcode_size: Self::DEFAULT_MICROCODE_SIZE,
        }
    }
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created
/// and their effects should still apply.
///
/// [`Simulator`]: crate::sim::Simulator
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SimFlags {
    /// Whether inserting or deleting a memory row also adjusts operands
    /// which point past the edited row.
    ///
    /// The adjustment cannot tell instruction words apart from data words
    /// that happen to look like instructions, so it is opt-in.
    ///
    /// By default, this flag is `false`.
    pub fix_operands: bool,

    /// Delay between macro steps in [`Simulator::run`], in milliseconds.
    ///
    /// By default, this is `500`.
    ///
    /// [`Simulator::run`]: crate::sim::Simulator::run
    pub run_delay_ms: u64,
}
impl SimFlags {
    /// The run delay as a [`Duration`].
    pub fn run_delay(&self) -> Duration {
        Duration::from_millis(self.run_delay_ms)
    }
}
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            fix_operands: false,
            run_delay_ms: 500,
        }
    }
}

/// A full settings document.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Machine sizes. These only take effect when a machine is created.
    pub geometry: Geometry,
    /// Runtime flags.
    pub flags: SimFlags,
}
impl Settings {
    /// Parses settings from JSON. Missing fields take their defaults.
    pub fn from_json(src: &str) -> Result<Self, ConfigErr> {
        Ok(serde_json::from_str(src)?)
    }
    /// Reads settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigErr> {
        let src = std::fs::read_to_string(path)?;
        Self::from_json(&src)
    }
    /// Serializes the settings to pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigErr> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{ConfigErr, Geometry, Settings};

    #[test]
    fn test_geometry_validation() {
        assert!(matches!(Geometry::new(0, 200), Err(ConfigErr::EmptyMemory)));
        assert!(matches!(Geometry::new(1000, 0), Err(ConfigErr::MicrocodeSize(0))));
        assert!(matches!(Geometry::new(1000, 205), Err(ConfigErr::MicrocodeSize(205))));

        let geo = Geometry::new(100, 50).unwrap();
        assert_eq!(geo.block_count(), 5);
        assert_eq!(geo.max_value(), 4999);
    }

    #[test]
    fn test_geometry_word_limit() {
        let geo = Geometry::new(1000, 42_949_670).unwrap();
        assert_eq!(geo.max_value(), 4_294_966_999);

        assert!(matches!(
            Geometry::new(1000, 50_000_000),
            Err(ConfigErr::TooLarge { memory_size: 1000, microcode_size: 50_000_000 })
        ));
        assert!(matches!(Geometry::new(1000, usize::MAX - 5), Err(ConfigErr::TooLarge { .. })));
        assert!(matches!(Settings::from_json(r#"{ "geometry": { "microcode_size": 50000000 } }"#), Err(_)));
    }

    #[test]
    fn test_settings_partial() {
        let settings = Settings::from_json(r#"{ "geometry": { "memory_size": 64 } }"#).unwrap();
        assert_eq!(settings.geometry.memory_size(), 64);
        assert_eq!(settings.geometry.microcode_size(), Geometry::DEFAULT_MICROCODE_SIZE);
        assert!(!settings.flags.fix_operands);

        assert!(Settings::from_json(r#"{ "geometry": { "microcode_size": 15 } }"#).is_err());

        let json = settings.to_json().unwrap();
        assert_eq!(Settings::from_json(&json).unwrap(), settings);
    }

    proptest! {
        #[test]
        fn word_fields_recombine(word in 0u32..=19999) {
            let geo = Geometry::default();
            prop_assert_eq!(geo.opcode(word), word / 1000);
            prop_assert_eq!(geo.operand(word), word % 1000);
            prop_assert_eq!(geo.pack(geo.opcode(word), geo.operand(word)), word);
        }
    }
}
