//! Module handles change observers,
//! which report changes in machine state to a presentation layer.
//!
//! You would typically access an observer via the [`Simulator::observer`] field.
//!
//! The observer does two things:
//! - It broadcasts every [`ChangeEvent`] to all receivers created by [`ChangeObserver::subscribe`].
//!     The machine only ever sends; it never waits on or queries a receiver.
//! - It tracks which memory locations were accessed (and how) since the last clear,
//!     which can be read with [`ChangeObserver::get_mem_accesses`].
//!
//! ```
//! use vn_ensemble::sim::Simulator;
//! use vn_ensemble::sim::observer::ChangeEvent;
//!
//! let mut sim = Simulator::default();
//! let events = sim.observer.subscribe();
//!
//! sim.write_mem(4, 1005).unwrap();
//! assert_eq!(events.try_recv(), Ok(ChangeEvent::Memory { addr: 4, value: 1005 }));
//! ```
//!
//! [`Simulator::observer`]: crate::sim::Simulator::observer
use std::collections::BTreeMap;

use crossbeam_channel as cbc;

use super::mem::{Clamp, Reg};

/// The set of accesses which have occurred at this location.
///
/// ## Example
///
/// ```
/// # use vn_ensemble::sim::observer::AccessSet;
///
/// let accesses = AccessSet::READ;
/// assert!(accesses.accessed());
/// assert!(accesses.read());
/// assert!(!accesses.written());
/// assert!(!accesses.modified());
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct AccessSet(u8);
impl AccessSet {
    /// Set with only the read flag enabled.
    pub const READ: Self = Self(1 << 0);
    /// Set with only the write flag enabled.
    pub const WRITTEN: Self = Self(1 << 1);
    /// Set with only the modify flag enabled.
    pub const MODIFIED: Self = Self(1 << 2);

    /// True if any access has occurred.
    pub fn accessed(&self) -> bool {
        self.0 != 0
    }
    /// True if a read has occurred.
    pub fn read(&self) -> bool {
        self.0 & Self::READ.0 != 0
    }
    /// True if a write has occurred (does not necessarily have to change data).
    pub fn written(&self) -> bool {
        self.0 & Self::WRITTEN.0 != 0
    }
    /// True if a write has occurred (data must change).
    pub fn modified(&self) -> bool {
        self.0 & Self::MODIFIED.0 != 0
    }
}
impl std::ops::BitOr for AccessSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
impl std::ops::BitOrAssign for AccessSet {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}
impl std::fmt::Debug for AccessSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessFlags")
            .field("accessed", &self.accessed())
            .field("read", &self.read())
            .field("written", &self.written())
            .field("modified", &self.modified())
            .finish()
    }
}

/// A change to machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A register was written.
    Register {
        /// The register.
        reg: Reg,
        /// Its new value.
        value: u32,
    },
    /// A register write was out of range and was clamped.
    ///
    /// This is always followed by a matching [`ChangeEvent::Register`].
    Clamped(Clamp),
    /// A memory word was written.
    Memory {
        /// The address.
        addr: usize,
        /// The new word.
        value: u32,
    },
    /// A microcode slot was written.
    Microcode {
        /// The slot.
        addr: usize,
        /// The new micro-op id.
        value: u32,
    },
    /// A macro instruction was renamed.
    InstructionName {
        /// The opcode.
        opcode: usize,
        /// The new name.
        name: String,
    },
    /// All of memory was replaced (reset or import).
    MemoryReloaded,
    /// The whole microcode program and name table were replaced (reset or import).
    MicrocodeReloaded,
    /// The machine halted (`true`) or was reset out of halt (`false`).
    Halted(bool),
    /// A continuous run started (`true`) or stopped (`false`).
    Running(bool),
    /// Recording started at the given slot (`Some`) or stopped (`None`).
    Recording(Option<usize>),
}

/// A struct that tracks changes in machine state.
#[derive(Debug, Default)]
pub struct ChangeObserver {
    mem: BTreeMap<usize, AccessSet>,
    last_accessed: Option<usize>,
    listeners: Vec<cbc::Sender<ChangeEvent>>,
}
impl ChangeObserver {
    /// Creates a new observer with no listeners.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a new receiver of change events.
    ///
    /// Events are buffered without bound until received.
    /// Dropping the receiver unsubscribes it.
    pub fn subscribe(&mut self) -> cbc::Receiver<ChangeEvent> {
        let (tx, rx) = cbc::unbounded();
        self.listeners.push(tx);
        rx
    }

    /// Sends an event to every listener, dropping listeners that have disconnected.
    pub fn emit(&mut self, event: ChangeEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Clears all tracked accesses. Listeners are kept.
    pub fn clear(&mut self) {
        self.mem.clear();
        self.last_accessed = None;
    }

    /// Gets the access set for the given memory location.
    pub fn get_mem_accesses(&self, addr: usize) -> AccessSet {
        self.mem.get(&addr).copied().unwrap_or_default()
    }

    /// Adds new flags to the access set for the given memory location,
    /// marking it as the last accessed location.
    pub fn update_mem_accesses(&mut self, addr: usize, set: AccessSet) {
        *self.mem.entry(addr).or_default() |= set;
        self.last_accessed = Some(addr);
    }

    /// The memory location most recently read or written by a micro-op.
    pub fn last_accessed(&self) -> Option<usize> {
        self.last_accessed
    }

    /// Takes all memory accesses which have occurred since last clear,
    /// as well as clearing memory accesses.
    ///
    /// This iterator is sorted in address order.
    pub fn take_mem_accesses(&mut self) -> impl Iterator<Item=(usize, AccessSet)> {
        self.last_accessed = None;
        std::mem::take(&mut self.mem).into_iter()
    }
}
