//! The micro-instruction set.
//!
//! Every micro-step the control unit can execute is a [`MicroOp`].
//! The numeric id of each op is what the microcode program stores.
//!
//! | id | op                   | effect                              | advances MC |
//! |----|----------------------|-------------------------------------|-------------|
//! | 0  | [`MicroOp::Nop`]           | nothing (placeholder)       | no  |
//! | 1  | [`MicroOp::StoreMem`]      | `M[AB] := DB`               | yes |
//! | 2  | [`MicroOp::LoadMem`]       | `DB := M[AB]`               | yes |
//! | 3  | [`MicroOp::DataToIr`]      | `IR := DB`                  | yes |
//! | 4  | [`MicroOp::OperandToAddr`] | `AB := operand(IR)`         | yes |
//! | 5  | [`MicroOp::Decode`]        | `MC := opcode(IR) * 10`     | no  |
//! | 6  | [`MicroOp::Reserved`]      | never executed              | no  |
//! | 7  | [`MicroOp::ResetMc`]       | `MC := 0`                   | no  |
//! | 8  | [`MicroOp::PcToAddr`]      | `AB := PC`                  | yes |
//! | 9  | [`MicroOp::IncPc`]         | `PC := PC + 1`              | yes |
//! | 10 | [`MicroOp::SkipIfZero`]    | `if ACC == 0: PC := PC + 1` | yes |
//! | 11 | [`MicroOp::OperandToPc`]   | `PC := operand(IR)`         | yes |
//! | 12 | [`MicroOp::ClearAcc`]      | `ACC := 0`                  | yes |
//! | 13 | [`MicroOp::AddData`]       | `ACC := ACC + DB`           | yes |
//! | 14 | [`MicroOp::SubData`]       | `ACC := ACC - DB`           | yes |
//! | 15 | [`MicroOp::AccToData`]     | `DB := ACC`                 | yes |
//! | 16 | [`MicroOp::IncAcc`]        | `ACC := ACC + 1`            | yes |
//! | 17 | [`MicroOp::DecAcc`]        | `ACC := ACC - 1`            | yes |
//! | 18 | [`MicroOp::DataToAcc`]     | `ACC := DB`                 | yes |
//! | 19 | [`MicroOp::Halt`]          | halt the machine            | no  |
//!
//! The effects themselves are applied by the [`Simulator`] in a single match over
//! every variant, both when stepping through microcode ([`Simulator::micro_step`])
//! and out of sequence ([`Simulator::manual_step`]).
//!
//! [`Simulator`]: super::Simulator
//! [`Simulator::micro_step`]: super::Simulator::micro_step
//! [`Simulator::manual_step`]: super::Simulator::manual_step

macro_rules! micro_ops {
    ($($(#[$m:meta])* $name:ident = $value:literal, $incr:literal, $desc:literal);+ $(;)?) => {
        /// A micro-operation.
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum MicroOp {
            $($(#[$m])* $name = $value),+
        }
        impl TryFrom<u32> for MicroOp {
            type Error = ();

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$name)),+,
                    _ => Err(())
                }
            }
        }
        impl MicroOp {
            /// Whether the microcode counter advances by one after this op executes.
            ///
            /// Ops that do not advance it either jump explicitly or stop the machine.
            pub fn advances_counter(self) -> bool {
                match self {
                    $(Self::$name => $incr),+
                }
            }

            /// A register-transfer description of the op (e.g., `AB := PC`).
            pub fn describe(self) -> &'static str {
                match self {
                    $(Self::$name => $desc),+
                }
            }
        }
    }
}
micro_ops! {
    /// Does nothing. Only valid as an empty slot, never as an active step.
    Nop = 0, false, "no-op";
    /// Writes the data bus to memory at the address bus.
    StoreMem = 1, true, "M[AB] := DB";
    /// Reads memory at the address bus into the data bus.
    LoadMem = 2, true, "DB := M[AB]";
    /// Copies the data bus into the instruction register.
    DataToIr = 3, true, "IR := DB";
    /// Copies the operand field of the instruction register into the address bus.
    OperandToAddr = 4, true, "AB := operand(IR)";
    /// Jumps the microcode counter to the block of the instruction register's opcode.
    Decode = 5, false, "MC := opcode(IR) * 10";
    /// Reserved id. Cannot be stored in microcode; executing it is a fault.
    Reserved = 6, false, "reserved";
    /// Jumps the microcode counter back to the fetch cycle.
    ResetMc = 7, false, "MC := 0";
    /// Copies the program counter into the address bus.
    PcToAddr = 8, true, "AB := PC";
    /// Increments the program counter.
    IncPc = 9, true, "PC := PC + 1";
    /// Skips the next instruction if the accumulator is zero.
    SkipIfZero = 10, true, "if ACC == 0: PC := PC + 1";
    /// Copies the operand field of the instruction register into the program counter.
    OperandToPc = 11, true, "PC := operand(IR)";
    /// Clears the accumulator.
    ClearAcc = 12, true, "ACC := 0";
    /// Adds the data bus to the accumulator (saturating).
    AddData = 13, true, "ACC := ACC + DB";
    /// Subtracts the data bus from the accumulator (saturating).
    SubData = 14, true, "ACC := ACC - DB";
    /// Copies the accumulator into the data bus.
    AccToData = 15, true, "DB := ACC";
    /// Increments the accumulator (saturating).
    IncAcc = 16, true, "ACC := ACC + 1";
    /// Decrements the accumulator (saturating).
    DecAcc = 17, true, "ACC := ACC - 1";
    /// Copies the data bus into the accumulator.
    DataToAcc = 18, true, "ACC := DB";
    /// Halts the machine.
    Halt = 19, false, "halt";
}

impl MicroOp {
    /// Whether this op may be stored in the microcode program.
    pub fn is_programmable(self) -> bool {
        self != MicroOp::Reserved
    }

    /// The numeric id of this op.
    pub fn id(self) -> u32 {
        self as u32
    }
}
impl std::fmt::Display for MicroOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>2}: {}", self.id(), self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::MicroOp;

    #[test]
    fn test_id_roundtrip() {
        for id in 0..=19 {
            let op = MicroOp::try_from(id).unwrap();
            assert_eq!(op.id(), id);
        }
        assert_eq!(MicroOp::try_from(20), Err(()));
        assert_eq!(MicroOp::try_from(u32::MAX), Err(()));
    }

    #[test]
    fn test_programmable() {
        let programmable: Vec<_> = (0..=19)
            .filter_map(|id| MicroOp::try_from(id).ok())
            .filter(|op| op.is_programmable())
            .map(MicroOp::id)
            .collect();
        let expected: Vec<_> = (0..=5).chain(7..=19).collect();
        assert_eq!(programmable, expected);
    }

    #[test]
    fn test_counter_advance() {
        let jumps = [MicroOp::Nop, MicroOp::Decode, MicroOp::Reserved, MicroOp::ResetMc, MicroOp::Halt];
        for id in 0..=19 {
            let op = MicroOp::try_from(id).unwrap();
            assert_eq!(op.advances_counter(), !jumps.contains(&op), "{op}");
        }
        assert_eq!(MicroOp::PcToAddr.to_string(), " 8: AB := PC");
    }
}
