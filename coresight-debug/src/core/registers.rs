//! Core register descriptions.
//!
//! Cortex-M cores expose their registers through DCRSR/DCRDR, addressed by a 7 bit
//! selector. The selectors used here are the `REGSEL` values from the ARMv7-M
//! architecture reference manual (C1.6.3).

use std::fmt;

/// The location of a CPU register. This is not an actual memory address, but the
/// DCRSR selector of the register.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct RegisterId(pub u16);

impl From<RegisterId> for u32 {
    fn from(value: RegisterId) -> Self {
        u32::from(value.0)
    }
}

impl From<u16> for RegisterId {
    fn from(value: u16) -> Self {
        RegisterId(value)
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The special purpose a register has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRole {
    FramePointer,
    StackPointer,
    ReturnAddress,
    ProgramCounter,
    ProcessorStatus,
    MainStackPointer,
    ProcessStackPointer,
    FloatingPointStatus,
}

/// Describes a core register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRegister {
    pub name: &'static str,
    pub id: RegisterId,
    pub role: Option<RegisterRole>,
}

impl CoreRegister {
    pub fn id(&self) -> RegisterId {
        self.id
    }
}

impl From<&CoreRegister> for RegisterId {
    fn from(register: &CoreRegister) -> RegisterId {
        register.id
    }
}

/// R0-R12, SP, LR, PC and xPSR, in selector order.
const ARM32_COMMON_REGS_SET: &[CoreRegister] = &[
    CoreRegister {
        name: "R0",
        id: RegisterId(0),
        role: None,
    },
    CoreRegister {
        name: "R1",
        id: RegisterId(1),
        role: None,
    },
    CoreRegister {
        name: "R2",
        id: RegisterId(2),
        role: None,
    },
    CoreRegister {
        name: "R3",
        id: RegisterId(3),
        role: None,
    },
    CoreRegister {
        name: "R4",
        id: RegisterId(4),
        role: None,
    },
    CoreRegister {
        name: "R5",
        id: RegisterId(5),
        role: None,
    },
    CoreRegister {
        name: "R6",
        id: RegisterId(6),
        role: None,
    },
    CoreRegister {
        name: "R7",
        id: RegisterId(7),
        role: Some(RegisterRole::FramePointer),
    },
    CoreRegister {
        name: "R8",
        id: RegisterId(8),
        role: None,
    },
    CoreRegister {
        name: "R9",
        id: RegisterId(9),
        role: None,
    },
    CoreRegister {
        name: "R10",
        id: RegisterId(10),
        role: None,
    },
    CoreRegister {
        name: "R11",
        id: RegisterId(11),
        role: None,
    },
    CoreRegister {
        name: "R12",
        id: RegisterId(12),
        role: None,
    },
    CoreRegister {
        name: "R13",
        id: RegisterId(13),
        role: Some(RegisterRole::StackPointer),
    },
    CoreRegister {
        name: "R14",
        id: RegisterId(14),
        role: Some(RegisterRole::ReturnAddress),
    },
    CoreRegister {
        name: "R15",
        id: RegisterId(15),
        role: Some(RegisterRole::ProgramCounter),
    },
    CoreRegister {
        name: "XPSR",
        id: RegisterId(16),
        role: Some(RegisterRole::ProcessorStatus),
    },
];

/// `EXTRA` packs CONTROL, FAULTMASK, BASEPRI and PRIMASK into one word.
const CORTEX_M_COMMON_REGS_SET: &[CoreRegister] = &[
    CoreRegister {
        name: "MSP",
        id: RegisterId(17),
        role: Some(RegisterRole::MainStackPointer),
    },
    CoreRegister {
        name: "PSP",
        id: RegisterId(18),
        role: Some(RegisterRole::ProcessStackPointer),
    },
    CoreRegister {
        name: "EXTRA",
        id: RegisterId(20),
        role: None,
    },
];

const CORTEX_M_WITH_FP_REGS_SET: &[CoreRegister] = &[
    CoreRegister {
        name: "FPSCR",
        id: RegisterId(33),
        role: Some(RegisterRole::FloatingPointStatus),
    },
    CoreRegister {
        name: "S0",
        id: RegisterId(64),
        role: None,
    },
    CoreRegister {
        name: "S1",
        id: RegisterId(65),
        role: None,
    },
    CoreRegister {
        name: "S2",
        id: RegisterId(66),
        role: None,
    },
    CoreRegister {
        name: "S3",
        id: RegisterId(67),
        role: None,
    },
    CoreRegister {
        name: "S4",
        id: RegisterId(68),
        role: None,
    },
    CoreRegister {
        name: "S5",
        id: RegisterId(69),
        role: None,
    },
    CoreRegister {
        name: "S6",
        id: RegisterId(70),
        role: None,
    },
    CoreRegister {
        name: "S7",
        id: RegisterId(71),
        role: None,
    },
    CoreRegister {
        name: "S8",
        id: RegisterId(72),
        role: None,
    },
    CoreRegister {
        name: "S9",
        id: RegisterId(73),
        role: None,
    },
    CoreRegister {
        name: "S10",
        id: RegisterId(74),
        role: None,
    },
    CoreRegister {
        name: "S11",
        id: RegisterId(75),
        role: None,
    },
    CoreRegister {
        name: "S12",
        id: RegisterId(76),
        role: None,
    },
    CoreRegister {
        name: "S13",
        id: RegisterId(77),
        role: None,
    },
    CoreRegister {
        name: "S14",
        id: RegisterId(78),
        role: None,
    },
    CoreRegister {
        name: "S15",
        id: RegisterId(79),
        role: None,
    },
    CoreRegister {
        name: "S16",
        id: RegisterId(80),
        role: None,
    },
    CoreRegister {
        name: "S17",
        id: RegisterId(81),
        role: None,
    },
    CoreRegister {
        name: "S18",
        id: RegisterId(82),
        role: None,
    },
    CoreRegister {
        name: "S19",
        id: RegisterId(83),
        role: None,
    },
    CoreRegister {
        name: "S20",
        id: RegisterId(84),
        role: None,
    },
    CoreRegister {
        name: "S21",
        id: RegisterId(85),
        role: None,
    },
    CoreRegister {
        name: "S22",
        id: RegisterId(86),
        role: None,
    },
    CoreRegister {
        name: "S23",
        id: RegisterId(87),
        role: None,
    },
    CoreRegister {
        name: "S24",
        id: RegisterId(88),
        role: None,
    },
    CoreRegister {
        name: "S25",
        id: RegisterId(89),
        role: None,
    },
    CoreRegister {
        name: "S26",
        id: RegisterId(90),
        role: None,
    },
    CoreRegister {
        name: "S27",
        id: RegisterId(91),
        role: None,
    },
    CoreRegister {
        name: "S28",
        id: RegisterId(92),
        role: None,
    },
    CoreRegister {
        name: "S29",
        id: RegisterId(93),
        role: None,
    },
    CoreRegister {
        name: "S30",
        id: RegisterId(94),
        role: None,
    },
    CoreRegister {
        name: "S31",
        id: RegisterId(95),
        role: None,
    },
];

/// The registers of one core variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFile {
    sets: &'static [&'static [CoreRegister]],
    has_fpu: bool,
}

/// Cortex-M0, M0+ and M3, and M4/M7 parts without floating point unit.
pub static CORTEX_M_CORE_REGISTERS: RegisterFile = RegisterFile {
    sets: &[ARM32_COMMON_REGS_SET, CORTEX_M_COMMON_REGS_SET],
    has_fpu: false,
};

/// Cortex-M4F and M7F.
pub static CORTEX_M_WITH_FP_CORE_REGISTERS: RegisterFile = RegisterFile {
    sets: &[
        ARM32_COMMON_REGS_SET,
        CORTEX_M_COMMON_REGS_SET,
        CORTEX_M_WITH_FP_REGS_SET,
    ],
    has_fpu: true,
};

impl RegisterFile {
    /// All registers, in selector order.
    pub fn registers(&self) -> impl Iterator<Item = &'static CoreRegister> {
        self.sets.iter().flat_map(|set| set.iter())
    }

    /// The 17 architectural registers R0-R12, SP, LR, PC and xPSR.
    pub fn core_registers(&self) -> &'static [CoreRegister] {
        ARM32_COMMON_REGS_SET
    }

    pub fn get(&self, id: RegisterId) -> Option<&'static CoreRegister> {
        self.registers().find(|register| register.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&'static CoreRegister> {
        self.registers()
            .find(|register| register.name.eq_ignore_ascii_case(name))
    }

    fn by_role(&self, role: RegisterRole) -> Option<&'static CoreRegister> {
        self.registers().find(|register| register.role == Some(role))
    }

    pub fn program_counter(&self) -> &'static CoreRegister {
        &ARM32_COMMON_REGS_SET[15]
    }

    pub fn stack_pointer(&self) -> &'static CoreRegister {
        &ARM32_COMMON_REGS_SET[13]
    }

    pub fn return_address(&self) -> &'static CoreRegister {
        &ARM32_COMMON_REGS_SET[14]
    }

    pub fn psr(&self) -> &'static CoreRegister {
        &ARM32_COMMON_REGS_SET[16]
    }

    pub fn msp(&self) -> Option<&'static CoreRegister> {
        self.by_role(RegisterRole::MainStackPointer)
    }

    pub fn psp(&self) -> Option<&'static CoreRegister> {
        self.by_role(RegisterRole::ProcessStackPointer)
    }

    pub fn fpscr(&self) -> Option<&'static CoreRegister> {
        self.by_role(RegisterRole::FloatingPointStatus)
    }

    /// The single precision floating point registers S0-S31, if the core has an FPU.
    pub fn fpu_registers(&self) -> Option<&'static [CoreRegister]> {
        if self.has_fpu {
            Some(&CORTEX_M_WITH_FP_REGS_SET[1..])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn core_registers_are_in_selector_order() {
        let ids: Vec<u16> = CORTEX_M_CORE_REGISTERS
            .core_registers()
            .iter()
            .map(|r| r.id.0)
            .collect();

        assert_eq!(ids, (0..=16).collect::<Vec<_>>());
        assert_eq!(CORTEX_M_CORE_REGISTERS.program_counter().name, "R15");
    }

    #[test]
    fn fpu_registers_only_with_fpu() {
        assert!(CORTEX_M_CORE_REGISTERS.fpu_registers().is_none());
        assert!(CORTEX_M_CORE_REGISTERS.get(RegisterId(33)).is_none());

        let fpu = CORTEX_M_WITH_FP_CORE_REGISTERS.fpu_registers().unwrap();
        assert_eq!(fpu.len(), 32);
        assert_eq!(fpu[0].id, RegisterId(64));
        assert_eq!(fpu[31].name, "S31");
        assert_eq!(
            CORTEX_M_WITH_FP_CORE_REGISTERS.fpscr().map(|r| r.id),
            Some(RegisterId(33))
        );
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            CORTEX_M_CORE_REGISTERS.by_name("msp").map(|r| r.id),
            Some(RegisterId(17))
        );
        assert_eq!(CORTEX_M_CORE_REGISTERS.registers().count(), 20);
        assert_eq!(CORTEX_M_WITH_FP_CORE_REGISTERS.registers().count(), 53);
    }
}
