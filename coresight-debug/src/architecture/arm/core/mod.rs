//! ARM Cortex-M cores.

pub mod cortex_m;

use serde::{Deserialize, Serialize};

use crate::core::registers::{
    RegisterFile, CORTEX_M_CORE_REGISTERS, CORTEX_M_WITH_FP_CORE_REGISTERS,
};

pub use cortex_m::{Aircr, CortexM, CoreError, Cpuid, Dcrdr, Dcrsr, Demcr, Dfsr, Dhcsr};

/// The Cortex-M variants that can be identified from their ROM table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreVariant {
    CortexM0,
    CortexM0Plus,
    CortexM3,
    CortexM4,
    CortexM7,
}

impl CoreVariant {
    /// Whether the variant is assumed to have a single precision FPU.
    ///
    /// The ROM table does not tell M4 and M4F apart, so M4 and M7 are
    /// always treated as having one.
    pub fn has_fpu(self) -> bool {
        matches!(self, CoreVariant::CortexM4 | CoreVariant::CortexM7)
    }

    pub fn register_file(self) -> &'static RegisterFile {
        if self.has_fpu() {
            &CORTEX_M_WITH_FP_CORE_REGISTERS
        } else {
            &CORTEX_M_CORE_REGISTERS
        }
    }

    /// The CPUID.PARTNO value of the variant.
    pub fn part_number(self) -> u16 {
        match self {
            CoreVariant::CortexM0 => 0xC20,
            CoreVariant::CortexM0Plus => 0xC60,
            CoreVariant::CortexM3 => 0xC23,
            CoreVariant::CortexM4 => 0xC24,
            CoreVariant::CortexM7 => 0xC27,
        }
    }
}

impl std::fmt::Display for CoreVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CoreVariant::CortexM0 => "Cortex-M0",
            CoreVariant::CortexM0Plus => "Cortex-M0+",
            CoreVariant::CortexM3 => "Cortex-M3",
            CoreVariant::CortexM4 => "Cortex-M4",
            CoreVariant::CortexM7 => "Cortex-M7",
        };
        f.write_str(name)
    }
}
