//! Memory mapped component registers.
//!
//! Registers that the crate itself drives (DHCSR, AIRCR, ...) are typed structs
//! implementing [`MemoryMappedRegister`]. Everything else is described by a
//! [`RegisterMap`], a table of register and field descriptors that
//! [`RegisterBlock`] interprets at runtime.

use crate::architecture::arm::ap::AccessPortError;
use crate::memory::MemoryInterface;

/// A memory mapped register, for instance ARM debug registers (DHCSR, etc).
pub trait MemoryMappedRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The offset of the register from the base address of its component.
    const OFFSET: u32;
    /// The register's name.
    const NAME: &'static str;

    /// The address of the register in a component located at `base`.
    fn address(base: u32) -> u32 {
        base + Self::OFFSET
    }
}

/// A bit field inside a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    /// Position of the least significant bit.
    pub lsb: u8,
    /// Width in bits, 1 to 32.
    pub width: u8,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, lsb: u8, width: u8) -> Self {
        FieldDescriptor { name, lsb, width }
    }

    /// The unshifted mask of the field.
    pub fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    pub fn extract(&self, register: u32) -> u32 {
        (register >> self.lsb) & self.mask()
    }

    /// Replace the field inside `register` with `value`.
    pub fn insert(&self, register: u32, value: u32) -> u32 {
        let mask = self.mask() << self.lsb;
        (register & !mask) | ((value << self.lsb) & mask)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    /// Offset from the component base address.
    pub offset: u32,
    pub fields: &'static [FieldDescriptor],
}

impl RegisterDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// The register file of one kind of component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    pub name: &'static str,
    pub registers: &'static [RegisterDescriptor],
}

impl RegisterMap {
    pub fn register(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.registers.iter().find(|register| register.name == name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("{map} has no register named {name}")]
    UnknownRegister { map: &'static str, name: String },
    #[error("Register {register} has no field named {field}")]
    UnknownField { register: &'static str, field: String },
    #[error("Value {value:#x} does not fit into the {width} bit field {field}")]
    ValueTooWide {
        field: &'static str,
        value: u32,
        width: u8,
    },
    #[error("Error accessing the register")]
    Memory(#[from] AccessPortError),
}

/// A [`RegisterMap`] bound to a component instance.
#[derive(Debug)]
pub struct RegisterBlock<M> {
    memory: M,
    map: &'static RegisterMap,
    base_address: u32,
}

impl<M: MemoryInterface> RegisterBlock<M> {
    pub fn new(
        memory: M,
        map: &'static RegisterMap,
        base_address: u32,
    ) -> Self {
        RegisterBlock {
            memory,
            map,
            base_address,
        }
    }

    pub fn map(&self) -> &'static RegisterMap {
        self.map
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Give back the memory interface.
    pub fn into_inner(self) -> M {
        self.memory
    }

    fn descriptor(&self, name: &str) -> Result<&'static RegisterDescriptor, RegisterError> {
        let map = self.map;
        map.register(name)
            .ok_or_else(|| RegisterError::UnknownRegister {
                map: map.name,
                name: name.to_string(),
            })
    }

    fn field(
        register: &'static RegisterDescriptor,
        name: &str,
    ) -> Result<&'static FieldDescriptor, RegisterError> {
        register
            .field(name)
            .ok_or_else(|| RegisterError::UnknownField {
                register: register.name,
                field: name.to_string(),
            })
    }

    pub fn read(&mut self, register: &str) -> Result<u32, RegisterError> {
        let descriptor = self.descriptor(register)?;
        let value = self
            .memory
            .read_word_32(self.base_address + descriptor.offset)?;

        tracing::trace!("{}.{} = {:#010x}", self.map.name, descriptor.name, value);

        Ok(value)
    }

    pub fn write(&mut self, register: &str, value: u32) -> Result<(), RegisterError> {
        let descriptor = self.descriptor(register)?;

        tracing::trace!("{}.{} <- {:#010x}", self.map.name, descriptor.name, value);

        self.memory
            .write_word_32(self.base_address + descriptor.offset, value)?;

        Ok(())
    }

    pub fn read_field(&mut self, register: &str, field: &str) -> Result<u32, RegisterError> {
        let descriptor = self.descriptor(register)?;
        let field = Self::field(descriptor, field)?;

        Ok(field.extract(self.read(register)?))
    }

    /// Read-modify-write a single field.
    pub fn write_field(
        &mut self,
        register: &str,
        field: &str,
        value: u32,
    ) -> Result<(), RegisterError> {
        let descriptor = self.descriptor(register)?;
        let field = Self::field(descriptor, field)?;

        if value & !field.mask() != 0 {
            return Err(RegisterError::ValueTooWide {
                field: field.name,
                value,
                width: field.width,
            });
        }

        let current = self.read(register)?;
        self.write(register, field.insert(current, value))
    }
}

macro_rules! reg {
    ($name:literal, $offset:literal, $fields:expr $(,)?) => {
        RegisterDescriptor {
            name: $name,
            offset: $offset,
            fields: $fields,
        }
    };
}

macro_rules! field {
    ($name:literal, $lsb:literal, $width:literal) => {
        FieldDescriptor {
            name: $name,
            lsb: $lsb,
            width: $width,
        }
    };
}

/// System control block, relative to the SCS base (0xE000_E000).
pub static SCB_REGISTERS: RegisterMap = RegisterMap {
    name: "SCB",
    registers: &[
        reg!(
            "CPUID",
            0xD00,
            &[
                field!("REVISION", 0, 4),
                field!("PARTNO", 4, 12),
                field!("ARCHITECTURE", 16, 4),
                field!("VARIANT", 20, 4),
                field!("IMPLEMENTER", 24, 8),
            ],
        ),
        reg!(
            "ICSR",
            0xD04,
            &[
                field!("VECTACTIVE", 0, 9),
                field!("VECTPENDING", 12, 9),
                field!("ISRPENDING", 22, 1),
                field!("PENDSTCLR", 25, 1),
                field!("PENDSTSET", 26, 1),
                field!("PENDSVCLR", 27, 1),
                field!("PENDSVSET", 28, 1),
                field!("NMIPENDSET", 31, 1),
            ],
        ),
        reg!("VTOR", 0xD08, &[field!("TBLOFF", 7, 25)]),
        reg!(
            "AIRCR",
            0xD0C,
            &[
                field!("VECTRESET", 0, 1),
                field!("VECTCLRACTIVE", 1, 1),
                field!("SYSRESETREQ", 2, 1),
                field!("PRIGROUP", 8, 3),
                field!("ENDIANNESS", 15, 1),
                field!("VECTKEY", 16, 16),
            ],
        ),
        reg!(
            "SCR",
            0xD10,
            &[
                field!("SLEEPONEXIT", 1, 1),
                field!("SLEEPDEEP", 2, 1),
                field!("SEVONPEND", 4, 1),
            ],
        ),
        reg!(
            "CCR",
            0xD14,
            &[
                field!("NONBASETHRDENA", 0, 1),
                field!("USERSETMPEND", 1, 1),
                field!("UNALIGN_TRP", 3, 1),
                field!("DIV_0_TRP", 4, 1),
                field!("BFHFNMIGN", 8, 1),
                field!("STKALIGN", 9, 1),
            ],
        ),
        reg!(
            "CFSR",
            0xD28,
            &[
                field!("MMFSR", 0, 8),
                field!("BFSR", 8, 8),
                field!("UFSR", 16, 16),
            ],
        ),
        reg!(
            "HFSR",
            0xD2C,
            &[
                field!("VECTTBL", 1, 1),
                field!("FORCED", 30, 1),
                field!("DEBUGEVT", 31, 1),
            ],
        ),
        reg!(
            "DFSR",
            0xD30,
            &[
                field!("HALTED", 0, 1),
                field!("BKPT", 1, 1),
                field!("DWTTRAP", 2, 1),
                field!("VCATCH", 3, 1),
                field!("EXTERNAL", 4, 1),
            ],
        ),
        reg!("MMFAR", 0xD34, &[]),
        reg!("BFAR", 0xD38, &[]),
        reg!(
            "DHCSR",
            0xDF0,
            &[
                field!("C_DEBUGEN", 0, 1),
                field!("C_HALT", 1, 1),
                field!("C_STEP", 2, 1),
                field!("C_MASKINTS", 3, 1),
                field!("S_REGRDY", 16, 1),
                field!("S_HALT", 17, 1),
                field!("S_SLEEP", 18, 1),
                field!("S_LOCKUP", 19, 1),
                field!("S_RETIRE_ST", 24, 1),
                field!("S_RESET_ST", 25, 1),
            ],
        ),
        reg!(
            "DCRSR",
            0xDF4,
            &[field!("REGSEL", 0, 7), field!("REGWNR", 16, 1)],
        ),
        reg!("DCRDR", 0xDF8, &[]),
        reg!(
            "DEMCR",
            0xDFC,
            &[
                field!("VC_CORERESET", 0, 1),
                field!("VC_MMERR", 4, 1),
                field!("VC_NOCPERR", 5, 1),
                field!("VC_CHKERR", 6, 1),
                field!("VC_STATERR", 7, 1),
                field!("VC_BUSERR", 8, 1),
                field!("VC_INTERR", 9, 1),
                field!("VC_HARDERR", 10, 1),
                field!("MON_EN", 16, 1),
                field!("MON_PEND", 17, 1),
                field!("MON_STEP", 18, 1),
                field!("MON_REQ", 19, 1),
                field!("TRCENA", 24, 1),
            ],
        ),
    ],
};

/// Data watchpoint and trace unit.
pub static DWT_REGISTERS: RegisterMap = RegisterMap {
    name: "DWT",
    registers: &[
        reg!(
            "CTRL",
            0x000,
            &[
                field!("CYCCNTENA", 0, 1),
                field!("POSTPRESET", 1, 4),
                field!("POSTINIT", 5, 4),
                field!("CYCTAP", 9, 1),
                field!("SYNCTAP", 10, 2),
                field!("PCSAMPLENA", 12, 1),
                field!("EXCTRCENA", 16, 1),
                field!("CPIEVTENA", 17, 1),
                field!("EXCEVTENA", 18, 1),
                field!("SLEEPEVTENA", 19, 1),
                field!("LSUEVTENA", 20, 1),
                field!("FOLDEVTENA", 21, 1),
                field!("CYCEVTENA", 22, 1),
                field!("NUMCOMP", 28, 4),
            ],
        ),
        reg!("CYCCNT", 0x004, &[]),
        reg!("CPICNT", 0x008, &[field!("CPICNT", 0, 8)]),
        reg!("EXCCNT", 0x00C, &[field!("EXCCNT", 0, 8)]),
        reg!("SLEEPCNT", 0x010, &[field!("SLEEPCNT", 0, 8)]),
        reg!("LSUCNT", 0x014, &[field!("LSUCNT", 0, 8)]),
        reg!("FOLDCNT", 0x018, &[field!("FOLDCNT", 0, 8)]),
        reg!("PCSR", 0x01C, &[]),
        reg!("COMP0", 0x020, &[]),
        reg!("MASK0", 0x024, &[field!("MASK", 0, 5)]),
        reg!(
            "FUNCTION0",
            0x028,
            &[
                field!("FUNCTION", 0, 4),
                field!("EMITRANGE", 5, 1),
                field!("DATAVMATCH", 8, 1),
                field!("MATCHED", 24, 1),
            ],
        ),
        reg!("COMP1", 0x030, &[]),
        reg!("MASK1", 0x034, &[field!("MASK", 0, 5)]),
        reg!(
            "FUNCTION1",
            0x038,
            &[
                field!("FUNCTION", 0, 4),
                field!("EMITRANGE", 5, 1),
                field!("DATAVMATCH", 8, 1),
                field!("MATCHED", 24, 1),
            ],
        ),
    ],
};

/// Flash patch and breakpoint unit.
pub static FPB_REGISTERS: RegisterMap = RegisterMap {
    name: "FPB",
    registers: &[
        reg!(
            "FP_CTRL",
            0x000,
            &[
                field!("ENABLE", 0, 1),
                field!("KEY", 1, 1),
                field!("NUM_CODE_LO", 4, 4),
                field!("NUM_LIT", 8, 4),
                field!("NUM_CODE_HI", 12, 3),
                field!("REV", 28, 4),
            ],
        ),
        reg!("FP_REMAP", 0x004, &[field!("REMAP", 5, 24), field!("RMPSPT", 29, 1)]),
        reg!(
            "FP_COMP0",
            0x008,
            &[
                field!("ENABLE", 0, 1),
                field!("COMP", 2, 27),
                field!("REPLACE", 30, 2),
            ],
        ),
        reg!(
            "FP_COMP1",
            0x00C,
            &[
                field!("ENABLE", 0, 1),
                field!("COMP", 2, 27),
                field!("REPLACE", 30, 2),
            ],
        ),
    ],
};

/// Instrumentation trace macrocell.
pub static ITM_REGISTERS: RegisterMap = RegisterMap {
    name: "ITM",
    registers: &[
        reg!("STIM0", 0x000, &[]),
        reg!("TER", 0xE00, &[]),
        reg!("TPR", 0xE40, &[field!("PRIVMASK", 0, 4)]),
        reg!(
            "TCR",
            0xE80,
            &[
                field!("ITMENA", 0, 1),
                field!("TSENA", 1, 1),
                field!("SYNCENA", 2, 1),
                field!("TXENA", 3, 1),
                field!("SWOENA", 4, 1),
                field!("TSPRESCALE", 8, 2),
                field!("GTSFREQ", 10, 2),
                field!("TRACEBUSID", 16, 7),
                field!("BUSY", 23, 1),
            ],
        ),
        reg!("LAR", 0xFB0, &[]),
        reg!(
            "LSR",
            0xFB4,
            &[
                field!("SLI", 0, 1),
                field!("SLK", 1, 1),
                field!("BYTEACC", 2, 1),
            ],
        ),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::arm::ap::MemoryAp;
    use crate::architecture::arm::memory::ApMemory;
    use crate::probe::fake_probe::{FakeAccessPort, FakeProbe};
    use pretty_assertions::assert_eq;

    const DWT_BASE: u32 = 0xE000_1000;

    #[test]
    fn field_insert_and_extract() {
        let numcomp = DWT_REGISTERS.register("CTRL").unwrap().field("NUMCOMP").unwrap();

        assert_eq!(numcomp.extract(0x4000_0001), 4);
        assert_eq!(numcomp.insert(0x4000_0001, 2), 0x2000_0001);
        assert_eq!(FieldDescriptor::new("ALL", 0, 32).mask(), u32::MAX);
    }

    #[test]
    fn register_block_reads_and_writes_fields() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::ahb3().with_word(DWT_BASE, 0x4000_0000));
        let mut ap = MemoryAp::new(&mut probe, 0).unwrap();
        let memory = ApMemory::new(&mut probe, &mut ap);

        let mut dwt = RegisterBlock::new(memory, &DWT_REGISTERS, DWT_BASE);
        assert_eq!(dwt.read_field("CTRL", "NUMCOMP").unwrap(), 4);

        dwt.write_field("CTRL", "CYCCNTENA", 1).unwrap();
        dwt.write("CYCCNT", 1234).unwrap();

        assert_eq!(dwt.read("CTRL").unwrap(), 0x4000_0001);
        assert_eq!(dwt.read("CYCCNT").unwrap(), 1234);
    }

    #[test]
    fn register_block_rejects_unknown_names() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::ahb3());
        let mut ap = MemoryAp::new(&mut probe, 0).unwrap();
        let memory = ApMemory::new(&mut probe, &mut ap);
        let mut itm = RegisterBlock::new(memory, &ITM_REGISTERS, 0xE000_0000);

        assert!(matches!(
            itm.read("NOPE"),
            Err(RegisterError::UnknownRegister { map: "ITM", .. })
        ));
        assert!(matches!(
            itm.read_field("TCR", "NOPE"),
            Err(RegisterError::UnknownField { register: "TCR", .. })
        ));
        assert!(matches!(
            itm.write_field("TPR", "PRIVMASK", 0x10),
            Err(RegisterError::ValueTooWide { width: 4, .. })
        ));
    }
}
