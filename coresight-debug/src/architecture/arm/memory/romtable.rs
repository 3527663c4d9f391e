use enum_primitive_derive::Primitive;
use num_traits::cast::FromPrimitive;

use crate::architecture::arm::ap::AccessPortError;
use crate::memory::MemoryInterface;

/// The last entry of a ROM table is at offset 0xEFC.
pub const MAX_ROM_TABLE_ENTRIES: usize = 960;

/// An error to report any errors that are romtable discovery specific.
#[derive(thiserror::Error, Debug)]
pub enum RomTableError {
    #[error("Component is not a valid romtable")]
    NotARomtable,
    #[error("An error with the access port occurred during runtime")]
    AccessPort(
        #[from]
        #[source]
        AccessPortError,
    ),
    #[error("The CoreSight Component could not be identified")]
    CSComponentIdentification,
    #[error("The requested component '{0}' was not found")]
    ComponentNotFound(String),
    #[error("Component base address {0:#010x} is not aligned to 4 KiB")]
    UnalignedComponent(u32),
}

/// A lazy romtable reader that is used to create an iterator over all romtable entries.
pub struct RomTableReader<'memory> {
    base_address: u32,
    memory: &'memory mut dyn MemoryInterface,
}

/// Iterates over a ROM table non recursively.
impl<'memory> RomTableReader<'memory> {
    pub fn new(memory: &'memory mut dyn MemoryInterface, base_address: u32) -> Self {
        RomTableReader {
            base_address,
            memory,
        }
    }

    /// Iterate over all entries of the rom table, non-recursively
    pub fn entries(&mut self) -> RomTableIterator<'memory, '_> {
        RomTableIterator::new(self)
    }
}

/// An iterator to lazily iterate over all the romtable entries in memory.
///
/// Entries with the present bit cleared are returned too, the caller decides what
/// to do with them. A read error ends the iteration after it has been returned.
pub struct RomTableIterator<'memory, 'reader> {
    rom_table_reader: &'reader mut RomTableReader<'memory>,
    index: usize,
    done: bool,
}

impl<'memory, 'reader> RomTableIterator<'memory, 'reader> {
    /// Creates a new lazy romtable iterator.
    fn new(reader: &'reader mut RomTableReader<'memory>) -> Self {
        RomTableIterator {
            rom_table_reader: reader,
            index: 0,
            done: false,
        }
    }
}

impl Iterator for RomTableIterator<'_, '_> {
    type Item = Result<RomTableEntryRaw, RomTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= MAX_ROM_TABLE_ENTRIES {
            return None;
        }

        let base_address = self.rom_table_reader.base_address;
        let entry_address = base_address + (self.index as u32) * 4;
        self.index += 1;

        tracing::trace!("Reading rom table entry at {:#010x}", entry_address);

        let raw = match self.rom_table_reader.memory.read_word_32(entry_address) {
            Ok(raw) => raw,
            Err(e) => {
                self.done = true;
                return Some(Err(RomTableError::AccessPort(e)));
            }
        };

        // End of entries is marked by an all zero entry. Very old tables
        // use all ones instead.
        if raw == 0 || raw == 0xFFFF_FFFF {
            tracing::trace!("Entry {:#010x} ends the table", raw);
            self.done = true;
            return None;
        }

        let entry = RomTableEntryRaw::new(base_address, raw);
        tracing::trace!("ROM Table Entry: {:x?}", entry);

        Some(Ok(entry))
    }
}

/// A ROM table entry with raw information parsed.
///
/// Described in section D3.4.4 of the ADIv5.2 specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomTableEntryRaw {
    raw: u32,
    /// The power domain ID of the CoreSight component behind the ROM table entry.
    pub power_domain_id: u8,
    /// The power domain is valid if this is true.
    pub power_domain_valid: bool,
    /// Reads one if the ROM table has 32bit format.
    pub format: bool,
    /// Indicates whether the ROM table behind the address offset is present.
    pub entry_present: bool,
    /// Base address of the rom table
    base_address: u32,
}

impl RomTableEntryRaw {
    /// Create a new RomTableEntryRaw from raw ROM table entry data in memory.
    pub fn new(base_address: u32, raw: u32) -> Self {
        RomTableEntryRaw {
            raw,
            power_domain_id: ((raw >> 4) & 0xf) as u8,
            power_domain_valid: (raw & 4) == 4,
            format: (raw & 2) == 2,
            entry_present: (raw & 1) == 1,
            base_address,
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    /// Returns the address of the CoreSight component behind a ROM table entry.
    ///
    /// The offset is a signed 20 bit value in the upper bits of the entry, so a
    /// wrapping add of the whole entry followed by masking gives the same result.
    pub fn component_address(&self) -> u32 {
        self.base_address.wrapping_add(self.raw) & 0xFFFF_F000
    }
}

/// Assemble a 32-bit identification register from its four byte lanes.
///
/// The identification registers (CIDR0-3, PIDR0-3, PIDR4-7) each hold one byte in
/// the low 8 bits of consecutive words. `window` is the 16 byte block holding the
/// four words, so the bytes sit at offsets 0x0, 0x4, 0x8 and 0xC.
pub fn assemble_byte_lanes(window: &[u8; 16]) -> u32 {
    u32::from_le_bytes([window[0], window[4], window[8], window[12]])
}

/// This enum describes the class of a CoreSight component.
///
/// This does not describe the exact component type which is determined via the `PeripheralId`.
///
/// Described in table D1-2 in the ADIv5.2 spec.
#[derive(Primitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentClass {
    GenericVerificationComponent = 0,
    RomTable = 1,
    CoreSightComponent = 9,
    PeripheralTestBlock = 0xB,
    GenericIPComponent = 0xE,
    CoreLinkOrPrimeCellOrSystemComponent = 0xF,
}

/// The two identity words of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComponentId {
    /// CIDR3..CIDR0.
    pub class_id: u32,
    /// PIDR7..PIDR0.
    pub peripheral_id: u64,
}

impl ComponentId {
    pub fn new(class_id: u32, peripheral_id: u64) -> Self {
        ComponentId {
            class_id,
            peripheral_id,
        }
    }

    /// Returns true if the low 12 bits of the class id hold the CoreSight preamble.
    pub fn is_coresight(&self) -> bool {
        self.class_id & 0x0000_0FFF == 0x0000_000D
    }

    /// The component class, from bits [15:12] of the class id.
    pub fn class(&self) -> Option<ComponentClass> {
        ComponentClass::from_u32((self.class_id >> 12) & 0x0F)
    }

    /// Returns true for a valid component of ROM table class.
    pub fn is_rom_table(&self) -> bool {
        self.is_coresight() && self.class() == Some(ComponentClass::RomTable)
    }

    pub fn peripheral(&self) -> PeripheralId {
        PeripheralId::from_raw(self.peripheral_id)
    }

    /// Read the identity words of the component at `base_address`.
    ///
    /// Components occupy a 4 KiB block, so the base address must be aligned to one.
    pub fn read(
        memory: &mut dyn MemoryInterface,
        base_address: u32,
    ) -> Result<ComponentId, RomTableError> {
        if base_address & 0xFFF != 0 {
            return Err(RomTableError::UnalignedComponent(base_address));
        }

        let mut window = [0u8; 16];

        memory.read(base_address + 0xFF0, &mut window)?;
        let class_id = assemble_byte_lanes(&window);

        memory.read(base_address + 0xFE0, &mut window)?;
        let low = assemble_byte_lanes(&window);

        memory.read(base_address + 0xFD0, &mut window)?;
        let high = assemble_byte_lanes(&window);

        let id = ComponentId {
            class_id,
            peripheral_id: (u64::from(high) << 32) | u64::from(low),
        };

        tracing::debug!(
            "Component at {:#010x}: CIDR {:#010x}, PIDR {:#018x}",
            base_address,
            id.class_id,
            id.peripheral_id
        );

        if id.class_id & 0xFFFF_0FFF != 0xB105_000D {
            tracing::warn!(
                "Component at {:#010x}: CIDR has invalid preamble (expected 0xb105x00d, got {:#010x})",
                base_address,
                id.class_id
            );
        }

        Ok(id)
    }
}

/// Indicates component modifications by the implementor of a CoreSight component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentModification {
    /// Indicates that no specific modification was made.
    No,
    /// Indicates that a modification was made and which one with the contained number.
    Yes(u8),
}

/// Peripheral ID information for a CoreSight component.
///
/// Described in section D1.2.2 of the ADIv5.2 spec.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralId {
    /// Indicates minor errata fixes by the component `designer`.
    REVAND: u8,
    /// Indicates component modifications by the `implementor`.
    CMOD: ComponentModification,
    /// Indicates major component revisions by the component `designer`.
    REVISION: u8,
    /// Indicates the component `designer`.
    ///
    /// `None` if it is a legacy component
    JEP106: Option<jep106::JEP106Code>,
    /// Indicates the specific component with an ID unique to this component.
    PART: u16,
    /// The SIZE is indicated as a multiple of 4k blocks the peripheral occupies.
    SIZE: u8,
}

impl PeripheralId {
    /// Extracts the peripheral ID from the assembled 64 bit value.
    pub fn from_raw(raw: u64) -> Self {
        let jep106id = ((raw >> 12) & 0x7F) as u8;
        let jep106 = jep106::JEP106Code::new(((raw >> 32) & 0x0F) as u8, jep106id);
        let uses_jep106 = raw & (1 << 19) != 0;

        PeripheralId {
            REVAND: ((raw >> 28) & 0x0F) as u8,
            CMOD: match ((raw >> 24) & 0x0F) as u8 {
                0x0 => ComponentModification::No,
                v => ComponentModification::Yes(v),
            },
            REVISION: ((raw >> 20) & 0x0F) as u8,
            JEP106: if uses_jep106 { Some(jep106) } else { None },
            PART: (raw & 0xFFF) as u16,
            SIZE: 1u8 << ((raw >> 36) & 0x07),
        }
    }

    /// Returns the JEP106 code of the peripheral ID register.
    pub fn jep106(&self) -> Option<jep106::JEP106Code> {
        self.JEP106
    }

    /// Returns the designer name, if the JEP106 code is known.
    pub fn designer(&self) -> Option<&'static str> {
        self.JEP106.and_then(|code| code.get())
    }

    /// Returns the PART of the peripheral ID register.
    pub fn part(&self) -> u16 {
        self.PART
    }

    pub fn revision(&self) -> u8 {
        self.REVISION
    }

    /// The number of 4 KiB blocks the component occupies.
    pub fn size(&self) -> u8 {
        self.SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::arm::ap::MemoryAp;
    use crate::architecture::arm::memory::ApMemory;
    use crate::probe::fake_probe::{FakeAccessPort, FakeProbe, CORTEX_M4_SCS_PID};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn reader_entries(port: FakeAccessPort, base: u32) -> Vec<RomTableEntryRaw> {
        let mut probe = FakeProbe::new();
        probe.add_access_port(port);
        let mut ap = MemoryAp::new(&mut probe, 0).unwrap();
        let mut memory = ApMemory::new(&mut probe, &mut ap);

        RomTableReader::new(&mut memory, base)
            .entries()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn byte_lanes_are_little_endian() {
        let mut window = [0xEEu8; 16];
        window[0] = 0x0D;
        window[4] = 0x10;
        window[8] = 0x05;
        window[12] = 0xB1;

        assert_eq!(assemble_byte_lanes(&window), 0xB105_100D);
    }

    #[test_case(0x0000_0000 ; "zero entry")]
    #[test_case(0xFFFF_FFFF ; "legacy not present marker")]
    fn table_ends_at_terminator(first: u32) {
        let port = FakeAccessPort::ahb3().with_rom_table(0xE00F_F000, &[first, 0xFFF0_F003]);

        assert!(reader_entries(port, 0xE00F_F000).is_empty());
    }

    #[test]
    fn not_present_entry_does_not_end_the_table() {
        let port = FakeAccessPort::ahb3().with_rom_table(0xE00F_F000, &[0xFFF0_F002, 0xFFF0_2003]);

        let entries = reader_entries(port, 0xE00F_F000);

        assert_eq!(entries.len(), 2);
        assert!(!entries[0].entry_present);
        assert!(entries[1].entry_present);
        assert_eq!(entries[1].component_address(), 0xE000_2000);
    }

    #[test]
    fn table_without_terminator_is_bounded() {
        let entries = vec![0x0000_1003; MAX_ROM_TABLE_ENTRIES + 8];
        let port = FakeAccessPort::ahb3().with_rom_table(0x2000_0000, &entries);

        assert_eq!(reader_entries(port, 0x2000_0000).len(), MAX_ROM_TABLE_ENTRIES);
    }

    #[test]
    fn negative_offsets_wrap() {
        let entry = RomTableEntryRaw::new(0xE00F_F000, 0xFFF0_F003);

        assert_eq!(entry.component_address(), 0xE000_E000);
        assert!(entry.entry_present);
        assert!(entry.format);
    }

    #[test]
    fn read_component_identity() {
        let port = FakeAccessPort::ahb3().with_component(
            0xE000_E000,
            0xB105_E00D,
            CORTEX_M4_SCS_PID,
        );
        let mut probe = FakeProbe::new();
        probe.add_access_port(port);
        let mut ap = MemoryAp::new(&mut probe, 0).unwrap();
        let mut memory = ApMemory::new(&mut probe, &mut ap);

        let id = ComponentId::read(&mut memory, 0xE000_E000).unwrap();

        assert_eq!(id, ComponentId::new(0xB105_E00D, CORTEX_M4_SCS_PID));
        assert!(id.is_coresight());
        assert!(!id.is_rom_table());
        assert_eq!(id.class(), Some(ComponentClass::GenericIPComponent));

        let pid = id.peripheral();
        assert_eq!(pid.part(), 0x00C);
        assert_eq!(pid.jep106(), Some(jep106::JEP106Code::new(4, 0x3B)));
        assert_eq!(pid.size(), 1);
    }
}
