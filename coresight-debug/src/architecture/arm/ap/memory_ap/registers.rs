use crate::architecture::arm::ap::RegisterParseError;

/// The unit of data that is transferred in one transfer via the DRW commands.
///
/// This can be configured with the CSW command.
///
/// All MEM-APs support `U32`. `U8` and `U16` are optional and are detected when
/// the port is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSize {
    /// 1 byte transfers.
    U8 = 0b000,
    /// 2 byte transfers.
    U16 = 0b001,
    /// 4 byte transfers.
    #[default]
    U32 = 0b010,
}

impl DataSize {
    /// Number of bytes moved by one DRW access of this size.
    pub fn to_byte_count(self) -> u32 {
        match self {
            DataSize::U8 => 1,
            DataSize::U16 => 2,
            DataSize::U32 => 4,
        }
    }

    /// Decode the CSW.SIZE field. Larger transfer sizes are not used by this crate.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0b000 => Some(DataSize::U8),
            0b001 => Some(DataSize::U16),
            0b010 => Some(DataSize::U32),
            _ => None,
        }
    }
}

/// The increment to the TAR that is performed after each DRW read or write.
///
/// This can be used to avoid successive TAR transfers for writes of consecutive addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressIncrement {
    /// No increments are happening after the DRW access. TAR always stays the same.
    Off = 0b00,
    /// Increments the TAR by the size of the access after each DRW access.
    #[default]
    Single = 0b01,
    /// Enables packed access to the DRW.
    Packed = 0b10,
}

impl AddressIncrement {
    /// Create a new `AddressIncrement` from a u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0b00 => Some(AddressIncrement::Off),
            0b01 => Some(AddressIncrement::Single),
            0b10 => Some(AddressIncrement::Packed),
            _ => None,
        }
    }
}

/// The format of the BASE register.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum BaseAddrFormat {
    /// The legacy format of very old cores.
    #[default]
    Legacy = 0,
    /// The format all newer MCUs use.
    ADIv5 = 1,
}

define_ap_register!(
    /// Control and Status Word register
    ///
    /// The control and status word register (CSW) is used
    /// to configure memory access through the memory AP.
    name: CSW,
    address: 0x00,
    fields: [
        /// Is debug software access enabled.
        DbgSwEnable: bool,
        /// Bus access protection, implementation defined.
        Prot: u8,
        /// Secure debug enabled.
        SPIDEN: bool,
        #[doc(hidden)]
        _RES0: u8,
        /// Memory tagging type, implementation defined.
        Type: u8,
        /// Mode of operation. Is set to `0b0000` normally.
        Mode: u8,
        /// A transfer is in progress.
        TrInProg: bool,
        /// `1` if transactions can be issued through this access port at the moment.
        DeviceEn: bool,
        /// The address increment on DRW access.
        AddrInc: AddressIncrement,
        #[doc(hidden)]
        _RES1: u8,
        /// The access size of this memory AP.
        SIZE: DataSize,
    ],
    from: value => Ok(CSW {
        DbgSwEnable: ((value >> 31) & 0x01) != 0,
        Prot: ((value >> 24) & 0x7F) as u8,
        SPIDEN: ((value >> 23) & 0x01) != 0,
        _RES0: ((value >> 16) & 0x7F) as u8,
        Type: ((value >> 12) & 0x0F) as u8,
        Mode: ((value >> 8) & 0x0F) as u8,
        TrInProg: ((value >> 7) & 0x01) != 0,
        DeviceEn: ((value >> 6) & 0x01) != 0,
        AddrInc: AddressIncrement::from_u8(((value >> 4) & 0x03) as u8)
            .ok_or_else(|| RegisterParseError::new("CSW", value))?,
        _RES1: ((value >> 3) & 1) as u8,
        SIZE: DataSize::from_u8((value & 0x07) as u8)
            .ok_or_else(|| RegisterParseError::new("CSW", value))?,
    }),
    to: value => (u32::from(value.DbgSwEnable) << 31)
        | (u32::from(value.Prot) << 24)
        | (u32::from(value.SPIDEN) << 23)
        | (u32::from(value._RES0) << 16)
        | (u32::from(value.Type) << 12)
        | (u32::from(value.Mode) << 8)
        | (u32::from(value.TrInProg) << 7)
        | (u32::from(value.DeviceEn) << 6)
        | (u32::from(value.AddrInc as u8) << 4)
        | (u32::from(value._RES1) << 3)
        | (value.SIZE as u32)
);

impl CSW {
    /// The control word used for transfers of `size`, derived from the
    /// hardware reset value of the register.
    ///
    /// Only the address increment and the transfer size are changed, every
    /// other field keeps its reset value.
    pub fn for_transfer(self, size: DataSize) -> CSW {
        CSW {
            AddrInc: AddressIncrement::Single,
            SIZE: size,
            // Status bits are read-only.
            TrInProg: false,
            ..self
        }
    }
}

define_ap_register!(
    /// Transfer Address Register
    ///
    /// The transfer address register (TAR) holds the memory
    /// address which will be accessed through a read or
    /// write of the DRW register.
    name: TAR,
    address: 0x04,
    fields: [
        /// The register address to be used for the next access to DRW.
        address: u32,
    ],
    from: value => Ok(TAR { address: value }),
    to: value => value.address
);

define_ap_register!(
    /// Data Read/Write register
    ///
    /// The data read/write register (DRW) can be used to read
    /// or write from the memory attached to the memory access point.
    ///
    /// A write to the *DRW* register is translated to a memory write
    /// to the address specified in the TAR register.
    ///
    /// A read from the *DRW* register is translated to a memory read
    name: DRW,
    address: 0x0C,
    fields: [
        /// The data held in the DRW corresponding to the address held in TAR.
        data: u32,
    ],
    from: value => Ok(DRW { data: value }),
    to: value => value.data
);

define_ap_register!(
    /// Configuration register
    ///
    /// The configuration register (CFG) is used to determine
    /// which extensions are included in the memory AP.
    name: CFG,
    address: 0xF4,
    fields: [
        /// Specifies whether this access port includes the large data extension (access larger than 32 bits).
        LD: bool,
        /// Specifies whether this access port includes the large address extension (64 bit addressing).
        LA: bool,
        /// Specifies whether this architecture uses big endian. Must always be zero for modern chips as the ADI v5.2 deprecates big endian.
        BE: bool,
    ],
    from: value => Ok(CFG {
        LD: ((value >> 2) & 0x01) != 0,
        LA: ((value >> 1) & 0x01) != 0,
        BE: (value & 0x01) != 0,
    }),
    to: value => (u32::from(value.LD) << 2) | (u32::from(value.LA) << 1) | u32::from(value.BE)
);

define_ap_register!(
    /// Base register
    ///
    /// Points at the first debug component (usually a ROM table) reachable
    /// through this port.
    name: BASE,
    address: 0xF8,
    fields: [
        /// The base address of this access point, 4 KiB aligned.
        BASEADDR: u32,
        /// The debug entry address of the ROM table, the low 12 bits of the raw register.
        ENTRY: u16,
        /// The base address format of this access point.
        Format: BaseAddrFormat,
        /// Does this access point exists?
        /// This field can be used to detect access points by iterating over all possible ones until one is found which has `exists == false`.
        present: bool,
    ],
    from: value => Ok(BASE {
        BASEADDR: value & 0xFFFF_F000,
        ENTRY: (value & 0xFFF) as u16,
        Format: match (value >> 1) & 0x01 {
            0 => BaseAddrFormat::Legacy,
            _ => BaseAddrFormat::ADIv5,
        },
        present: (value & 0x01) != 0,
    }),
    to: value => value.BASEADDR | u32::from(value.ENTRY)
);

impl BASE {
    /// Returns `true` if the register carries no usable debug base.
    ///
    /// `0xFFFF_FFFF` is the legacy marker for "no debug entries", and a
    /// register in ADIv5 format with the present bit clear means the same.
    pub fn is_absent(&self) -> bool {
        u32::from(*self) == 0xFFFF_FFFF
            || (self.Format == BaseAddrFormat::ADIv5 && !self.present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn csw_transfer_keeps_reset_policy() {
        // Typical AHB-AP reset value: HPROT bits set, 32 bit, auto increment off.
        let reset = CSW::try_from(0x2300_0042).unwrap();
        assert_eq!(reset.AddrInc, AddressIncrement::Off);

        let csw = reset.for_transfer(DataSize::U8);
        assert_eq!(u32::from(csw), 0x2300_0050);
    }

    #[test]
    fn base_register_splits_entry_bits() {
        let base = BASE::try_from(0xE00F_F003).unwrap();

        assert_eq!(base.BASEADDR, 0xE00F_F000);
        assert_eq!(base.ENTRY, 0x003);
        assert_eq!(base.Format, BaseAddrFormat::ADIv5);
        assert!(base.present);
        assert!(!base.is_absent());
        assert_eq!(u32::from(base), 0xE00F_F003);
    }

    #[test]
    fn legacy_not_present_base() {
        let base = BASE::try_from(0xFFFF_FFFF).unwrap();
        assert!(base.is_absent());

        let base = BASE::try_from(0xE00F_F002).unwrap();
        assert!(base.is_absent());
    }
}
