//! Memory access port

pub mod registers;

pub use registers::{AddressIncrement, BaseAddrFormat, DataSize, BASE, CFG, CSW, DRW, TAR};

use super::{access_port_is_valid, AccessPortError, ApAccess, ApClass, IDR};
use crate::probe::DapAccess;

/// The transfer sizes a memory access port supports.
///
/// 32 bit transfers are mandatory, so they are always part of the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCapabilities {
    u8: bool,
    u16: bool,
}

impl SizeCapabilities {
    /// Only 32 bit transfers.
    pub const WORD_ONLY: SizeCapabilities = SizeCapabilities {
        u8: false,
        u16: false,
    };

    /// 8, 16 and 32 bit transfers.
    pub const ALL: SizeCapabilities = SizeCapabilities {
        u8: true,
        u16: true,
    };

    pub fn supports(&self, size: DataSize) -> bool {
        match size {
            DataSize::U8 => self.u8,
            DataSize::U16 => self.u16,
            DataSize::U32 => true,
        }
    }
}

impl Default for SizeCapabilities {
    fn default() -> Self {
        SizeCapabilities::WORD_ONLY
    }
}

/// A memory access port.
///
/// Besides the static information read at construction, the port mirrors the
/// last values written to its CSW and TAR registers, so that consecutive
/// transfers don't have to rewrite them. `None` means the hardware value is
/// unknown and the next transfer writes the register unconditionally.
#[derive(Debug, Clone)]
pub struct MemoryAp {
    port: u8,
    idr: IDR,
    base: BASE,
    cfg: CFG,
    reset_csw: CSW,
    supported_sizes: SizeCapabilities,
    pub(crate) csw_cache: Option<u32>,
    pub(crate) tar_cache: Option<u32>,
}

impl MemoryAp {
    /// Construct the memory access port with number `port`.
    ///
    /// This reads the identification register and checks that the port is
    /// a MEM-AP, then records the reset value of CSW and probes which
    /// transfer sizes are implemented.
    #[tracing::instrument(skip(probe))]
    pub fn new<P: DapAccess + ?Sized>(probe: &mut P, port: u8) -> Result<Self, AccessPortError> {
        let idr: IDR = probe.read_ap_register(port)?;

        if idr.CLASS != ApClass::MemAp {
            return Err(AccessPortError::NotAMemoryAp {
                port,
                class: idr.CLASS,
            });
        }

        let base: BASE = probe.read_ap_register(port)?;
        let cfg: CFG = probe.read_ap_register(port)?;
        let reset_csw: CSW = probe.read_ap_register(port)?;

        let supported_sizes = SizeCapabilities {
            u8: Self::probe_size(probe, port, reset_csw, DataSize::U8)?,
            u16: Self::probe_size(probe, port, reset_csw, DataSize::U16)?,
        };

        probe.write_ap_register(port, reset_csw)?;

        tracing::debug!(
            "AP {}: {:?} memory port, base {:#010x}, sizes {:?}",
            port,
            idr.TYPE,
            u32::from(base),
            supported_sizes
        );

        Ok(MemoryAp {
            port,
            idr,
            base,
            cfg,
            reset_csw,
            supported_sizes,
            csw_cache: Some(u32::from(reset_csw)),
            tar_cache: None,
        })
    }

    /// Like [`MemoryAp::new`], but an empty or unreadable slot is reported as `Ok(None)`.
    ///
    /// Only a present port with a malformed or non-memory identity is an error.
    pub fn probe<P: DapAccess + ?Sized>(
        probe: &mut P,
        port: u8,
    ) -> Result<Option<Self>, AccessPortError> {
        if access_port_is_valid(probe, port)?.is_none() {
            return Ok(None);
        }

        match Self::new(probe, port) {
            Ok(ap) => Ok(Some(ap)),
            Err(e) if e.probe_error().is_some() => {
                tracing::debug!("AP {} disappeared while probing: {}", port, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Write CSW.SIZE and check whether the port kept the value.
    fn probe_size<P: DapAccess + ?Sized>(
        probe: &mut P,
        port: u8,
        reset_csw: CSW,
        size: DataSize,
    ) -> Result<bool, AccessPortError> {
        probe.write_ap_register(port, reset_csw.for_transfer(size))?;
        let csw: CSW = probe.read_ap_register(port)?;

        Ok(csw.SIZE == size)
    }

    /// The number of this port on the debug port.
    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn idr(&self) -> IDR {
        self.idr
    }

    /// The raw BASE register value.
    pub fn base(&self) -> BASE {
        self.base
    }

    /// The 4 KiB aligned address of the first debug component, or `None` if
    /// the port has no debug entries.
    pub fn debug_base_address(&self) -> Option<u32> {
        if self.base.is_absent() {
            None
        } else {
            Some(self.base.BASEADDR)
        }
    }

    pub fn has_large_address_extension(&self) -> bool {
        self.cfg.LA
    }

    pub fn supported_sizes(&self) -> SizeCapabilities {
        self.supported_sizes
    }

    /// The CSW value that selects `size` transfers with auto increment.
    pub(crate) fn csw_for(&self, size: DataSize) -> CSW {
        self.reset_csw.for_transfer(size)
    }

    /// Forget the cached CSW and TAR values.
    pub fn invalidate_cache(&mut self) {
        self.csw_cache = None;
        self.tar_cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::arm::ap::ApType;
    use crate::architecture::arm::ap::Register;
    use crate::probe::fake_probe::{FakeAccessPort, FakeProbe};
    use crate::probe::DapError;
    use pretty_assertions::assert_eq;

    #[test]
    fn construct_ahb3_port() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::ahb3().with_base(0xE00F_F003));

        let ap = MemoryAp::new(&mut probe, 0).unwrap();

        assert_eq!(ap.idr().TYPE, ApType::AmbaAhb3);
        assert_eq!(ap.debug_base_address(), Some(0xE00F_F000));
        assert_eq!(ap.base().ENTRY, 3);
        assert_eq!(ap.supported_sizes(), SizeCapabilities::ALL);
    }

    #[test]
    fn word_only_port_is_detected() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::ahb3().with_sizes(SizeCapabilities::WORD_ONLY));

        let ap = MemoryAp::new(&mut probe, 0).unwrap();

        assert_eq!(ap.supported_sizes(), SizeCapabilities::WORD_ONLY);
        assert!(ap.supported_sizes().supports(DataSize::U32));
        // Probing must leave CSW at its reset value.
        assert_eq!(probe.access_port(0).csw(), FakeAccessPort::RESET_CSW);
    }

    #[test]
    fn com_ap_is_not_a_memory_port() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::with_idr(0x0476_2000));

        let err = MemoryAp::new(&mut probe, 0).unwrap_err();

        assert!(matches!(
            err,
            AccessPortError::NotAMemoryAp {
                port: 0,
                class: ApClass::ComAp
            }
        ));
    }

    #[test]
    fn unreadable_port_probes_as_absent() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::ahb3());
        probe.fail_ap_register(0, IDR::ADDRESS, DapError::NoAcknowledge);

        assert!(MemoryAp::probe(&mut probe, 0).unwrap().is_none());
        assert!(MemoryAp::probe(&mut probe, 7).unwrap().is_none());
    }
}
