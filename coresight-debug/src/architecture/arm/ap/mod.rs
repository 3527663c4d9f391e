//! Access port handling.

#[macro_use]
pub mod register_generation;
pub(crate) mod generic_ap;
pub(crate) mod memory_ap;

use std::fmt::Debug;

pub use generic_ap::{ApClass, ApType, IDR};
pub use memory_ap::{
    AddressIncrement, BaseAddrFormat, DataSize, MemoryAp, SizeCapabilities, BASE, CFG, CSW, DRW,
    TAR,
};

use crate::probe::{DapAccess, DebugProbeError};

/// A typed access port register.
pub trait Register: Clone + TryFrom<u32, Error = RegisterParseError> + Into<u32> + Sized + Debug {
    /// The address of the register inside the access port.
    const ADDRESS: u8;
    /// The name of the register.
    const NAME: &'static str;
}

/// The raw value of a register could not be decoded.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("Failed to parse register {name} from {value:#010x}")]
pub struct RegisterParseError {
    name: &'static str,
    value: u32,
}

impl RegisterParseError {
    pub fn new(name: &'static str, value: u32) -> Self {
        RegisterParseError { name, value }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessPortError {
    #[error("Failed to access address {address:#010x} as it is not aligned to the requirement of {alignment} bytes.")]
    MemoryNotAligned { address: u32, alignment: usize },
    #[error("Failed to read register {name} at address {address:#04x}")]
    RegisterRead {
        address: u8,
        name: &'static str,
        #[source]
        source: DebugProbeError,
    },
    #[error("Failed to write register {name} at address {address:#04x}")]
    RegisterWrite {
        address: u8,
        name: &'static str,
        #[source]
        source: DebugProbeError,
    },
    #[error("Access port {port} is a {class:?} and not a memory access port")]
    NotAMemoryAp { port: u8, class: ApClass },
    #[error("Invalid register value")]
    InvalidRegister(#[from] RegisterParseError),
    #[error("Out of bounds access")]
    OutOfBounds,
}

impl AccessPortError {
    pub fn register_read_error<R: Register>(source: DebugProbeError) -> Self {
        AccessPortError::RegisterRead {
            address: R::ADDRESS,
            name: R::NAME,
            source,
        }
    }

    pub fn register_write_error<R: Register>(source: DebugProbeError) -> Self {
        AccessPortError::RegisterWrite {
            address: R::ADDRESS,
            name: R::NAME,
            source,
        }
    }

    pub fn alignment_error(address: u32, alignment: usize) -> Self {
        AccessPortError::MemoryNotAligned { address, alignment }
    }

    /// The transport error underneath this access port error, if any.
    pub fn probe_error(&self) -> Option<&DebugProbeError> {
        match self {
            AccessPortError::RegisterRead { source, .. }
            | AccessPortError::RegisterWrite { source, .. } => Some(source),
            _ => None,
        }
    }

    /// See [`DebugProbeError::is_link_lost`].
    pub fn is_link_lost(&self) -> bool {
        self.probe_error()
            .map(DebugProbeError::is_link_lost)
            .unwrap_or(false)
    }
}

/// Typed register access on top of the raw [`DapAccess`] calls.
pub trait ApAccess {
    fn read_ap_register<R: Register>(&mut self, port: u8) -> Result<R, AccessPortError>;

    /// Read a register using a block transfer. This can be used
    /// to read multiple values from the same register.
    fn read_ap_register_repeated<R: Register>(
        &mut self,
        port: u8,
        values: &mut [u32],
    ) -> Result<(), AccessPortError>;

    fn write_ap_register<R: Register>(&mut self, port: u8, register: R)
        -> Result<(), AccessPortError>;

    /// Write a register using a block transfer. This can be used
    /// to write multiple values to the same register.
    fn write_ap_register_repeated<R: Register>(
        &mut self,
        port: u8,
        values: &[u32],
    ) -> Result<(), AccessPortError>;
}

impl<T: DapAccess + ?Sized> ApAccess for T {
    fn read_ap_register<R: Register>(&mut self, port: u8) -> Result<R, AccessPortError> {
        let raw_value = self
            .read_raw_ap_register(port, R::ADDRESS)
            .map_err(AccessPortError::register_read_error::<R>)?;

        tracing::trace!("AP {port}: read register {}, value={:#010x}", R::NAME, raw_value);

        Ok(R::try_from(raw_value)?)
    }

    fn read_ap_register_repeated<R: Register>(
        &mut self,
        port: u8,
        values: &mut [u32],
    ) -> Result<(), AccessPortError> {
        tracing::trace!(
            "AP {port}: reading register {}, block with len={} words",
            R::NAME,
            values.len(),
        );

        self.read_raw_ap_register_repeated(port, R::ADDRESS, values)
            .map_err(AccessPortError::register_read_error::<R>)
    }

    fn write_ap_register<R: Register>(
        &mut self,
        port: u8,
        register: R,
    ) -> Result<(), AccessPortError> {
        tracing::trace!("AP {port}: writing register {}, value={:x?}", R::NAME, register);

        self.write_raw_ap_register(port, R::ADDRESS, register.into())
            .map_err(AccessPortError::register_write_error::<R>)
    }

    fn write_ap_register_repeated<R: Register>(
        &mut self,
        port: u8,
        values: &[u32],
    ) -> Result<(), AccessPortError> {
        tracing::trace!(
            "AP {port}: writing register {}, block with len={} words",
            R::NAME,
            values.len(),
        );

        self.write_raw_ap_register_repeated(port, R::ADDRESS, values)
            .map_err(AccessPortError::register_write_error::<R>)
    }
}

/// Determine if an AP exists with the given AP number.
///
/// The test is performed by reading the IDR register, and checking if the register is non-zero.
/// A transport fault is treated like an empty slot. A non-zero IDR that cannot be decoded
/// is an error.
pub fn access_port_is_valid<AP>(
    debug_port: &mut AP,
    access_port: u8,
) -> Result<Option<IDR>, AccessPortError>
where
    AP: DapAccess + ?Sized,
{
    let raw = match debug_port.read_raw_ap_register(access_port, IDR::ADDRESS) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("Error reading IDR register from AP {}: {}", access_port, e);
            return Ok(None);
        }
    };

    if raw == 0 {
        tracing::debug!("AP {} is not valid, IDR = 0", access_port);
        return Ok(None);
    }

    Ok(Some(IDR::try_from(raw)?))
}

/// Return the numbers of all valid access ports found on the target.
///
/// Access ports are numbered consecutively, so the scan stops at the first empty slot.
pub fn valid_access_ports<AP>(debug_port: &mut AP) -> Result<Vec<u8>, AccessPortError>
where
    AP: DapAccess + ?Sized,
{
    let mut ports = vec![];

    for port in 0..=255 {
        if access_port_is_valid(debug_port, port)?.is_none() {
            break;
        }
        ports.push(port);
    }

    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake_probe::{FakeAccessPort, FakeProbe};
    use crate::probe::DapError;
    use pretty_assertions::assert_eq;

    #[test]
    fn scan_stops_at_first_empty_slot() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::ahb3());
        probe.add_access_port(FakeAccessPort::ahb3());

        assert_eq!(valid_access_ports(&mut probe).unwrap(), vec![0, 1]);
    }

    #[test]
    fn faulting_idr_read_is_absence() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::ahb3());
        probe.fail_ap_register(0, IDR::ADDRESS, DapError::FaultResponse);

        assert!(access_port_is_valid(&mut probe, 0).unwrap().is_none());
        assert!(valid_access_ports(&mut probe).unwrap().is_empty());
    }

    #[test]
    fn reserved_idr_class_is_an_error() {
        let mut probe = FakeProbe::new();
        // Class 0xC is reserved.
        probe.add_access_port(FakeAccessPort::with_idr(0x0477_8001));
        probe.add_access_port(FakeAccessPort::ahb3());

        assert!(matches!(
            access_port_is_valid(&mut probe, 0),
            Err(AccessPortError::InvalidRegister(_))
        ));
        assert!(matches!(
            valid_access_ports(&mut probe),
            Err(AccessPortError::InvalidRegister(_))
        ));
    }
}
