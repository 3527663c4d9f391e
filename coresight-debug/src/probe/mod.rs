//! The transport contract between the CoreSight layer and a debug probe.
//!
//! A probe driver (CMSIS-DAP, ST-Link, J-Link, ...) only has to provide raw access
//! port register transactions. Everything above that, from memory transfers to
//! core control, is built on top of [`DapAccess`].

#[cfg(any(test, feature = "test"))]
pub mod fake_probe;

use std::fmt::Debug;

/// An error in the communication with an access port or
/// debug port.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DapError {
    /// An error occurred during SWD communication.
    #[error("An error occurred in the SWD communication between probe and device.")]
    SwdProtocol,
    /// The target device did not respond to the request.
    #[error("Target device did not respond to request.")]
    NoAcknowledge,
    /// The target device responded with a FAULT response to the request.
    #[error("Target device responded with a FAULT response to the request.")]
    FaultResponse,
    /// Target device responded with a WAIT response to the request.
    #[error("Target device responded with a WAIT response to the request.")]
    WaitResponse,
    /// The parity bit on the read request was incorrect.
    #[error("Incorrect parity on READ request.")]
    IncorrectParity,
}

/// Errors reported by the probe transport.
#[derive(Debug, thiserror::Error)]
pub enum DebugProbeError {
    /// The debug port reported a protocol level error.
    #[error("Error in the debug port communication")]
    Dap(#[from] DapError),
    /// The probe did not finish the transfer in time.
    #[error("Operation timed out")]
    Timeout,
    /// Any other, probe specific error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DebugProbeError {
    /// Returns true if the error means the target dropped off the wire.
    ///
    /// A system reset can take the debug port down with it for a short while. During
    /// that window the target stops acknowledging requests or the line protocol
    /// desynchronises. Only these two cases count as a lost link; FAULT and WAIT
    /// responses are real answers from the target.
    pub fn is_link_lost(&self) -> bool {
        matches!(
            self,
            DebugProbeError::Dap(DapError::NoAcknowledge | DapError::SwdProtocol)
        )
    }
}

/// Access port register access as provided by a probe driver.
///
/// `port` selects the access port on the debug port, `addr` is the register
/// address inside the access port (including the bank bits). Implementations
/// take care of `SELECT` handling. All calls are strictly serialized: the
/// caller never has more than one transaction in flight.
pub trait DapAccess: Debug {
    /// Read an access port register.
    fn read_raw_ap_register(&mut self, port: u8, addr: u8) -> Result<u32, DebugProbeError>;

    /// Read multiple values from the same access port register.
    ///
    /// If possible, this uses optimized read functions, otherwise it
    /// falls back to the `read_raw_ap_register` function.
    fn read_raw_ap_register_repeated(
        &mut self,
        port: u8,
        addr: u8,
        values: &mut [u32],
    ) -> Result<(), DebugProbeError> {
        for val in values {
            *val = self.read_raw_ap_register(port, addr)?;
        }
        Ok(())
    }

    /// Write an access port register.
    fn write_raw_ap_register(
        &mut self,
        port: u8,
        addr: u8,
        value: u32,
    ) -> Result<(), DebugProbeError>;

    /// Write multiple values to the same access port register.
    ///
    /// If possible, this uses optimized write functions, otherwise it
    /// falls back to the `write_raw_ap_register` function.
    fn write_raw_ap_register_repeated(
        &mut self,
        port: u8,
        addr: u8,
        values: &[u32],
    ) -> Result<(), DebugProbeError> {
        for val in values {
            self.write_raw_ap_register(port, addr, *val)?;
        }
        Ok(())
    }
}

impl<T: DapAccess + ?Sized> DapAccess for &mut T {
    fn read_raw_ap_register(&mut self, port: u8, addr: u8) -> Result<u32, DebugProbeError> {
        (**self).read_raw_ap_register(port, addr)
    }

    fn read_raw_ap_register_repeated(
        &mut self,
        port: u8,
        addr: u8,
        values: &mut [u32],
    ) -> Result<(), DebugProbeError> {
        (**self).read_raw_ap_register_repeated(port, addr, values)
    }

    fn write_raw_ap_register(
        &mut self,
        port: u8,
        addr: u8,
        value: u32,
    ) -> Result<(), DebugProbeError> {
        (**self).write_raw_ap_register(port, addr, value)
    }

    fn write_raw_ap_register_repeated(
        &mut self,
        port: u8,
        addr: u8,
        values: &[u32],
    ) -> Result<(), DebugProbeError> {
        (**self).write_raw_ap_register_repeated(port, addr, values)
    }
}

impl<T: DapAccess + ?Sized> DapAccess for Box<T> {
    fn read_raw_ap_register(&mut self, port: u8, addr: u8) -> Result<u32, DebugProbeError> {
        (**self).read_raw_ap_register(port, addr)
    }

    fn read_raw_ap_register_repeated(
        &mut self,
        port: u8,
        addr: u8,
        values: &mut [u32],
    ) -> Result<(), DebugProbeError> {
        (**self).read_raw_ap_register_repeated(port, addr, values)
    }

    fn write_raw_ap_register(
        &mut self,
        port: u8,
        addr: u8,
        value: u32,
    ) -> Result<(), DebugProbeError> {
        (**self).write_raw_ap_register(port, addr, value)
    }

    fn write_raw_ap_register_repeated(
        &mut self,
        port: u8,
        addr: u8,
        values: &[u32],
    ) -> Result<(), DebugProbeError> {
        (**self).write_raw_ap_register_repeated(port, addr, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_no_ack_and_protocol_errors_count_as_link_loss() {
        assert!(DebugProbeError::from(DapError::NoAcknowledge).is_link_lost());
        assert!(DebugProbeError::from(DapError::SwdProtocol).is_link_lost());
        assert!(!DebugProbeError::from(DapError::FaultResponse).is_link_lost());
        assert!(!DebugProbeError::from(DapError::WaitResponse).is_link_lost());
        assert!(!DebugProbeError::Timeout.is_link_lost());
    }
}
