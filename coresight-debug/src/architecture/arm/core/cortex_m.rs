//! Cortex-M debug control through the System Control Space.
//!
//! All registers in here are given relative to the base of the SCS component
//! (0xE000_E000 on every Cortex-M), which is found in the component tree.

use std::time::{Duration, Instant};

use bitfield::bitfield;

use super::CoreVariant;
use crate::architecture::arm::ap::AccessPortError;
use crate::architecture::arm::component::{ComponentIndex, ComponentTree, ComponentType, CoreState};
use crate::architecture::arm::memory::{ApMemory, RomTableError};
use crate::config::PollConfig;
use crate::core::memory_mapped_registers::MemoryMappedRegister;
use crate::core::registers::{CoreRegister, RegisterFile, RegisterId};
use crate::core::{CoreStatus, HaltReason};
use crate::memory::MemoryInterface;

/// Errors of the core debug state machine.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("The core needs to be halted for this operation")]
    NotHalted,
    #[error("Register selector {0} is out of range, DCRSR.REGSEL has 7 bits")]
    InvalidRegisterSelector(u16),
    #[error("Register {0} does not exist on a {1}")]
    UnsupportedRegister(RegisterId, CoreVariant),
    #[error("Timeout while waiting for {0}")]
    Timeout(&'static str),
    #[error("Component {0:?} is not a core")]
    NotACore(ComponentIndex),
    #[error("The core has no system control block")]
    ScbNotFound,
    #[error("Error accessing the core")]
    Memory(#[from] AccessPortError),
    #[error(transparent)]
    Component(#[from] RomTableError),
}

impl CoreError {
    /// See [`crate::probe::DebugProbeError::is_link_lost`].
    pub fn is_link_lost(&self) -> bool {
        match self {
            CoreError::Memory(e) => e.is_link_lost(),
            _ => false,
        }
    }
}

macro_rules! scb_register {
    ($name:ident, $offset:literal, $display:literal) => {
        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl MemoryMappedRegister for $name {
            const OFFSET: u32 = $offset;
            const NAME: &'static str = $display;
        }
    };
}

bitfield! {
    /// Debug Halting Control and Status Register, DHCSR (see armv7-M Architecture Reference Manual C1.6.2)
    ///
    /// To write this register successfully, you need to set the debug key via [`Dhcsr::enable_write`] first!
    #[derive(Copy, Clone)]
    pub struct Dhcsr(u32);
    impl Debug;
    /// Sticky, set if the core was reset since the last read of DHCSR.
    pub s_reset_st, _: 25;
    pub s_retire_st, _: 24;
    pub s_lockup, _: 19;
    pub s_sleep, _: 18;
    pub s_halt, _: 17;
    /// A DCRSR transfer has completed.
    pub s_regrdy, _: 16;
    pub c_maskints, set_c_maskints: 3;
    pub c_step, set_c_step: 2;
    pub c_halt, set_c_halt: 1;
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// This function sets the bit to enable writes to this register.
    ///
    /// C1.6.3 Debug Halting Control and Status Register, DHCSR:
    /// Debug key:
    /// Software must write 0xA05F to this field to enable write accesses to bits
    /// [15:0], otherwise the processor ignores the write access.
    pub fn enable_write(&mut self) {
        self.0 &= !(0xffff << 16);
        self.0 |= 0xa05f << 16;
    }
}

scb_register!(Dhcsr, 0xDF0, "DHCSR");

bitfield! {
    /// Debug Core Register Selector Register, DCRSR
    #[derive(Copy, Clone)]
    pub struct Dcrsr(u32);
    impl Debug;
    pub _, set_regwnr: 16;
    pub _, set_regsel: 6, 0;
}

scb_register!(Dcrsr, 0xDF4, "DCRSR");

/// Debug Core Register Data Register, DCRDR
#[derive(Debug, Copy, Clone)]
pub struct Dcrdr(u32);

scb_register!(Dcrdr, 0xDF8, "DCRDR");

bitfield! {
    /// Debug Exception and Monitor Control Register, DEMCR (see armv7-M Architecture Reference Manual C1.6.5)
    #[derive(Copy, Clone)]
    pub struct Demcr(u32);
    impl Debug;
    /// Global enable for DWT and ITM features
    pub trcena, set_trcena: 24;
    /// Enable halting debug trap on a HardFault exception
    pub vc_harderr, set_vc_harderr: 10;
    /// Enable Reset Vector Catch. This causes a Local reset to halt a running system.
    pub vc_corereset, set_vc_corereset: 0;
}

scb_register!(Demcr, 0xDFC, "DEMCR");

bitfield! {
    /// Application Interrupt and Reset Control Register, AIRCR (see armv7-M Architecture Reference Manual B3.2.6)
    ///
    /// [`Aircr::vectkey`] must be called before this register can effectively be written!
    #[derive(Copy, Clone)]
    pub struct Aircr(u32);
    impl Debug;
    get_vectkeystat, set_vectkey: 31, 16;
    pub endianness, set_endianness: 15;
    pub prigroup, set_prigroup: 10, 8;
    /// Writing 1 to this bit requests a system reset. Reads as 1 until the reset is done.
    pub sysresetreq, set_sysresetreq: 2;
    pub vectclractive, set_vectclractive: 1;
    pub vectreset, set_vectreset: 0;
}

impl Aircr {
    /// Must be called before writing the register.
    pub fn vectkey(&mut self) {
        self.set_vectkey(0x05FA);
    }

    /// Verifies that the vector key is correct (see [`Aircr::vectkey`]).
    pub fn vectkeystat(&self) -> bool {
        self.get_vectkeystat() == 0xFA05
    }
}

scb_register!(Aircr, 0xD0C, "AIRCR");

bitfield! {
    /// Debug Fault Status Register, DFSR. The bits are cleared by writing one.
    #[derive(Copy, Clone)]
    pub struct Dfsr(u32);
    impl Debug;
    pub external, set_external: 4;
    pub vcatch, set_vcatch: 3;
    pub dwttrap, set_dwttrap: 2;
    pub bkpt, set_bkpt: 1;
    pub halted, set_halted: 0;
}

impl Dfsr {
    fn clear_all() -> Self {
        Dfsr(0b11111)
    }

    /// This function interprets the DFSR register.
    pub fn halt_reason(&self) -> HaltReason {
        if self.0 & 0b11111 == 0 {
            // No reason recorded, e.g. the core was halted before we attached.
            HaltReason::Unknown
        } else if (self.0 & 0b11111).count_ones() > 1 {
            HaltReason::Multiple
        } else if self.bkpt() {
            HaltReason::Breakpoint
        } else if self.external() {
            HaltReason::External
        } else if self.dwttrap() {
            HaltReason::Watchpoint
        } else if self.halted() {
            HaltReason::Request
        } else {
            HaltReason::Exception
        }
    }
}

scb_register!(Dfsr, 0xD30, "DFSR");

bitfield! {
    /// CPUID Base Register (see armv7-M Architecture Reference Manual B3.2.3)
    #[derive(Copy, Clone)]
    pub struct Cpuid(u32);
    impl Debug;
    /// 0x41 for ARM.
    pub implementer, _: 31, 24;
    pub variant, _: 23, 20;
    pub architecture, _: 19, 16;
    pub partno, _: 15, 4;
    pub revision, _: 3, 0;
}

scb_register!(Cpuid, 0xD00, "CPUID");

/// Debug control of a single Cortex-M core.
///
/// This borrows the memory interface of the access port the core sits on and the
/// component tree, which holds the [`CoreState`] of the core. The halt state
/// is a mirror kept in the tree: [`CortexM::is_halted`] does not touch the
/// hardware, [`CortexM::status`] does.
pub struct CortexM<'probe> {
    memory: ApMemory<'probe>,
    components: &'probe mut ComponentTree,
    index: ComponentIndex,
    variant: CoreVariant,
    poll: PollConfig,
}

impl<'probe> CortexM<'probe> {
    pub fn new(
        memory: ApMemory<'probe>,
        components: &'probe mut ComponentTree,
        index: ComponentIndex,
        poll: PollConfig,
    ) -> Result<Self, CoreError> {
        let variant = components
            .get(index)
            .and_then(|component| component.core_state())
            .map(|state| state.variant)
            .ok_or(CoreError::NotACore(index))?;

        Ok(CortexM {
            memory,
            components,
            index,
            variant,
            poll,
        })
    }

    /// The position of the core in the component tree.
    pub fn index(&self) -> ComponentIndex {
        self.index
    }

    pub fn variant(&self) -> CoreVariant {
        self.variant
    }

    /// The registers that can be accessed on this core.
    pub fn registers(&self) -> &'static RegisterFile {
        self.variant.register_file()
    }

    fn state(&self) -> Result<&CoreState, CoreError> {
        self.components
            .component(self.index)?
            .core_state()
            .ok_or(CoreError::NotACore(self.index))
    }

    fn state_mut(&mut self) -> Result<&mut CoreState, CoreError> {
        let index = self.index;
        self.components
            .component_mut(index)?
            .core_state_mut()
            .ok_or(CoreError::NotACore(index))
    }

    /// The halt state as last observed, without talking to the core.
    pub fn is_halted(&self) -> bool {
        self.state().map(|state| state.halted).unwrap_or(false)
    }

    /// Like [`CortexM::is_halted`], but a core missing from the tree is an error.
    fn halted(&self) -> Result<bool, CoreError> {
        Ok(self.state()?.halted)
    }

    fn set_halted(&mut self, halted: bool) -> Result<(), CoreError> {
        self.state_mut()?.halted = halted;
        Ok(())
    }

    /// The base address of the SCS, looked up once and then cached in the core state.
    fn scb_base(&mut self) -> Result<u32, CoreError> {
        let cached = self.state()?.scb;
        let scb = match cached {
            Some(scb) => scb,
            None => {
                let scb = self
                    .components
                    .find_by_type_towards_root(self.index, ComponentType::Scb)
                    .ok_or(CoreError::ScbNotFound)?;
                tracing::debug!("Using SCB {:?} for core {:?}", scb, self.index);
                self.state_mut()?.scb = Some(scb);
                scb
            }
        };

        Ok(self.components.component(scb)?.base_address())
    }

    fn read_scb<R: MemoryMappedRegister>(&mut self) -> Result<R, CoreError> {
        let address = R::address(self.scb_base()?);
        let value = self.memory.read_word_32(address)?;

        tracing::trace!("{} = {:#010x}", R::NAME, value);

        Ok(R::from(value))
    }

    fn write_scb<R: MemoryMappedRegister>(&mut self, register: R) -> Result<(), CoreError> {
        let address = R::address(self.scb_base()?);
        let value: u32 = register.into();

        tracing::trace!("{} <- {:#010x}", R::NAME, value);

        self.memory.write_word_32(address, value)?;

        Ok(())
    }

    /// Poll DHCSR until `condition` holds.
    fn wait_for_dhcsr(
        &mut self,
        what: &'static str,
        timeout: Duration,
        condition: impl Fn(&Dhcsr) -> bool,
    ) -> Result<Dhcsr, CoreError> {
        let start = Instant::now();

        while start.elapsed() < timeout {
            let dhcsr: Dhcsr = self.read_scb()?;

            if condition(&dhcsr) {
                return Ok(dhcsr);
            }

            std::thread::sleep(self.poll.poll_interval());
        }

        Err(CoreError::Timeout(what))
    }

    pub fn cpuid(&mut self) -> Result<Cpuid, CoreError> {
        self.read_scb()
    }

    /// Read DHCSR and bring the halt state mirror up to date.
    pub fn status(&mut self) -> Result<CoreStatus, CoreError> {
        let dhcsr: Dhcsr = self.read_scb()?;

        let status = if dhcsr.s_lockup() {
            CoreStatus::LockedUp
        } else if dhcsr.s_halt() {
            let dfsr: Dfsr = self.read_scb()?;
            self.write_scb(Dfsr::clear_all())?;
            CoreStatus::Halted(dfsr.halt_reason())
        } else if dhcsr.s_sleep() {
            CoreStatus::Sleeping
        } else {
            CoreStatus::Running
        };

        if dhcsr.s_halt() != self.halted()? {
            tracing::debug!(
                "Core {:?} halt state changed behind our back, now {:?}",
                self.index,
                status
            );
        }
        self.set_halted(dhcsr.s_halt())?;

        Ok(status)
    }

    /// Halt the core. Does nothing if the core is already known to be halted.
    #[tracing::instrument(skip(self), fields(core = ?self.index))]
    pub fn halt(&mut self) -> Result<(), CoreError> {
        if self.halted()? {
            return Ok(());
        }

        let mut value = Dhcsr(0);
        value.set_c_halt(true);
        value.set_c_debugen(true);
        value.enable_write();

        self.write_scb(value)?;
        self.wait_for_dhcsr("the core to halt", self.poll.halt_timeout(), Dhcsr::s_halt)?;
        self.set_halted(true)?;

        tracing::debug!("Core halted");

        Ok(())
    }

    /// Let the core run. Does nothing if the core is already known to be running.
    #[tracing::instrument(skip(self), fields(core = ?self.index))]
    pub fn resume(&mut self) -> Result<(), CoreError> {
        if !self.halted()? {
            return Ok(());
        }

        let mut value = Dhcsr(0);
        value.set_c_halt(false);
        value.set_c_debugen(true);
        value.enable_write();

        self.write_scb(value)?;
        self.wait_for_dhcsr("the core to resume", self.poll.halt_timeout(), |dhcsr| {
            !dhcsr.s_halt()
        })?;
        self.set_halted(false)?;

        tracing::debug!("Core resumed");

        Ok(())
    }

    /// Reset the system and halt the core at the reset vector.
    ///
    /// The debug port may drop off the wire while the reset is in progress. Lost
    /// link errors are tolerated until AIRCR.SYSRESETREQ reads back as clear, any
    /// other error is returned.
    ///
    /// Reset vector catch is disabled again before returning, also on failure.
    #[tracing::instrument(skip(self), fields(core = ?self.index))]
    pub fn reset_halt(&mut self) -> Result<(), CoreError> {
        self.halt()?;

        let mut demcr: Demcr = self.read_scb()?;
        demcr.set_vc_corereset(true);
        self.write_scb(demcr)?;

        let result = self.reset_and_catch();

        demcr.set_vc_corereset(false);
        let cleared = self.write_scb(demcr);

        match (result, cleared) {
            (Ok(()), cleared) => cleared?,
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(clear_error)) => {
                tracing::warn!("Failed to disable reset vector catch: {}", clear_error);
                return Err(e);
            }
        }

        tracing::debug!("Core reset and halted");

        Ok(())
    }

    /// Request a system reset and wait for the core to stop at the reset vector.
    fn reset_and_catch(&mut self) -> Result<(), CoreError> {
        let mut aircr = Aircr(0);
        aircr.vectkey();
        aircr.set_sysresetreq(true);

        match self.write_scb(aircr) {
            Ok(()) => {}
            Err(e) if e.is_link_lost() => {
                tracing::warn!("Link lost while requesting the reset: {}", e);
            }
            Err(e) => return Err(e),
        }

        self.wait_for_reset()?;

        self.wait_for_dhcsr(
            "the core to halt after reset",
            self.poll.reset_timeout(),
            Dhcsr::s_halt,
        )?;

        self.set_halted(true)
    }

    fn wait_for_reset(&mut self) -> Result<(), CoreError> {
        let timeout = self.poll.reset_timeout();
        let start = Instant::now();

        while start.elapsed() < timeout {
            match self.read_scb::<Aircr>() {
                Ok(aircr) if !aircr.sysresetreq() => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_link_lost() => {
                    tracing::warn!("Link lost during reset, retrying: {}", e);
                }
                Err(e) => return Err(e),
            }

            std::thread::sleep(self.poll.poll_interval());
        }

        Err(CoreError::Timeout("the system reset to complete"))
    }

    /// Validate a register access against the register file and the halt state.
    fn check_register_access(&self, id: RegisterId) -> Result<(), CoreError> {
        if id.0 >= 128 {
            return Err(CoreError::InvalidRegisterSelector(id.0));
        }

        if self.registers().get(id).is_none() {
            return Err(CoreError::UnsupportedRegister(id, self.variant));
        }

        if !self.halted()? {
            return Err(CoreError::NotHalted);
        }

        Ok(())
    }

    pub fn read_core_register(&mut self, id: impl Into<RegisterId>) -> Result<u32, CoreError> {
        let id = id.into();
        self.check_register_access(id)?;

        // Write the DCRSR value to select the register we want to read.
        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regwnr(false);
        dcrsr.set_regsel(u32::from(id));
        self.write_scb(dcrsr)?;

        self.wait_for_dhcsr(
            "a core register transfer",
            self.poll.register_timeout(),
            Dhcsr::s_regrdy,
        )?;

        let value: Dcrdr = self.read_scb()?;

        Ok(value.into())
    }

    pub fn write_core_register(
        &mut self,
        id: impl Into<RegisterId>,
        value: u32,
    ) -> Result<(), CoreError> {
        let id = id.into();
        self.check_register_access(id)?;

        self.write_scb(Dcrdr(value))?;

        let mut dcrsr = Dcrsr(0);
        dcrsr.set_regwnr(true);
        dcrsr.set_regsel(u32::from(id));
        self.write_scb(dcrsr)?;

        self.wait_for_dhcsr(
            "a core register transfer",
            self.poll.register_timeout(),
            Dhcsr::s_regrdy,
        )?;

        Ok(())
    }

    /// Read R0-R12, SP, LR, PC and xPSR, in this order.
    pub fn read_core_registers(&mut self) -> Result<Vec<(&'static CoreRegister, u32)>, CoreError> {
        self.registers()
            .core_registers()
            .iter()
            .map(|register| Ok((register, self.read_core_register(register)?)))
            .collect()
    }
}

impl std::fmt::Debug for CortexM<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CortexM")
            .field("index", &self.index)
            .field("variant", &self.variant)
            .field("halted", &self.is_halted())
            .finish()
    }
}
