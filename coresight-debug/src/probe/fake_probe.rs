#![allow(missing_docs)] // Don't require docs for test code
//! An in-memory debug target for tests.
//!
//! [`FakeProbe`] answers access port register transactions the way a real DAP
//! would: each [`FakeAccessPort`] has IDR, BASE, CFG, CSW, TAR and DRW registers with
//! byte lanes and TAR auto-increment, backed by a sparse word memory. A port can
//! additionally carry a [`FakeCortexM`] that implements the debug registers of the
//! System Control Space.

use std::collections::HashMap;

use crate::architecture::arm::ap::{DataSize, SizeCapabilities};
use crate::probe::{DapAccess, DapError, DebugProbeError};

const CSW: u8 = 0x00;
const TAR: u8 = 0x04;
const DRW: u8 = 0x0C;
const CFG: u8 = 0xF4;
const BASE: u8 = 0xF8;
const IDR: u8 = 0xFC;

const CPUID: u32 = 0xE000_ED00;
const AIRCR: u32 = 0xE000_ED0C;
const DFSR: u32 = 0xE000_ED30;
const DHCSR: u32 = 0xE000_EDF0;
const DCRSR: u32 = 0xE000_EDF4;
const DCRDR: u32 = 0xE000_EDF8;
const DEMCR: u32 = 0xE000_EDFC;

/// Class and peripheral identity of the components on a Cortex-M4.
pub const ROM_TABLE_CLASS: u32 = 0xB105_100D;
pub const GENERIC_IP_CLASS: u32 = 0xB105_E00D;
pub const CORESIGHT_CLASS: u32 = 0xB105_900D;
pub const CORTEX_M4_ROM_PID: u64 = 0x0000_0004_000B_B4C4;
pub const CORTEX_M4_SCS_PID: u64 = 0x0000_0004_000B_B00C;
pub const CORTEX_M4_DWT_PID: u64 = 0x0000_0004_000B_B002;
pub const CORTEX_M4_FPB_PID: u64 = 0x0000_0004_000B_B003;
pub const CORTEX_M4_ITM_PID: u64 = 0x0000_0004_000B_B001;
pub const CORTEX_M4_TPIU_PID: u64 = 0x0000_0004_000B_B9A1;
pub const STM32G4_ROM_PID: u64 = 0x0000_0000_000A_0468;

/// A transaction seen by the fake probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadAp { port: u8, address: u8, value: u32 },
    WriteAp { port: u8, address: u8, value: u32 },
}

/// A simulated Cortex-M debug unit.
#[derive(Debug, Clone)]
pub struct FakeCortexM {
    halted: bool,
    debug_enabled: bool,
    halt_responds: bool,
    sleeping: bool,
    locked_up: bool,
    reset_seen: bool,
    registers: [u32; 128],
    dcrdr: u32,
    demcr: u32,
    dfsr: u32,
    cpuid: u32,
    reset_vector: u32,
    link_drops_on_reset: usize,
    reset_fault: DapError,
    catches_reset: bool,
    reset_latency: usize,
    pending_reset_polls: usize,
    dhcsr_writes: usize,
    resets: usize,
}

impl Default for FakeCortexM {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCortexM {
    /// A running Cortex-M4 r0p1.
    pub fn new() -> Self {
        FakeCortexM {
            halted: false,
            debug_enabled: false,
            halt_responds: true,
            sleeping: false,
            locked_up: false,
            reset_seen: false,
            registers: [0; 128],
            dcrdr: 0,
            demcr: 0,
            dfsr: 0,
            cpuid: 0x410F_C241,
            reset_vector: 0x0800_0190,
            link_drops_on_reset: 0,
            reset_fault: DapError::NoAcknowledge,
            catches_reset: true,
            reset_latency: 0,
            pending_reset_polls: 0,
            dhcsr_writes: 0,
            resets: 0,
        }
    }

    /// A core that ignores halt requests.
    pub fn unresponsive(mut self) -> Self {
        self.halt_responds = false;
        self
    }

    /// Drop the next `count` transactions after a system reset with a NoAcknowledge.
    pub fn with_link_drops_on_reset(self, count: usize) -> Self {
        self.with_faults_on_reset(count, DapError::NoAcknowledge)
    }

    /// Fail the next `count` transactions after a system reset with `error`.
    pub fn with_faults_on_reset(mut self, count: usize, error: DapError) -> Self {
        self.link_drops_on_reset = count;
        self.reset_fault = error;
        self
    }

    /// A core that keeps running after a reset even with reset vector catch enabled.
    pub fn ignoring_reset_catch(mut self) -> Self {
        self.catches_reset = false;
        self
    }

    /// Keep AIRCR.SYSRESETREQ set for `polls` reads after a reset request.
    pub fn with_reset_latency(mut self, polls: usize) -> Self {
        self.reset_latency = polls;
        self
    }

    pub fn with_cpuid(mut self, cpuid: u32) -> Self {
        self.cpuid = cpuid;
        self
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub fn set_sleeping(&mut self, sleeping: bool) {
        self.sleeping = sleeping;
    }

    pub fn set_locked_up(&mut self, locked_up: bool) {
        self.locked_up = locked_up;
    }

    pub fn register(&self, selector: usize) -> u32 {
        self.registers[selector]
    }

    pub fn set_register(&mut self, selector: usize, value: u32) {
        self.registers[selector] = value;
    }

    pub fn vector_catch_enabled(&self) -> bool {
        self.demcr & 1 != 0
    }

    pub fn dhcsr_writes(&self) -> usize {
        self.dhcsr_writes
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    fn read(&mut self, address: u32) -> Option<u32> {
        let value = match address {
            CPUID => self.cpuid,
            AIRCR => {
                let pending = if self.pending_reset_polls > 0 {
                    self.pending_reset_polls -= 1;
                    1 << 2
                } else {
                    0
                };
                0xFA05_0000 | pending
            }
            DFSR => self.dfsr,
            DHCSR => {
                let value = (u32::from(self.reset_seen) << 25)
                    | (u32::from(self.locked_up) << 19)
                    | (u32::from(self.sleeping) << 18)
                    | (u32::from(self.halted) << 17)
                    | (1 << 16)
                    | (u32::from(self.halted) << 1)
                    | u32::from(self.debug_enabled);
                // S_RESET_ST is cleared on read.
                self.reset_seen = false;
                value
            }
            DCRSR => 0,
            DCRDR => self.dcrdr,
            DEMCR => self.demcr,
            _ => return None,
        };

        Some(value)
    }

    /// Returns `None` if the address is not a debug register, otherwise whether the write reset the system.
    fn write(&mut self, address: u32, value: u32) -> Option<bool> {
        match address {
            AIRCR => {
                if value >> 16 == 0x05FA && value & (1 << 2) != 0 {
                    self.reset();
                    return Some(true);
                }
            }
            DFSR => self.dfsr &= !value,
            DHCSR => {
                self.dhcsr_writes += 1;
                if value >> 16 == 0xA05F {
                    self.debug_enabled = value & 1 != 0;
                    if value & (1 << 1) == 0 {
                        self.halted = false;
                    } else if self.debug_enabled && self.halt_responds {
                        self.halted = true;
                        self.dfsr |= 1;
                    }
                }
            }
            DCRSR => {
                let selector = (value & 0x7F) as usize;
                if value & (1 << 16) != 0 {
                    self.registers[selector] = self.dcrdr;
                } else {
                    self.dcrdr = self.registers[selector];
                }
            }
            DCRDR => self.dcrdr = value,
            DEMCR => self.demcr = value,
            CPUID => {}
            _ => return None,
        }

        Some(false)
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.registers = [0; 128];
        self.registers[15] = self.reset_vector;
        self.registers[16] = 0x0100_0000;
        self.reset_seen = true;
        self.sleeping = false;
        self.locked_up = false;
        self.halted = self.debug_enabled
            && self.vector_catch_enabled()
            && self.halt_responds
            && self.catches_reset;
        self.pending_reset_polls = self.reset_latency;
    }
}

/// A simulated MEM-AP.
#[derive(Debug, Clone)]
pub struct FakeAccessPort {
    idr: u32,
    base: u32,
    cfg: u32,
    csw: u32,
    tar: u32,
    sizes: SizeCapabilities,
    memory: HashMap<u32, u32>,
    memory_faults: HashMap<u32, DapError>,
    core: Option<FakeCortexM>,
    link_drops: usize,
    link_fault: DapError,
}

impl FakeAccessPort {
    /// CSW after reset: 32 bit transfers, no auto increment, device enabled.
    pub const RESET_CSW: u32 = 0x2300_0042;

    pub fn with_idr(idr: u32) -> Self {
        FakeAccessPort {
            idr,
            base: 0xFFFF_FFFF,
            cfg: 0,
            csw: Self::RESET_CSW,
            tar: 0,
            sizes: SizeCapabilities::ALL,
            memory: HashMap::new(),
            memory_faults: HashMap::new(),
            core: None,
            link_drops: 0,
            link_fault: DapError::NoAcknowledge,
        }
    }

    /// An AHB3 MEM-AP as found on STM32 parts, without any debug components.
    pub fn ahb3() -> Self {
        Self::with_idr(0x0477_0001)
    }

    /// An AHB3 MEM-AP with the ARM Cortex-M4 ROM table and a running core.
    pub fn cortex_m4() -> Self {
        Self::ahb3()
            .with_base(0xE00F_F003)
            .with_rom_table(
                0xE00F_F000,
                &[
                    0xFFF0_F003, // SCS
                    0xFFF0_2003, // DWT
                    0xFFF0_3003, // FPB
                    0xFFF0_1003, // ITM
                    0xFFF4_1003, // TPIU
                    0xFFF4_2002, // ETM, not present
                ],
            )
            .with_component(0xE00F_F000, ROM_TABLE_CLASS, CORTEX_M4_ROM_PID)
            .with_component(0xE000_E000, GENERIC_IP_CLASS, CORTEX_M4_SCS_PID)
            .with_component(0xE000_1000, GENERIC_IP_CLASS, CORTEX_M4_DWT_PID)
            .with_component(0xE000_2000, GENERIC_IP_CLASS, CORTEX_M4_FPB_PID)
            .with_component(0xE000_0000, GENERIC_IP_CLASS, CORTEX_M4_ITM_PID)
            .with_component(0xE004_0000, CORESIGHT_CLASS, CORTEX_M4_TPIU_PID)
            .with_core(FakeCortexM::new())
    }

    /// A Cortex-M4 whose ROM table carries the STM32G4 identity.
    pub fn stm32g4() -> Self {
        Self::cortex_m4().with_component(0xE00F_F000, ROM_TABLE_CLASS, STM32G4_ROM_PID)
    }

    pub fn with_base(mut self, base: u32) -> Self {
        self.base = base;
        self
    }

    pub fn with_sizes(mut self, sizes: SizeCapabilities) -> Self {
        self.sizes = sizes;
        self
    }

    pub fn with_core(mut self, core: FakeCortexM) -> Self {
        self.core = Some(core);
        self
    }

    pub fn with_word(mut self, address: u32, value: u32) -> Self {
        self.write_word(address, value);
        self
    }

    /// Place the CIDR and PIDR byte lanes of a component at `base`.
    pub fn with_component(mut self, base: u32, class_id: u32, peripheral_id: u64) -> Self {
        for lane in 0..4u32 {
            let cid = (class_id >> (lane * 8)) & 0xFF;
            let pid_low = ((peripheral_id >> (lane * 8)) & 0xFF) as u32;
            let pid_high = ((peripheral_id >> (32 + lane * 8)) & 0xFF) as u32;

            self.write_word(base + 0xFF0 + lane * 4, cid);
            self.write_word(base + 0xFE0 + lane * 4, pid_low);
            self.write_word(base + 0xFD0 + lane * 4, pid_high);
        }
        self
    }

    /// Write ROM table entries starting at `base`. Unwritten memory reads as zero,
    /// which terminates the table.
    pub fn with_rom_table(mut self, base: u32, entries: &[u32]) -> Self {
        for (i, entry) in entries.iter().enumerate() {
            self.write_word(base + (i as u32) * 4, *entry);
        }
        self
    }

    pub fn csw(&self) -> u32 {
        self.csw
    }

    pub fn tar(&self) -> u32 {
        self.tar
    }

    pub fn read_word(&self, address: u32) -> u32 {
        self.memory.get(&(address & !0x3)).copied().unwrap_or(0)
    }

    pub fn write_word(&mut self, address: u32, value: u32) {
        self.memory.insert(address & !0x3, value);
    }

    pub fn read_bytes(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| {
                let address = address + i;
                (self.read_word(address) >> ((address % 4) * 8)) as u8
            })
            .collect()
    }

    /// Every DRW access to the word at `address` fails with `error`.
    pub fn fail_memory(&mut self, address: u32, error: DapError) {
        self.memory_faults.insert(address & !0x3, error);
    }

    pub fn clear_memory_faults(&mut self) {
        self.memory_faults.clear();
    }

    pub fn core(&self) -> Option<&FakeCortexM> {
        self.core.as_ref()
    }

    pub fn core_mut(&mut self) -> Option<&mut FakeCortexM> {
        self.core.as_mut()
    }

    fn transfer_size(&self) -> DataSize {
        DataSize::from_u8((self.csw & 0x7) as u8).unwrap_or_default()
    }

    fn increment(&mut self) {
        // AddrInc == Single
        if (self.csw >> 4) & 0x3 == 0b01 {
            let step = self.transfer_size().to_byte_count();
            self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(step) & 0x3FF);
        }
    }

    fn read_drw(&mut self) -> Result<u32, DapError> {
        let aligned = self.tar & !0x3;

        if let Some(error) = self.memory_faults.get(&aligned) {
            return Err(*error);
        }

        let value = match self.core.as_mut().and_then(|core| core.read(aligned)) {
            Some(value) => value,
            None => self.read_word(aligned),
        };

        self.increment();

        Ok(value)
    }

    fn write_drw(&mut self, value: u32) -> Result<(), DapError> {
        let address = self.tar;
        let aligned = address & !0x3;

        if let Some(error) = self.memory_faults.get(&aligned) {
            return Err(*error);
        }

        let mask = match self.transfer_size() {
            DataSize::U8 => 0xFF << ((address % 4) * 8),
            DataSize::U16 => 0xFFFF << ((address % 4) * 8),
            DataSize::U32 => 0xFFFF_FFFF,
        };

        let handled = if mask == 0xFFFF_FFFF {
            self.core.as_mut().and_then(|core| core.write(aligned, value))
        } else {
            None
        };

        match handled {
            Some(true) => {
                if let Some(core) = &self.core {
                    self.link_drops = core.link_drops_on_reset;
                    self.link_fault = core.reset_fault;
                }
            }
            Some(false) => {}
            None => {
                let word = self.read_word(aligned) & !mask | (value & mask);
                self.write_word(aligned, word);
            }
        }

        self.increment();

        Ok(())
    }

    fn read_register(&mut self, address: u8) -> Result<u32, DapError> {
        Ok(match address {
            CSW => self.csw,
            TAR => self.tar,
            DRW => self.read_drw()?,
            CFG => self.cfg,
            BASE => self.base,
            IDR => self.idr,
            _ => 0,
        })
    }

    fn write_register(&mut self, address: u8, value: u32) -> Result<(), DapError> {
        match address {
            CSW => {
                let size_supported = DataSize::from_u8((value & 0x7) as u8)
                    .map(|size| self.sizes.supports(size))
                    .unwrap_or(false);

                // Unsupported sizes read back as 32 bit.
                self.csw = if size_supported {
                    value
                } else {
                    (value & !0x7) | DataSize::U32 as u32
                };
            }
            TAR => self.tar = value,
            DRW => self.write_drw(value)?,
            _ => {}
        }

        Ok(())
    }
}

/// This is a mock probe which can be used for mocking things in tests.
#[derive(Debug, Default)]
pub struct FakeProbe {
    access_ports: Vec<FakeAccessPort>,
    register_faults: HashMap<(u8, u8), DapError>,
    operations: Vec<Operation>,
}

impl FakeProbe {
    /// Creates a new [`FakeProbe`] without any access ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// A probe connected to a single STM32G4-like Cortex-M4.
    pub fn with_stm32g4() -> Self {
        let mut probe = Self::new();
        probe.add_access_port(FakeAccessPort::stm32g4());
        probe
    }

    /// Add an access port. Ports are numbered in the order they are added.
    pub fn add_access_port(&mut self, port: FakeAccessPort) -> u8 {
        self.access_ports.push(port);
        (self.access_ports.len() - 1) as u8
    }

    pub fn access_port(&self, port: u8) -> &FakeAccessPort {
        &self.access_ports[port as usize]
    }

    pub fn access_port_mut(&mut self, port: u8) -> &mut FakeAccessPort {
        &mut self.access_ports[port as usize]
    }

    /// Every access to register `address` of `port` fails with `error`.
    pub fn fail_ap_register(&mut self, port: u8, address: u8, error: DapError) {
        self.register_faults.insert((port, address), error);
    }

    pub fn clear_faults(&mut self) {
        self.register_faults.clear();
        for port in &mut self.access_ports {
            port.clear_memory_faults();
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    /// Number of successful writes to register `address` of `port`.
    pub fn register_writes(&self, port: u8, address: u8) -> usize {
        self.operations
            .iter()
            .filter(|op| {
                matches!(op, Operation::WriteAp { port: p, address: a, .. } if *p == port && *a == address)
            })
            .count()
    }

    fn check_fault(&mut self, port: u8, address: u8) -> Result<(), DebugProbeError> {
        if let Some(error) = self.register_faults.get(&(port, address)) {
            return Err(DebugProbeError::Dap(*error));
        }

        if let Some(ap) = self.access_ports.get_mut(port as usize) {
            if ap.link_drops > 0 {
                ap.link_drops -= 1;
                return Err(DebugProbeError::Dap(ap.link_fault));
            }
        }

        Ok(())
    }
}

impl DapAccess for FakeProbe {
    fn read_raw_ap_register(&mut self, port: u8, address: u8) -> Result<u32, DebugProbeError> {
        self.check_fault(port, address)?;

        let value = match self.access_ports.get_mut(port as usize) {
            Some(ap) => ap.read_register(address)?,
            // Unimplemented access ports read as zero.
            None => 0,
        };

        self.operations.push(Operation::ReadAp {
            port,
            address,
            value,
        });

        Ok(value)
    }

    fn write_raw_ap_register(
        &mut self,
        port: u8,
        address: u8,
        value: u32,
    ) -> Result<(), DebugProbeError> {
        self.check_fault(port, address)?;

        if let Some(ap) = self.access_ports.get_mut(port as usize) {
            ap.write_register(address, value)?;
        }

        self.operations.push(Operation::WriteAp {
            port,
            address,
            value,
        });

        Ok(())
    }
}
