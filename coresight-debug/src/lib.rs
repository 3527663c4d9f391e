//! # ARM CoreSight debug access
//!
//! This crate implements the target side of a debug session with an ARM Cortex-M
//! microcontroller: typed MEM-AP memory access, discovery of the CoreSight components
//! through the ROM tables, resolution of those components onto known parts and the
//! Cortex-M halt, reset and core register protocol.
//!
//! The debug probe itself is not part of this crate. Anything that can read and write
//! access port registers can drive it by implementing [`DapAccess`].
//!
//! ## Halting the attached chip
//!
//! ```no_run
//! use coresight_debug::{DapAccess, DebugConfig, Error, MatcherRegistry, Session};
//!
//! fn halt_first_core(probe: impl DapAccess) -> Result<u32, Error> {
//!     let registry = MatcherRegistry::with_builtin();
//!     let mut session = Session::attach(probe, &registry, DebugConfig::default())?;
//!
//!     // Select a core.
//!     let mut core = session.core(0)?;
//!
//!     // Halt the attached core and read its program counter.
//!     core.halt()?;
//!     let pc = core.registers().program_counter();
//!     Ok(core.read_core_register(pc)?)
//! }
//! ```
//!
//! ## Printing the component tree
//!
//! ```no_run
//! use coresight_debug::{DapAccess, DebugConfig, Error, MatcherRegistry, Session};
//!
//! fn print_components(probe: impl DapAccess) -> Result<(), Error> {
//!     let registry = MatcherRegistry::with_builtin();
//!     let session = Session::attach(probe, &registry, DebugConfig::default())?;
//!
//!     for root in session.components().roots() {
//!         println!("{}", session.components().to_termtree(*root));
//!     }
//!     Ok(())
//! }
//! ```

/// All the interface bits for the different architectures.
pub mod architecture;
pub mod config;

pub mod core;
mod error;
mod memory;
pub mod probe;
mod session;

pub use crate::architecture::arm::component::{
    Component, ComponentFactory, ComponentIndex, ComponentKind, ComponentLocation,
    ComponentTree, ComponentType, Matcher, MatcherRegistry,
};
pub use crate::architecture::arm::core::{CoreError, CoreVariant, CortexM};
pub use crate::architecture::arm::memory::{ApMemory, ComponentId, RomTableError};
pub use crate::architecture::arm::{AccessPortError, MemoryAp};
pub use crate::config::{ChipDescription, ComponentOverride, DebugConfig, PollConfig};
pub use crate::core::{
    CoreRegister, CoreStatus, HaltReason, MemoryMappedRegister, RegisterBlock, RegisterFile,
    RegisterId,
};
pub use crate::error::Error;
pub use crate::memory::MemoryInterface;
pub use crate::probe::{DapAccess, DapError, DebugProbeError};
pub use crate::session::Session;

// Exports only used in tests
#[cfg(feature = "test")]
pub use crate::probe::fake_probe::{FakeAccessPort, FakeCortexM, FakeProbe};
#[cfg(feature = "test")]
pub use crate::probe::fake_probe::Operation as ProbeOperation;
