//! All the interface bits for ARM CoreSight.

pub mod ap;
pub mod component;
pub mod core;
pub mod memory;

pub use ap::{AccessPortError, ApAccess, ApClass, ApType, MemoryAp};
pub use component::{
    Component, ComponentIndex, ComponentKind, ComponentLocation, ComponentTree, ComponentType,
    CoreState,
};
pub use memory::{ApMemory, ComponentId, RomTableError};
