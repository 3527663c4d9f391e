//! Memory access through MEM-APs and ROM table parsing.

pub(crate) mod adi_v5_memory_interface;
pub mod romtable;

pub use adi_v5_memory_interface::ApMemory;
pub use romtable::{
    assemble_byte_lanes, ComponentClass, ComponentId, PeripheralId, RomTableEntryRaw,
    RomTableError, RomTableReader,
};
