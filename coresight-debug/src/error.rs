use crate::architecture::arm::ap::AccessPortError;
use crate::architecture::arm::component::ComponentIndex;
use crate::architecture::arm::core::CoreError;
use crate::architecture::arm::memory::RomTableError;
use crate::config::ConfigError;
use crate::core::RegisterError;
use crate::probe::DebugProbeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("An error with the usage of the probe occurred")]
    Probe(#[from] DebugProbeError),
    #[error("An error with an access port occurred")]
    AccessPort(#[from] AccessPortError),
    #[error("Component discovery failed")]
    RomTable(#[from] RomTableError),
    #[error("Core debug operation failed")]
    Core(#[from] CoreError),
    #[error("Component register access failed")]
    Register(#[from] RegisterError),
    #[error("Invalid configuration")]
    Config(#[from] ConfigError),
    #[error("Access port {0} does not exist")]
    AccessPortNotFound(u8),
    #[error("Core {0} does not exist")]
    CoreNotFound(usize),
    #[error("Component {0:?} does not exist")]
    ComponentNotFound(ComponentIndex),
    #[error("Component {0:?} has no register map")]
    NoRegisterMap(ComponentIndex),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
