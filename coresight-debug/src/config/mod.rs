//! Debug session configuration.
//!
//! The configuration is usually loaded from a YAML file:
//!
//! ```yaml
//! poll:
//!   halt_timeout_ms: 250
//! chips:
//!   - name: STM32G4
//!     components:
//!       - access_port: 0
//!         base_address: 0xE00FF000
//!         class_id: 0xB105100D
//!         peripheral_id: 0xA0468
//!         factory: cortex_m4
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::architecture::arm::component::ComponentFactory;

/// Error while loading a [`DebugConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read the configuration")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the configuration")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Component override of chip {chip} at {base_address:#010x} is not 4 KiB aligned")]
    UnalignedOverride { chip: String, base_address: u32 },
    #[error("The poll interval must not be zero")]
    ZeroPollInterval,
}

/// Timeouts of the hardware handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// How long to wait for the core to halt or resume.
    pub halt_timeout_ms: u64,
    /// How long to wait for a core register transfer to complete.
    pub register_timeout_ms: u64,
    /// How long to wait for a system reset request to complete.
    pub reset_timeout_ms: u64,
    /// Sleep between two polls of a status register.
    pub poll_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            halt_timeout_ms: 500,
            register_timeout_ms: 100,
            reset_timeout_ms: 1000,
            poll_interval_ms: 1,
        }
    }
}

impl PollConfig {
    pub fn halt_timeout(&self) -> Duration {
        Duration::from_millis(self.halt_timeout_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_peripheral_id_mask() -> u64 {
    // Part number, JEP106 identity and continuation code.
    0x0000_000F_000F_FFFF
}

/// Identifies a component at a fixed location and says what it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentOverride {
    pub access_port: u8,
    pub base_address: u32,
    /// Defaults to any CoreSight class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id_mask: Option<u32>,
    pub peripheral_id: u64,
    #[serde(default = "default_peripheral_id_mask")]
    pub peripheral_id_mask: u64,
    pub factory: ComponentFactory,
}

/// Vendor specific knowledge about a chip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipDescription {
    /// Name of the chip, used as subtype of the components it overrides.
    pub name: String,
    #[serde(default)]
    pub components: Vec<ComponentOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub poll: PollConfig,
    pub chips: Vec<ChipDescription>,
}

impl DebugConfig {
    pub fn from_yaml_reader<R: std::io::Read>(reader: R) -> Result<Self, ConfigError> {
        let config: DebugConfig = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: DebugConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Self::from_yaml_reader(file)
    }

    pub fn chip(&self, name: &str) -> Option<&ChipDescription> {
        self.chips.iter().find(|chip| chip.name == name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        for chip in &self.chips {
            if let Some(component) = chip
                .components
                .iter()
                .find(|component| component.base_address & 0xFFF != 0)
            {
                return Err(ConfigError::UnalignedOverride {
                    chip: chip.name.clone(),
                    base_address: component.base_address,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_config_uses_defaults() {
        let config = DebugConfig::from_yaml("{}").unwrap();

        assert_eq!(config, DebugConfig::default());
        assert_eq!(config.poll.halt_timeout(), Duration::from_millis(500));
        assert_eq!(config.poll.reset_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn parse_chip_overrides() {
        let yaml = r#"
poll:
  halt_timeout_ms: 250
chips:
  - name: STM32G4
    components:
      - access_port: 0
        base_address: 0xE00FF000
        class_id: 0xB105100D
        peripheral_id: 0xA0468
        factory: cortex_m4
"#;

        let config = DebugConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.poll.halt_timeout_ms, 250);
        assert_eq!(config.poll.register_timeout_ms, 100);

        let chip = config.chip("STM32G4").unwrap();
        assert_eq!(
            chip.components,
            vec![ComponentOverride {
                access_port: 0,
                base_address: 0xE00F_F000,
                class_id: Some(0xB105_100D),
                class_id_mask: None,
                peripheral_id: 0xA0468,
                peripheral_id_mask: 0x0000_000F_000F_FFFF,
                factory: ComponentFactory::CortexM4,
            }]
        );
    }

    #[test]
    fn reject_unaligned_override() {
        let yaml = r#"
chips:
  - name: broken
    components:
      - access_port: 0
        base_address: 0xE00FF003
        peripheral_id: 0
        factory: rom_table
"#;

        assert!(matches!(
            DebugConfig::from_yaml(yaml),
            Err(ConfigError::UnalignedOverride {
                base_address: 0xE00F_F003,
                ..
            })
        ));
    }

    #[test]
    fn reject_unknown_factory() {
        let yaml = r#"
chips:
  - name: broken
    components:
      - access_port: 0
        base_address: 0xE00FF000
        peripheral_id: 0
        factory: cortex_a53
"#;

        assert!(matches!(
            DebugConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }
}
