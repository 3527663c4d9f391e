//! A debug session on one target.

use crate::architecture::arm::ap::{valid_access_ports, AccessPortError, MemoryAp};
use crate::architecture::arm::component::{
    ComponentIndex, ComponentTree, ComponentType, MatcherRegistry,
};
use crate::architecture::arm::core::CortexM;
use crate::architecture::arm::memory::ApMemory;
use crate::config::DebugConfig;
use crate::core::RegisterBlock;
use crate::error::Error;
use crate::probe::DapAccess;

/// The `Session` struct represents an active debug session.
///
/// Attaching scans the debug port for memory access ports, walks the ROM table of
/// every one of them and resolves the discovered components. The session owns the
/// probe, the access ports and the component tree; cores and register blocks are
/// short lived handles borrowed from it.
#[derive(Debug)]
pub struct Session<P: DapAccess> {
    probe: P,
    access_ports: Vec<MemoryAp>,
    components: ComponentTree,
    registry: MatcherRegistry,
    config: DebugConfig,
}

impl<P: DapAccess> Session<P> {
    /// Open a new session.
    ///
    /// The component overrides of the chips in `config` are added to a copy of
    /// `registry`.
    #[tracing::instrument(skip_all)]
    pub fn attach(
        mut probe: P,
        registry: &MatcherRegistry,
        config: DebugConfig,
    ) -> Result<Self, Error> {
        let mut registry = registry.clone();
        for chip in &config.chips {
            registry.register_chip(chip);
        }

        let mut access_ports = vec![];

        for port in valid_access_ports(&mut probe)? {
            match MemoryAp::probe(&mut probe, port) {
                Ok(Some(ap)) => access_ports.push(ap),
                Ok(None) => {}
                Err(AccessPortError::NotAMemoryAp { port, class }) => {
                    tracing::debug!("AP {} is a {:?}, skipping", port, class);
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!("Found {} memory access ports", access_ports.len());

        let mut components = ComponentTree::new();

        for ap in &mut access_ports {
            let Some(root) = components.add_access_port(ap) else {
                tracing::debug!("AP {} has no debug components", ap.port());
                continue;
            };

            let mut memory = ApMemory::new(&mut probe, ap);
            components.probe_children(&mut memory, &registry, root)?;
        }

        Ok(Session {
            probe,
            access_ports,
            components,
            registry,
            config,
        })
    }

    pub fn access_ports(&self) -> &[MemoryAp] {
        &self.access_ports
    }

    /// Memory access through access port `port`.
    pub fn memory(&mut self, port: u8) -> Result<ApMemory<'_>, Error> {
        let ap = self
            .access_ports
            .iter_mut()
            .find(|ap| ap.port() == port)
            .ok_or(Error::AccessPortNotFound(port))?;

        Ok(ApMemory::new(&mut self.probe, ap))
    }

    pub fn components(&self) -> &ComponentTree {
        &self.components
    }

    /// The matchers in use, including the chip overrides of the configuration.
    pub fn registry(&self) -> &MatcherRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    /// Walk the ROM table below `index` again, e.g. after a power domain was enabled.
    ///
    /// Components are resolved with [`Session::registry`], so chip overrides stay in effect.
    #[tracing::instrument(skip(self))]
    pub fn rediscover(&mut self, index: ComponentIndex) -> Result<(), Error> {
        let port = self
            .components
            .get(index)
            .ok_or(Error::ComponentNotFound(index))?
            .access_port();

        let ap = self
            .access_ports
            .iter_mut()
            .find(|ap| ap.port() == port)
            .ok_or(Error::AccessPortNotFound(port))?;

        let mut memory = ApMemory::new(&mut self.probe, ap);
        self.components
            .probe_children(&mut memory, &self.registry, index)?;

        Ok(())
    }

    /// All cores, in discovery order.
    pub fn cores(&self) -> Vec<ComponentIndex> {
        self.components
            .roots()
            .iter()
            .flat_map(|root| {
                self.components
                    .find_components_by_type(*root, ComponentType::Core)
            })
            .collect()
    }

    /// Debug control of core number `n`.
    pub fn core(&mut self, n: usize) -> Result<CortexM<'_>, Error> {
        let index = *self.cores().get(n).ok_or(Error::CoreNotFound(n))?;
        let port = self
            .components
            .get(index)
            .ok_or(Error::ComponentNotFound(index))?
            .access_port();

        let ap = self
            .access_ports
            .iter_mut()
            .find(|ap| ap.port() == port)
            .ok_or(Error::AccessPortNotFound(port))?;

        let memory = ApMemory::new(&mut self.probe, ap);

        Ok(CortexM::new(
            memory,
            &mut self.components,
            index,
            self.config.poll,
        )?)
    }

    /// The registers of a DWT, FPB, ITM or SCB component.
    pub fn component_registers(
        &mut self,
        index: ComponentIndex,
    ) -> Result<RegisterBlock<ApMemory<'_>>, Error> {
        let component = self
            .components
            .get(index)
            .ok_or(Error::ComponentNotFound(index))?;
        let map = component
            .kind()
            .register_map()
            .ok_or(Error::NoRegisterMap(index))?;
        let base_address = component.base_address();
        let port = component.access_port();

        let memory = self.memory(port)?;

        Ok(RegisterBlock::new(memory, map, base_address))
    }

    /// Direct access to the probe.
    pub fn probe(&mut self) -> &mut P {
        &mut self.probe
    }

    /// Close the session and give back the probe.
    pub fn into_probe(self) -> P {
        self.probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake_probe::{FakeAccessPort, FakeProbe};
    use pretty_assertions::assert_eq;

    const CUSTOM_M7: &str = r#"
chips:
  - name: Custom M7
    components:
      - access_port: 0
        base_address: 0xE00FF000
        class_id: 0xB105100D
        peripheral_id: 0x4000BB4C4
        factory: cortex_m7
"#;

    #[test]
    fn attach_skips_non_memory_ports() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::cortex_m4());
        // A JTAG-AP.
        probe.add_access_port(FakeAccessPort::with_idr(0x0476_2000));

        let session = Session::attach(
            probe,
            &MatcherRegistry::with_builtin(),
            DebugConfig::default(),
        )
        .unwrap();

        assert_eq!(session.access_ports().len(), 1);
        assert_eq!(session.cores().len(), 1);
    }

    #[test]
    fn unknown_core_index() {
        let probe = FakeProbe::with_stm32g4();
        let mut session =
            Session::attach(probe, &MatcherRegistry::with_builtin(), DebugConfig::default())
                .unwrap();

        assert!(matches!(session.core(1), Err(Error::CoreNotFound(1))));
        assert!(matches!(session.memory(3), Err(Error::AccessPortNotFound(3))));
    }

    #[test]
    fn malformed_idr_aborts_attach() {
        let mut probe = FakeProbe::new();
        // Reserved class 0xC in front of a valid port.
        probe.add_access_port(FakeAccessPort::with_idr(0x0477_8001));
        probe.add_access_port(FakeAccessPort::stm32g4());

        let result = Session::attach(
            probe,
            &MatcherRegistry::with_builtin(),
            DebugConfig::default(),
        );

        assert!(matches!(
            result,
            Err(Error::AccessPort(AccessPortError::InvalidRegister(_)))
        ));
    }

    #[test]
    fn rediscover_keeps_chip_overrides() {
        let config = DebugConfig::from_yaml(CUSTOM_M7).unwrap();
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::cortex_m4());
        let mut session =
            Session::attach(probe, &MatcherRegistry::with_builtin(), config).unwrap();

        let root = session.components().access_port_root(0).unwrap();
        session.rediscover(root).unwrap();

        let cpu = session.cores()[0];
        let component = session.components().get(cpu).unwrap();
        assert_eq!(component.subtype(), Some("Custom M7"));
        assert_eq!(
            component.core_state().map(|state| state.variant),
            Some(crate::architecture::arm::core::CoreVariant::CortexM7)
        );
    }
}
