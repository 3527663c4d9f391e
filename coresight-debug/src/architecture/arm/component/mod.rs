//! The tree of CoreSight components discovered through the ROM tables.
//!
//! Components live in an arena owned by [`ComponentTree`] and refer to each other by
//! [`ComponentIndex`]. Every MEM-AP with a debug base contributes one root node of kind
//! [`ComponentKind::AccessPort`]; its children are found by walking the ROM table the
//! BASE register points at.

pub mod matcher;

use serde::{Deserialize, Serialize};
use termtree::Tree;

pub use matcher::{ComponentFactory, Matcher, MatcherRegistry};

use crate::architecture::arm::ap::{BaseAddrFormat, MemoryAp};
use crate::architecture::arm::core::CoreVariant;
use crate::architecture::arm::memory::{
    ComponentId, RomTableEntryRaw, RomTableError, RomTableReader,
};
use crate::core::memory_mapped_registers::{
    RegisterMap, DWT_REGISTERS, FPB_REGISTERS, ITM_REGISTERS, SCB_REGISTERS,
};
use crate::memory::MemoryInterface;

/// The position of a component in the [`ComponentTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentIndex(usize);

/// Where a component lives: access port number and 4 KiB aligned base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentLocation {
    pub access_port: u8,
    pub base_address: u32,
}

impl ComponentLocation {
    pub fn new(access_port: u8, base_address: u32) -> Self {
        ComponentLocation {
            access_port,
            base_address,
        }
    }
}

/// Host side state of a CPU core component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreState {
    pub variant: CoreVariant,
    /// Mirror of the hardware halt state, updated by the core controller.
    pub halted: bool,
    /// The system control block of this core, once it has been looked up.
    pub scb: Option<ComponentIndex>,
}

impl CoreState {
    pub fn new(variant: CoreVariant) -> Self {
        CoreState {
            variant,
            halted: false,
            scb: None,
        }
    }
}

/// What a component turned out to be after matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    /// No matcher applied.
    Generic,
    /// The root node of an access port.
    AccessPort {
        /// The low 12 bits of the BASE register, used like a ROM table entry.
        root_entry: u32,
    },
    RomTable,
    Core(CoreState),
    Scb,
    Dwt,
    Fpb,
    Itm,
    Tpiu,
}

/// The discriminant of a [`ComponentKind`], used for type based searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Generic,
    AccessPort,
    RomTable,
    Core,
    Scb,
    Dwt,
    Fpb,
    Itm,
    Tpiu,
}

impl ComponentKind {
    pub fn component_type(&self) -> ComponentType {
        match self {
            ComponentKind::Generic => ComponentType::Generic,
            ComponentKind::AccessPort { .. } => ComponentType::AccessPort,
            ComponentKind::RomTable => ComponentType::RomTable,
            ComponentKind::Core(_) => ComponentType::Core,
            ComponentKind::Scb => ComponentType::Scb,
            ComponentKind::Dwt => ComponentType::Dwt,
            ComponentKind::Fpb => ComponentType::Fpb,
            ComponentKind::Itm => ComponentType::Itm,
            ComponentKind::Tpiu => ComponentType::Tpiu,
        }
    }

    /// The register file of this component, if it has one.
    pub fn register_map(&self) -> Option<&'static RegisterMap> {
        match self {
            ComponentKind::Scb => Some(&SCB_REGISTERS),
            ComponentKind::Dwt => Some(&DWT_REGISTERS),
            ComponentKind::Fpb => Some(&FPB_REGISTERS),
            ComponentKind::Itm => Some(&ITM_REGISTERS),
            _ => None,
        }
    }
}

/// A node of the component tree.
#[derive(Debug, Clone)]
pub struct Component {
    parent: Option<ComponentIndex>,
    children: Vec<ComponentIndex>,
    location: ComponentLocation,
    id: ComponentId,
    kind: ComponentKind,
    subtype: Option<String>,
}

impl Component {
    /// A generic component, not yet attached to a tree.
    pub fn new(parent: Option<ComponentIndex>, location: ComponentLocation, id: ComponentId) -> Self {
        Component {
            parent,
            children: Vec::new(),
            location,
            id,
            kind: ComponentKind::Generic,
            subtype: None,
        }
    }

    pub fn parent(&self) -> Option<ComponentIndex> {
        self.parent
    }

    pub fn children(&self) -> &[ComponentIndex] {
        &self.children
    }

    pub fn location(&self) -> ComponentLocation {
        self.location
    }

    pub fn access_port(&self) -> u8 {
        self.location.access_port
    }

    pub fn base_address(&self) -> u32 {
        self.location.base_address
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ComponentKind {
        &mut self.kind
    }

    pub fn component_type(&self) -> ComponentType {
        self.kind.component_type()
    }

    /// The label of the matcher that specialized this component.
    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn core_state(&self) -> Option<&CoreState> {
        match &self.kind {
            ComponentKind::Core(state) => Some(state),
            _ => None,
        }
    }

    pub fn core_state_mut(&mut self) -> Option<&mut CoreState> {
        match &mut self.kind {
            ComponentKind::Core(state) => Some(state),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        let label = match (&self.kind, self.subtype()) {
            (ComponentKind::AccessPort { .. }, _) => {
                return format!("Access port {}", self.location.access_port)
            }
            (_, Some(subtype)) => format!("{:?} ({})", self.component_type(), subtype),
            (_, None) => format!("{:?}", self.component_type()),
        };

        let peripheral = self.id.peripheral();
        format!(
            "{} at {:#010x}, part {:#05x}, designer {}",
            label,
            self.location.base_address,
            peripheral.part(),
            peripheral.designer().unwrap_or("<unknown>")
        )
    }
}

/// Arena of discovered components.
#[derive(Debug, Clone, Default)]
pub struct ComponentTree {
    nodes: Vec<Option<Component>>,
    free: Vec<usize>,
    roots: Vec<ComponentIndex>,
}

impl ComponentTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, component: Component) -> ComponentIndex {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(component);
                ComponentIndex(slot)
            }
            None => {
                self.nodes.push(Some(component));
                ComponentIndex(self.nodes.len() - 1)
            }
        }
    }

    fn remove_subtree(&mut self, index: ComponentIndex) {
        if let Some(component) = self.nodes.get_mut(index.0).and_then(Option::take) {
            self.free.push(index.0);
            for child in component.children {
                self.remove_subtree(child);
            }
        }
    }

    /// Add the root node for a memory access port.
    ///
    /// Returns `None` if the port has no debug entries.
    pub fn add_access_port(&mut self, ap: &MemoryAp) -> Option<ComponentIndex> {
        let base = ap.base();
        let base_address = ap.debug_base_address()?;

        // A legacy format BASE register points straight at a present table.
        let root_entry = match base.Format {
            BaseAddrFormat::ADIv5 => u32::from(base.ENTRY),
            BaseAddrFormat::Legacy => 0x003,
        };

        let mut root = Component::new(
            None,
            ComponentLocation::new(ap.port(), base_address),
            ComponentId::default(),
        );
        root.kind = ComponentKind::AccessPort { root_entry };

        let index = self.insert(root);
        self.roots.push(index);

        Some(index)
    }

    /// Read the identity of the component at `base_address`, resolve it against
    /// `registry` and insert it as a child of `parent`.
    ///
    /// The children of the new component are not probed.
    pub fn probe(
        &mut self,
        memory: &mut dyn MemoryInterface,
        registry: &MatcherRegistry,
        parent: ComponentIndex,
        base_address: u32,
    ) -> Result<ComponentIndex, RomTableError> {
        let access_port = self.component(parent)?.access_port();

        let id = ComponentId::read(memory, base_address)?;
        let mut component = Component::new(
            Some(parent),
            ComponentLocation::new(access_port, base_address),
            id,
        );

        if let Some(matcher) = registry.resolve(&component) {
            tracing::debug!(
                "Component at {:#010x} resolved to {:?} ({})",
                base_address,
                matcher.factory,
                matcher.subtype
            );
            component.kind = matcher.factory.build();
            component.subtype = Some(matcher.subtype.clone());
        }

        let index = self.insert(component);
        if let Some(parent) = self.get_mut(parent) {
            parent.children.push(index);
        }

        Ok(index)
    }

    /// (Re)discover the children of a component.
    ///
    /// Any existing children are removed first, so calling this twice gives the same
    /// tree. Only access port roots and valid ROM table components have children.
    /// Components whose identity cannot be read are left out.
    #[tracing::instrument(skip(self, memory, registry))]
    pub fn probe_children(
        &mut self,
        memory: &mut dyn MemoryInterface,
        registry: &MatcherRegistry,
        index: ComponentIndex,
    ) -> Result<(), RomTableError> {
        let node = self.component(index)?;
        let table_base = node.base_address();

        let entries = match node.kind {
            ComponentKind::AccessPort { root_entry } => {
                if root_entry == 0 {
                    vec![]
                } else {
                    vec![RomTableEntryRaw::new(table_base, root_entry)]
                }
            }
            _ if node.id.is_rom_table() => {
                let mut entries = vec![];
                for entry in RomTableReader::new(memory, table_base).entries() {
                    match entry {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            tracing::warn!(
                                "Failed to read ROM table at {:#010x}, ignoring remaining entries: {}",
                                table_base,
                                e
                            );
                        }
                    }
                }
                entries
            }
            _ => vec![],
        };

        let old_children = std::mem::take(&mut self.component_mut(index)?.children);
        for child in old_children {
            self.remove_subtree(child);
        }

        let ancestors = self.ancestor_addresses(index);

        for entry in entries {
            if !entry.entry_present {
                tracing::trace!("Skipping not present entry {:#010x}", entry.raw());
                continue;
            }

            let address = entry.component_address();

            if ancestors.contains(&address) {
                tracing::warn!(
                    "ROM table at {:#010x} refers back to {:#010x}, skipping entry",
                    table_base,
                    address
                );
                continue;
            }

            let child = match self.probe(memory, registry, index, address) {
                Ok(child) => child,
                Err(e) => {
                    tracing::debug!("No component at {:#010x}: {}", address, e);
                    continue;
                }
            };

            self.probe_children(memory, registry, child)?;
        }

        Ok(())
    }

    /// Base addresses of the ROM tables on the path from `index` to its root.
    ///
    /// Access port nodes are not included, they share the address of the first table.
    fn ancestor_addresses(&self, index: ComponentIndex) -> Vec<u32> {
        let mut addresses = vec![];
        let mut current = Some(index);

        while let Some(component) = current.and_then(|i| self.get(i)) {
            if component.component_type() != ComponentType::AccessPort {
                addresses.push(component.base_address());
            }
            current = component.parent;
        }

        addresses
    }

    pub fn get(&self, index: ComponentIndex) -> Option<&Component> {
        self.nodes.get(index.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: ComponentIndex) -> Option<&mut Component> {
        self.nodes.get_mut(index.0).and_then(Option::as_mut)
    }

    /// Like [`ComponentTree::get`], but a stale index is an error.
    pub fn component(&self, index: ComponentIndex) -> Result<&Component, RomTableError> {
        self.get(index)
            .ok_or_else(|| RomTableError::ComponentNotFound(format!("{index:?}")))
    }

    pub fn component_mut(&mut self, index: ComponentIndex) -> Result<&mut Component, RomTableError> {
        self.get_mut(index)
            .ok_or_else(|| RomTableError::ComponentNotFound(format!("{index:?}")))
    }

    pub fn parent(&self, index: ComponentIndex) -> Option<ComponentIndex> {
        self.get(index).and_then(Component::parent)
    }

    pub fn children(&self, index: ComponentIndex) -> &[ComponentIndex] {
        self.get(index).map(Component::children).unwrap_or(&[])
    }

    pub fn roots(&self) -> &[ComponentIndex] {
        &self.roots
    }

    /// The root node of access port `port`.
    pub fn access_port_root(&self, port: u8) -> Option<ComponentIndex> {
        self.roots
            .iter()
            .copied()
            .find(|root| self.get(*root).map(Component::access_port) == Some(port))
    }

    /// All live components, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentIndex, &Component)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| node.as_ref().map(|node| (ComponentIndex(i), node)))
    }

    /// The first component in the subtree of `from` (pre-order, `from` included)
    /// for which `predicate` holds.
    pub fn find_component(
        &self,
        from: ComponentIndex,
        mut predicate: impl FnMut(&Component) -> bool,
    ) -> Option<ComponentIndex> {
        self.find_in_subtree(from, None, &mut predicate)
    }

    fn find_in_subtree(
        &self,
        from: ComponentIndex,
        skip: Option<ComponentIndex>,
        predicate: &mut dyn FnMut(&Component) -> bool,
    ) -> Option<ComponentIndex> {
        let mut stack = vec![from];

        while let Some(index) = stack.pop() {
            if Some(index) == skip {
                continue;
            }

            let Some(component) = self.get(index) else {
                continue;
            };

            if predicate(component) {
                return Some(index);
            }

            stack.extend(component.children.iter().rev());
        }

        None
    }

    /// All components of type `ty` in the subtree of `from`, in pre-order.
    pub fn find_components_by_type(
        &self,
        from: ComponentIndex,
        ty: ComponentType,
    ) -> Vec<ComponentIndex> {
        let mut found = vec![];
        let mut stack = vec![from];

        while let Some(index) = stack.pop() {
            if let Some(component) = self.get(index) {
                if component.component_type() == ty {
                    found.push(index);
                }
                stack.extend(component.children.iter().rev());
            }
        }

        found
    }

    /// Find the component of type `ty` closest to `from`.
    ///
    /// The subtree of `from` is searched first, then the subtree of each ancestor
    /// in turn, up to the root.
    pub fn find_by_type_towards_root(
        &self,
        from: ComponentIndex,
        ty: ComponentType,
    ) -> Option<ComponentIndex> {
        let mut predicate = |component: &Component| component.component_type() == ty;

        if let Some(found) = self.find_in_subtree(from, None, &mut predicate) {
            return Some(found);
        }

        let mut searched = from;
        let mut current = self.parent(from);

        while let Some(ancestor) = current {
            if let Some(found) = self.find_in_subtree(ancestor, Some(searched), &mut predicate) {
                return Some(found);
            }
            searched = ancestor;
            current = self.parent(ancestor);
        }

        None
    }

    /// Render the subtree of `index` for diagnostics.
    pub fn to_termtree(&self, index: ComponentIndex) -> Tree<String> {
        let Some(component) = self.get(index) else {
            return Tree::new(format!("{index:?} <removed>"));
        };

        let mut tree = Tree::new(component.describe());
        for child in &component.children {
            tree.push(self.to_termtree(*child));
        }

        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::arm::memory::ApMemory;
    use crate::probe::fake_probe::{
        FakeAccessPort, FakeProbe, CORTEX_M4_ROM_PID, GENERIC_IP_CLASS, ROM_TABLE_CLASS,
    };
    use pretty_assertions::assert_eq;

    fn discover(port: FakeAccessPort) -> (ComponentTree, ComponentIndex) {
        let mut probe = FakeProbe::new();
        probe.add_access_port(port);
        let mut ap = MemoryAp::new(&mut probe, 0).unwrap();
        let registry = MatcherRegistry::with_builtin();

        let mut tree = ComponentTree::new();
        let root = tree.add_access_port(&ap).unwrap();
        let mut memory = ApMemory::new(&mut probe, &mut ap);
        tree.probe_children(&mut memory, &registry, root).unwrap();

        (tree, root)
    }

    fn assert_links_consistent(tree: &ComponentTree) {
        for (index, component) in tree.iter() {
            if let Some(parent) = component.parent() {
                assert!(
                    tree.children(parent).contains(&index),
                    "{index:?} missing from the children of its parent"
                );
            }
            for child in component.children() {
                assert_eq!(tree.parent(*child), Some(index));
            }
        }
    }

    #[test]
    fn cortex_m4_tree() {
        let (tree, root) = discover(FakeAccessPort::cortex_m4());

        let cpu = tree.children(root)[0];
        assert_eq!(tree.children(root).len(), 1);
        assert_eq!(tree.get(cpu).unwrap().base_address(), 0xE00F_F000);
        assert_eq!(tree.get(cpu).unwrap().subtype(), Some("Cortex-M4"));

        let types: Vec<_> = tree
            .children(cpu)
            .iter()
            .map(|c| tree.get(*c).unwrap().component_type())
            .collect();
        assert_eq!(
            types,
            vec![
                ComponentType::Scb,
                ComponentType::Dwt,
                ComponentType::Fpb,
                ComponentType::Itm,
                ComponentType::Tpiu
            ]
        );

        assert_links_consistent(&tree);
    }

    #[test]
    fn empty_table_has_no_children() {
        let port = FakeAccessPort::ahb3()
            .with_base(0xE00F_F003)
            .with_component(0xE00F_F000, ROM_TABLE_CLASS, 0);

        let (tree, root) = discover(port);
        let table = tree.children(root)[0];

        assert_eq!(tree.get(table).unwrap().component_type(), ComponentType::RomTable);
        assert!(tree.children(table).is_empty());
    }

    #[test]
    fn non_rom_table_is_a_leaf() {
        // Looks like a table full of entries, but the class says generic IP.
        let port = FakeAccessPort::ahb3()
            .with_base(0xE00F_F003)
            .with_rom_table(0xE00F_F000, &[0xFFF0_F003])
            .with_component(0xE00F_F000, GENERIC_IP_CLASS, 0);

        let (tree, root) = discover(port);
        let node = tree.children(root)[0];

        assert!(tree.children(node).is_empty());
        assert_eq!(tree.get(node).unwrap().component_type(), ComponentType::Generic);
    }

    #[test]
    fn self_reference_is_skipped() {
        let port = FakeAccessPort::ahb3()
            .with_base(0xE00F_F003)
            .with_rom_table(0xE00F_F000, &[0x0000_0003, 0xFFF0_F003])
            .with_component(0xE00F_F000, ROM_TABLE_CLASS, CORTEX_M4_ROM_PID)
            .with_component(0xE000_E000, GENERIC_IP_CLASS, 0x0000_0004_000B_B00C);

        let (tree, root) = discover(port);
        let table = tree.children(root)[0];

        assert_eq!(tree.children(table).len(), 1);
        assert_eq!(tree.iter().count(), 3);
    }

    #[test]
    fn reprobe_rebuilds_children() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::cortex_m4());
        let mut ap = MemoryAp::new(&mut probe, 0).unwrap();
        let registry = MatcherRegistry::with_builtin();

        let mut tree = ComponentTree::new();
        let root = tree.add_access_port(&ap).unwrap();
        let mut memory = ApMemory::new(&mut probe, &mut ap);
        tree.probe_children(&mut memory, &registry, root).unwrap();
        let cpu = tree.children(root)[0];
        let before = tree.iter().count();

        tree.probe_children(&mut memory, &registry, cpu).unwrap();
        tree.probe_children(&mut memory, &registry, cpu).unwrap();

        assert_eq!(tree.iter().count(), before);
        assert_eq!(tree.children(cpu).len(), 5);
        assert_links_consistent(&tree);
    }

    #[test]
    fn unaligned_base_is_rejected() {
        let mut probe = FakeProbe::new();
        probe.add_access_port(FakeAccessPort::cortex_m4());
        let mut ap = MemoryAp::new(&mut probe, 0).unwrap();
        let registry = MatcherRegistry::with_builtin();

        let mut tree = ComponentTree::new();
        let root = tree.add_access_port(&ap).unwrap();
        let mut memory = ApMemory::new(&mut probe, &mut ap);

        let result = tree.probe(&mut memory, &registry, root, 0xFFFF_F010);

        assert!(matches!(
            result,
            Err(RomTableError::UnalignedComponent(0xFFFF_F010))
        ));
        assert!(tree.children(root).is_empty());
        assert_eq!(tree.iter().count(), 1);
    }

    #[test]
    fn search_towards_root_finds_sibling() {
        let (tree, root) = discover(FakeAccessPort::cortex_m4());
        let cpu = tree.children(root)[0];
        let itm = tree.find_components_by_type(root, ComponentType::Itm)[0];

        let scb = tree
            .find_by_type_towards_root(itm, ComponentType::Scb)
            .unwrap();
        assert_eq!(tree.get(scb).unwrap().base_address(), 0xE000_E000);
        assert_eq!(tree.find_by_type_towards_root(cpu, ComponentType::Scb), Some(scb));
        assert_eq!(tree.find_by_type_towards_root(scb, ComponentType::Core), Some(cpu));
    }

    #[test]
    fn find_component_by_predicate() {
        let (tree, root) = discover(FakeAccessPort::cortex_m4());

        let dwt = tree
            .find_component(root, |c| c.base_address() == 0xE000_1000)
            .unwrap();
        assert_eq!(tree.get(dwt).unwrap().component_type(), ComponentType::Dwt);
        assert!(tree.find_component(root, |c| c.base_address() == 0x1234_5000).is_none());
    }

    #[test]
    fn termtree_lists_components() {
        let (tree, root) = discover(FakeAccessPort::cortex_m4());

        let rendered = tree.to_termtree(root).to_string();

        assert!(rendered.starts_with("Access port 0"));
        assert!(rendered.contains("Core (Cortex-M4) at 0xe00ff000"));
        assert!(rendered.contains("Tpiu (Cortex-M4 TPIU) at 0xe0040000"));
    }
}
