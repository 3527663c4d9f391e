//! Resolution of discovered components onto specialized component kinds.

use serde::{Deserialize, Serialize};

use super::{Component, ComponentKind, ComponentLocation, CoreState};
use crate::architecture::arm::core::CoreVariant;
use crate::config::ChipDescription;

/// Identity-only matchers score this much.
pub const IDENTITY_SCORE: u32 = 100;
/// Matchers that also match the location of the component score this much.
pub const LOCATION_SCORE: u32 = 2 * IDENTITY_SCORE;

const ARM_CLASS: u32 = 0xB105_000D;
/// Compares the preamble, ignoring the class nibble.
const ANY_CLASS_MASK: u32 = 0xFFFF_0FFF;
const ROM_TABLE_CLASS: u32 = 0xB105_100D;
const GENERIC_IP_CLASS: u32 = 0xB105_E00D;
const CORESIGHT_CLASS: u32 = 0xB105_900D;

/// Part number, JEP106 identity, JEP106 flag and continuation code.
const PART_AND_DESIGNER_MASK: u64 = 0x0000_000F_000F_FFFF;

/// The peripheral id of an ARM designed part.
const fn arm_part(part: u64) -> u64 {
    0x0000_0004_000B_B000 | part
}

/// Builds the specialized component for a matched identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentFactory {
    Generic,
    RomTable,
    CortexM0,
    CortexM0Plus,
    CortexM3,
    CortexM4,
    CortexM7,
    Scb,
    Dwt,
    Fpb,
    Itm,
    Tpiu,
}

impl ComponentFactory {
    pub fn build(self) -> ComponentKind {
        let core = |variant| ComponentKind::Core(CoreState::new(variant));

        match self {
            ComponentFactory::Generic => ComponentKind::Generic,
            ComponentFactory::RomTable => ComponentKind::RomTable,
            ComponentFactory::CortexM0 => core(CoreVariant::CortexM0),
            ComponentFactory::CortexM0Plus => core(CoreVariant::CortexM0Plus),
            ComponentFactory::CortexM3 => core(CoreVariant::CortexM3),
            ComponentFactory::CortexM4 => core(CoreVariant::CortexM4),
            ComponentFactory::CortexM7 => core(CoreVariant::CortexM7),
            ComponentFactory::Scb => ComponentKind::Scb,
            ComponentFactory::Dwt => ComponentKind::Dwt,
            ComponentFactory::Fpb => ComponentKind::Fpb,
            ComponentFactory::Itm => ComponentKind::Itm,
            ComponentFactory::Tpiu => ComponentKind::Tpiu,
        }
    }
}

/// Matches component identities (and optionally a location) to a [`ComponentFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pub class_id: u32,
    pub class_id_mask: u32,
    pub peripheral_id: u64,
    pub peripheral_id_mask: u64,
    pub location: Option<ComponentLocation>,
    pub factory: ComponentFactory,
    pub subtype: String,
}

impl Matcher {
    pub fn new(
        class_id: u32,
        class_id_mask: u32,
        peripheral_id: u64,
        peripheral_id_mask: u64,
        factory: ComponentFactory,
        subtype: impl Into<String>,
    ) -> Self {
        Matcher {
            class_id,
            class_id_mask,
            peripheral_id,
            peripheral_id_mask,
            location: None,
            factory,
            subtype: subtype.into(),
        }
    }

    /// An ARM designed part, matched on its part number.
    fn arm(class_id: u32, part: u64, factory: ComponentFactory, subtype: &str) -> Self {
        Matcher::new(
            class_id,
            0xFFFF_FFFF,
            arm_part(part),
            PART_AND_DESIGNER_MASK,
            factory,
            subtype,
        )
    }

    /// Only match components at `location`.
    pub fn at(mut self, location: ComponentLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Score this matcher against a component.
    ///
    /// Both identity words have to match for a nonzero score. A matcher bound to a
    /// location scores double at that location and nothing anywhere else.
    pub fn score(&self, component: &Component) -> u32 {
        let id = component.id();

        let identity_matches = (id.class_id & self.class_id_mask)
            == (self.class_id & self.class_id_mask)
            && (id.peripheral_id & self.peripheral_id_mask)
                == (self.peripheral_id & self.peripheral_id_mask);

        if !identity_matches {
            return 0;
        }

        match self.location {
            None => IDENTITY_SCORE,
            Some(location) if location == component.location() => LOCATION_SCORE,
            Some(_) => 0,
        }
    }
}

/// An ordered set of [`Matcher`]s.
///
/// Registration order matters: when two matchers score the same, the one registered
/// first wins.
#[derive(Debug, Clone, Default)]
pub struct MatcherRegistry {
    matchers: Vec<Matcher>,
}

impl MatcherRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the ARM Cortex-M parts and the known vendor overrides.
    pub fn with_builtin() -> Self {
        use ComponentFactory as F;

        let mut registry = Self::new();

        // Vendor ROM tables that stand in for the ARM core ROM table.
        registry.register(
            Matcher::new(
                ROM_TABLE_CLASS,
                0xFFFF_FFFF,
                0x0000_0000_000A_0468,
                PART_AND_DESIGNER_MASK,
                F::CortexM4,
                "STM32G4",
            )
            .at(ComponentLocation::new(0, 0xE00F_F000)),
        );
        registry.register(
            Matcher::new(
                ROM_TABLE_CLASS,
                0xFFFF_FFFF,
                0x0000_0000_000A_0495,
                PART_AND_DESIGNER_MASK,
                F::CortexM4,
                "STM32WB",
            )
            .at(ComponentLocation::new(0, 0xE00F_F000)),
        );

        // Core ROM tables.
        registry.register(Matcher::arm(ROM_TABLE_CLASS, 0x471, F::CortexM0, "Cortex-M0"));
        registry.register(Matcher::arm(ROM_TABLE_CLASS, 0x4C0, F::CortexM0Plus, "Cortex-M0+"));
        registry.register(Matcher::arm(ROM_TABLE_CLASS, 0x4C3, F::CortexM3, "Cortex-M3"));
        registry.register(Matcher::arm(ROM_TABLE_CLASS, 0x4C4, F::CortexM4, "Cortex-M4"));
        registry.register(Matcher::arm(ROM_TABLE_CLASS, 0x4C7, F::CortexM7, "Cortex-M7"));

        // System control space.
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x008, F::Scb, "ARMv6-M SCS"));
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x000, F::Scb, "Cortex-M3 SCS"));
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x00C, F::Scb, "ARMv7-M SCS"));

        // Debug units.
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x00A, F::Dwt, "ARMv6-M DWT"));
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x002, F::Dwt, "ARMv7-M DWT"));
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x00B, F::Fpb, "ARMv6-M BPU"));
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x003, F::Fpb, "ARMv7-M FPB"));
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x00E, F::Fpb, "Cortex-M7 FPB"));
        registry.register(Matcher::arm(GENERIC_IP_CLASS, 0x001, F::Itm, "ITM"));
        registry.register(Matcher::arm(CORESIGHT_CLASS, 0x923, F::Tpiu, "Cortex-M3 TPIU"));
        registry.register(Matcher::arm(CORESIGHT_CLASS, 0x9A1, F::Tpiu, "Cortex-M4 TPIU"));

        // Any other ROM table. Registered last so core ROM tables win the tie.
        registry.register(Matcher::new(
            ROM_TABLE_CLASS,
            0xFFFF_FFFF,
            0,
            0,
            F::RomTable,
            "ROM table",
        ));

        registry
    }

    pub fn register(&mut self, matcher: Matcher) {
        self.matchers.push(matcher);
    }

    /// Register the component overrides of a chip.
    ///
    /// Overrides are bound to their location, so they outrank the builtin
    /// identity-only matchers wherever they apply.
    pub fn register_chip(&mut self, chip: &ChipDescription) {
        for component in &chip.components {
            self.register(
                Matcher::new(
                    component.class_id.unwrap_or(ARM_CLASS),
                    component.class_id_mask.unwrap_or(ANY_CLASS_MASK),
                    component.peripheral_id,
                    component.peripheral_id_mask,
                    component.factory,
                    chip.name.clone(),
                )
                .at(ComponentLocation::new(
                    component.access_port,
                    component.base_address,
                )),
            );
        }
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    /// The matcher with the highest nonzero score for `component`.
    pub fn resolve(&self, component: &Component) -> Option<&Matcher> {
        let mut best: Option<(&Matcher, u32)> = None;

        for matcher in &self.matchers {
            let score = matcher.score(component);

            // Strictly greater, so earlier registrations win ties.
            if score > best.map(|(_, s)| s).unwrap_or(0) {
                best = Some((matcher, score));
            }
        }

        best.map(|(matcher, _)| matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::arm::component::ComponentType;
    use crate::architecture::arm::memory::ComponentId;
    use crate::config::ComponentOverride;
    use pretty_assertions::assert_eq;

    const M4_ROM: u64 = 0x0000_0004_000B_B4C4;

    fn component(port: u8, base: u32, class_id: u32, pid: u64) -> Component {
        Component::new(
            None,
            ComponentLocation::new(port, base),
            ComponentId::new(class_id, pid),
        )
    }

    #[test]
    fn identity_match_scores_100() {
        let matcher = Matcher::arm(ROM_TABLE_CLASS, 0x4C4, ComponentFactory::CortexM4, "M4");

        assert_eq!(matcher.score(&component(0, 0xE00F_F000, ROM_TABLE_CLASS, M4_ROM)), 100);
        assert_eq!(matcher.score(&component(0, 0xE00F_F000, GENERIC_IP_CLASS, M4_ROM)), 0);
        assert_eq!(matcher.score(&component(0, 0xE00F_F000, ROM_TABLE_CLASS, 0xA0468)), 0);
    }

    #[test]
    fn location_bound_match_scores_200_only_at_its_location() {
        let matcher = Matcher::new(
            ROM_TABLE_CLASS,
            0xFFFF_FFFF,
            0xA0468,
            PART_AND_DESIGNER_MASK,
            ComponentFactory::CortexM4,
            "STM32G4",
        )
        .at(ComponentLocation::new(0, 0xE00F_F000));

        assert_eq!(matcher.score(&component(0, 0xE00F_F000, ROM_TABLE_CLASS, 0xA0468)), 200);
        assert_eq!(matcher.score(&component(1, 0xE00F_F000, ROM_TABLE_CLASS, 0xA0468)), 0);
        assert_eq!(matcher.score(&component(0, 0xE004_2000, ROM_TABLE_CLASS, 0xA0468)), 0);
    }

    #[test]
    fn location_bound_matcher_outranks_identity_match() {
        let mut registry = MatcherRegistry::new();
        registry.register(Matcher::new(
            ROM_TABLE_CLASS,
            0xFFFF_FFFF,
            0,
            0,
            ComponentFactory::RomTable,
            "generic",
        ));
        registry.register(
            Matcher::new(
                ROM_TABLE_CLASS,
                0xFFFF_FFFF,
                0,
                0,
                ComponentFactory::CortexM4,
                "vendor",
            )
            .at(ComponentLocation::new(0, 0xE00F_F000)),
        );

        let resolved = registry
            .resolve(&component(0, 0xE00F_F000, ROM_TABLE_CLASS, 0xA0468))
            .unwrap();
        assert_eq!(resolved.subtype, "vendor");

        let resolved = registry
            .resolve(&component(0, 0xE004_2000, ROM_TABLE_CLASS, 0xA0468))
            .unwrap();
        assert_eq!(resolved.subtype, "generic");
    }

    #[test]
    fn ties_go_to_the_first_registration() {
        let registry = MatcherRegistry::with_builtin();

        let resolved = registry
            .resolve(&component(0, 0xE00F_F000, ROM_TABLE_CLASS, M4_ROM))
            .unwrap();

        // The generic ROM table matcher scores 100 as well.
        assert_eq!(resolved.subtype, "Cortex-M4");
        assert_eq!(resolved.factory.build().component_type(), ComponentType::Core);
    }

    #[test]
    fn unknown_component_stays_generic() {
        let registry = MatcherRegistry::with_builtin();

        assert!(registry
            .resolve(&component(0, 0xE004_2000, CORESIGHT_CLASS, arm_part(0x925)))
            .is_none());
    }

    #[test]
    fn stm32g4_override_wins_over_builtin() {
        let registry = MatcherRegistry::with_builtin();

        let resolved = registry
            .resolve(&component(0, 0xE00F_F000, ROM_TABLE_CLASS, 0xA0468))
            .unwrap();

        assert_eq!(resolved.subtype, "STM32G4");
        assert_eq!(resolved.factory, ComponentFactory::CortexM4);
    }

    #[test]
    fn chip_overrides_are_location_bound() {
        let chip = ChipDescription {
            name: "custom".to_string(),
            components: vec![ComponentOverride {
                access_port: 1,
                base_address: 0xF000_0000,
                class_id: None,
                class_id_mask: None,
                peripheral_id: 0x0000_0000_0001_2345,
                peripheral_id_mask: 0xFFFF,
                factory: ComponentFactory::CortexM0Plus,
            }],
        };

        let mut registry = MatcherRegistry::with_builtin();
        registry.register_chip(&chip);

        let resolved = registry
            .resolve(&component(1, 0xF000_0000, ROM_TABLE_CLASS, 0x2345))
            .unwrap();
        assert_eq!(resolved.factory, ComponentFactory::CortexM0Plus);
        assert_eq!(resolved.subtype, "custom");
    }
}
