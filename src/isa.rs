//! ISA tiers, optional extensions, and the profile a core is configured with.
//!
//! Every instruction definition declares the tier that introduced it and the
//! extension hardware (if any) it needs. A [`Profile`] describes one concrete
//! core; [`Profile::supports`] is the single availability check used when the
//! opcode map is built.

/// One of the four cumulative ISA revisions.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum Tier {
    /// The baseline revision.
    A,
    /// Revision A+ (a side branch: its additions do not carry into B).
    APlus,
    /// Revision B. Includes everything from A, but not the A+ additions.
    B,
    /// Revision C. Includes everything from B.
    C,
}
impl Tier {
    /// Whether a core at this tier executes instructions introduced at
    /// `introduced`.
    ///
    /// Tiers are cumulative (A ⊂ B ⊂ C) with one exception: A+ is a branch
    /// off A, so instructions introduced at A+ are only present on A+ cores,
    /// and A+ cores do not gain the B or C additions.
    pub fn includes(self, introduced: Tier) -> bool {
        match (self, introduced) {
            (_, Tier::A) => true,
            (Tier::APlus, Tier::APlus) => true,
            (Tier::B | Tier::C, Tier::B) => true,
            (Tier::C, Tier::C) => true,
            _ => false,
        }
    }
}
impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::A => f.write_str("ISA_A"),
            Tier::APlus => f.write_str("ISA_A+"),
            Tier::B => f.write_str("ISA_B"),
            Tier::C => f.write_str("ISA_C"),
        }
    }
}

/// An optional hardware extension an instruction may require.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Extension {
    /// The multiply-accumulate unit.
    Mac,
    /// The enhanced multiply-accumulate unit (implies [`Extension::Mac`]).
    Emac,
    /// Revision B of the enhanced multiply-accumulate unit (implies
    /// [`Extension::Emac`]). Declared for configuration purposes; no
    /// revision-B instructions are defined in the registry.
    EmacB,
    /// The hardware divide unit.
    Div,
    /// The floating-point unit. Declared for configuration purposes; no
    /// floating-point instructions are defined in the registry.
    Fpu,
    /// Supervisor debug/diagnostic instructions (WDEBUG, HALT as an
    /// instruction).
    Debug,
}

/// A set of [`Extension`]s.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct ExtensionSet(u8);
impl ExtensionSet {
    /// The empty set.
    pub const NONE: Self = Self(0);
    /// Just the MAC unit.
    pub const MAC: Self = Self(1 << 0);
    /// Just the EMAC unit.
    pub const EMAC: Self = Self(1 << 1);
    /// Just the revision-B EMAC unit.
    pub const EMAC_B: Self = Self(1 << 2);
    /// Just the divide unit.
    pub const DIV: Self = Self(1 << 3);
    /// Just the FPU.
    pub const FPU: Self = Self(1 << 4);
    /// Just the debug extension.
    pub const DEBUG: Self = Self(1 << 5);

    fn bit(ext: Extension) -> u8 {
        match ext {
            Extension::Mac => Self::MAC.0,
            Extension::Emac => Self::EMAC.0,
            Extension::EmacB => Self::EMAC_B.0,
            Extension::Div => Self::DIV.0,
            Extension::Fpu => Self::FPU.0,
            Extension::Debug => Self::DEBUG.0,
        }
    }
    /// Whether this set contains the given extension.
    ///
    /// Each multiply-accumulate revision subsumes the previous one's
    /// instruction set, so a set with EMAC_B also reports containing EMAC
    /// and MAC, and a set with EMAC also reports containing MAC.
    pub fn contains(self, ext: Extension) -> bool {
        let mac_units = self.0 & (Self::MAC.0 | Self::EMAC.0 | Self::EMAC_B.0);
        match ext {
            Extension::Mac => mac_units != 0,
            Extension::Emac => mac_units & (Self::EMAC.0 | Self::EMAC_B.0) != 0,
            _ => self.0 & Self::bit(ext) != 0,
        }
    }
    /// Adds an extension to the set.
    pub fn with(self, ext: Extension) -> Self {
        Self(self.0 | Self::bit(ext))
    }
}
impl std::ops::BitOr for ExtensionSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// The configuration of one concrete core: its tier plus its fitted
/// extensions.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Profile {
    /// The ISA revision of the core.
    pub tier: Tier,
    /// The extension units fitted to the core.
    pub extensions: ExtensionSet,
}
impl Profile {
    /// A baseline ISA_A core with no extensions.
    pub const BASE_A: Self = Profile { tier: Tier::A, extensions: ExtensionSet::NONE };
    /// A fully loaded ISA_C core with EMAC, divide, and debug units.
    pub const FULL_C: Self = Profile {
        tier: Tier::C,
        extensions: ExtensionSet(
            ExtensionSet::EMAC.0 | ExtensionSet::DIV.0 | ExtensionSet::DEBUG.0,
        ),
    };

    /// Whether this core executes an instruction introduced at `introduced`
    /// and requiring `required` extension hardware (if any).
    pub fn supports(self, introduced: Tier, required: Option<Extension>) -> bool {
        self.tier.includes(introduced)
            && required.map_or(true, |ext| self.extensions.contains(ext))
    }
}

/// Whether the given tier banks two stack pointers (user + supervisor).
///
/// ISA_A cores have a single A7 shared by both privilege levels; the later
/// revisions bank a second stack pointer that is swapped on privilege
/// transitions.
pub fn has_dual_sp(tier: Tier) -> bool {
    !matches!(tier, Tier::A)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_inclusion() {
        assert!(Tier::C.includes(Tier::A));
        assert!(Tier::C.includes(Tier::B));
        assert!(Tier::B.includes(Tier::A));
        // A+ is a branch: B/C do not pick it up, and A+ stays off B.
        assert!(!Tier::B.includes(Tier::APlus));
        assert!(!Tier::C.includes(Tier::APlus));
        assert!(Tier::APlus.includes(Tier::A));
        assert!(Tier::APlus.includes(Tier::APlus));
        assert!(!Tier::APlus.includes(Tier::B));
        assert!(!Tier::A.includes(Tier::B));
    }

    #[test]
    fn emac_subsumes_mac() {
        let exts = ExtensionSet::EMAC;
        assert!(exts.contains(Extension::Mac));
        assert!(exts.contains(Extension::Emac));
        assert!(!ExtensionSet::MAC.contains(Extension::Emac));
        // and revision B subsumes both earlier units
        let b = ExtensionSet::EMAC_B;
        assert!(b.contains(Extension::EmacB));
        assert!(b.contains(Extension::Emac));
        assert!(b.contains(Extension::Mac));
        assert!(!exts.contains(Extension::EmacB));
    }

    #[test]
    fn profile_supports() {
        assert!(Profile::FULL_C.supports(Tier::B, None));
        assert!(Profile::FULL_C.supports(Tier::A, Some(Extension::Emac)));
        assert!(!Profile::FULL_C.supports(Tier::APlus, None));
        assert!(!Profile::BASE_A.supports(Tier::A, Some(Extension::Mac)));
    }
}
