//! Resource descriptors, as supplied by the catalog.

use serde::{Deserialize, Serialize};

/// Catalog identifier of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub i64);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Variant
// ---------------------------------------------------------------------------

/// How a resource is addressed and tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Addressed by page. Completion is binary.
    Paged,
    /// Addressed by list entry (names, sections). Completion is binary.
    ListBased,
    /// A counted invocation split across participants. Tracks remaining count.
    Countable,
    /// A shared goal every participant repeats in full. Tracks remaining count.
    Joint,
}

impl Variant {
    /// Whether chunks of this variant carry a progress counter.
    pub fn tracks_progress(self) -> bool {
        matches!(self, Variant::Countable | Variant::Joint)
    }

    /// Scaling semantics used when the descriptor does not set one explicitly.
    pub fn default_scaling(self) -> Scaling {
        match self {
            Variant::Paged | Variant::ListBased => Scaling::WholeCopy,
            Variant::Countable | Variant::Joint => Scaling::Counter,
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Variant::Paged => "paged",
            Variant::ListBased => "list_based",
            Variant::Countable => "countable",
            Variant::Joint => "joint",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Variant {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paged" => Ok(Variant::Paged),
            "list_based" => Ok(Variant::ListBased),
            "countable" => Ok(Variant::Countable),
            "joint" => Ok(Variant::Joint),
            _ => Err(crate::error::Error::Other(format!("unknown variant: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Scaling
// ---------------------------------------------------------------------------

/// What an allocation override means for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    /// Fixed-length text. An override is a number of full copies, and a
    /// participant's share wraps across copy boundaries.
    WholeCopy,
    /// Open-ended count. An override is the absolute target count.
    Counter,
}

impl std::fmt::Display for Scaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Scaling::WholeCopy => "whole_copy",
            Scaling::Counter => "counter",
        };
        write!(f, "{s}")
    }
}

/// Proportional arithmetic on a rounded virtual size, remapped onto the
/// real addressable units afterwards.
///
/// Units `1..=linear_boundary` map one to one; the virtual tail
/// `linear_boundary+1..=virtual_units` is stretched over the real tail
/// `linear_boundary+1..=total_units`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualSizing {
    pub virtual_units: u32,
    pub linear_boundary: u32,
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A unit of recitable content. Read-only to the allocation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    /// Symbolic code (e.g. "QURAN"). Matched case-insensitively.
    pub code: String,
    /// Display name.
    pub name: String,
    /// What one unit is called (page, section, count...).
    #[serde(default)]
    pub unit_name: Option<String>,
    pub variant: Variant,
    /// Canonical unit count of one copy.
    pub total_units: u32,
    /// Explicit scaling; falls back to the variant's default.
    #[serde(default)]
    pub scaling: Option<Scaling>,
    #[serde(default)]
    pub virtual_sizing: Option<VirtualSizing>,
}

impl ResourceDescriptor {
    pub fn new(id: i64, code: impl Into<String>, variant: Variant, total_units: u32) -> Self {
        let code = code.into();
        Self {
            id: ResourceId(id),
            name: code.clone(),
            code,
            unit_name: None,
            variant,
            total_units,
            scaling: None,
            virtual_sizing: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn unit_name(mut self, unit_name: impl Into<String>) -> Self {
        self.unit_name = Some(unit_name.into());
        self
    }

    pub fn scaling(mut self, scaling: Scaling) -> Self {
        self.scaling = Some(scaling);
        self
    }

    pub fn virtual_sizing(mut self, virtual_units: u32, linear_boundary: u32) -> Self {
        self.virtual_sizing = Some(VirtualSizing {
            virtual_units,
            linear_boundary,
        });
        self
    }

    /// Effective scaling semantics.
    pub fn effective_scaling(&self) -> Scaling {
        self.scaling.unwrap_or_else(|| self.variant.default_scaling())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_parses_its_display_form() {
        for v in [
            Variant::Paged,
            Variant::ListBased,
            Variant::Countable,
            Variant::Joint,
        ] {
            assert_eq!(v.to_string().parse::<Variant>().unwrap(), v);
        }
        assert!("scroll".parse::<Variant>().is_err());
    }

    #[test]
    fn explicit_scaling_overrides_variant_default() {
        let book = ResourceDescriptor::new(20, "BOOK", Variant::Paged, 210);
        assert_eq!(book.effective_scaling(), Scaling::WholeCopy);
        assert!(!book.variant.tracks_progress());

        let counted = ResourceDescriptor::new(21, "NAMES", Variant::Countable, 99)
            .scaling(Scaling::WholeCopy);
        assert_eq!(counted.effective_scaling(), Scaling::WholeCopy);
        assert!(counted.variant.tracks_progress());
    }
}
