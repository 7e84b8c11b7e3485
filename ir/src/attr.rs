//! Typed operation attributes.
//!
//! Passes communicate through a closed set of attributes: the DMA channel
//! id, the loop tags stamped by herd lowering, the herd symbol name and the
//! tiling-stage marker. Each attribute kind appears at most once per
//! operation, so [`AttrSet`] behaves like a tiny typed map.

use smallvec::SmallVec;

// ============================================================================
// ATTRIBUTE KINDS
// ============================================================================

/// Tag stamped on the loop pair produced by herd-launch lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum HerdLoopTag {
    /// Loop over the first herd dimension.
    Outer,
    /// Loop over the second herd dimension, nested in the outer one.
    Inner,
}

/// Tiling progress marker for compute operations.
///
/// The codegen pipelines treat this as a linear state machine: an operation
/// starts with no marker, every tiling or promotion rewrite guards on the
/// current marker and stamps the next one, and all markers are stripped once
/// the pipeline for that operation finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TilingStage {
    /// Tiled down to the fast tier.
    L1,
    /// Tiled for the intermediate tier.
    L2,
    /// Partitioned across the herd.
    Herd,
    /// Awaiting promotion into the intermediate tier.
    PromoteL2,
    /// Awaiting promotion of the herd-level tiles.
    PromoteHerd,
    /// Operand promotion done.
    Promoted,
}

/// One typed attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    /// DMA channel id.
    Id(u32),
    /// Herd-loop tag.
    HerdLoop(HerdLoopTag),
    /// Symbol name of the launched herd.
    SymName(String),
    /// Tiling-stage marker.
    Stage(TilingStage),
}

#[derive(PartialEq)]
enum AttrKey {
    Id,
    HerdLoop,
    SymName,
    Stage,
}

impl Attr {
    fn key(&self) -> AttrKey {
        match self {
            Self::Id(_) => AttrKey::Id,
            Self::HerdLoop(_) => AttrKey::HerdLoop,
            Self::SymName(_) => AttrKey::SymName,
            Self::Stage(_) => AttrKey::Stage,
        }
    }
}

// ============================================================================
// ATTRIBUTE SET
// ============================================================================

/// Attribute set holding at most one attribute per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrSet(SmallVec<[Attr; 2]>);

impl AttrSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn set(&mut self, attr: Attr) {
        let key = attr.key();
        if let Some(slot) = self.0.iter_mut().find(|a| a.key() == key) {
            *slot = attr;
        } else {
            self.0.push(attr);
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.0.iter().find_map(|a| match a {
            Attr::Id(id) => Some(*id),
            _ => None,
        })
    }

    pub fn set_id(&mut self, id: u32) {
        self.set(Attr::Id(id));
    }

    pub fn herd_loop(&self) -> Option<HerdLoopTag> {
        self.0.iter().find_map(|a| match a {
            Attr::HerdLoop(tag) => Some(*tag),
            _ => None,
        })
    }

    pub fn set_herd_loop(&mut self, tag: HerdLoopTag) {
        self.set(Attr::HerdLoop(tag));
    }

    pub fn sym_name(&self) -> Option<&str> {
        self.0.iter().find_map(|a| match a {
            Attr::SymName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn set_sym_name(&mut self, name: impl Into<String>) {
        self.set(Attr::SymName(name.into()));
    }

    pub fn stage(&self) -> Option<TilingStage> {
        self.0.iter().find_map(|a| match a {
            Attr::Stage(stage) => Some(*stage),
            _ => None,
        })
    }

    pub fn set_stage(&mut self, stage: TilingStage) {
        self.set(Attr::Stage(stage));
    }

    /// Remove the tiling-stage marker. True if one was present.
    pub fn clear_stage(&mut self) -> bool {
        let before = self.0.len();
        self.0.retain(|a| !matches!(a, Attr::Stage(_)));
        self.0.len() != before
    }
}
