//! Core value objects shared across the engine
//!
//! Keys, device identities and the data records exchanged with the
//! collaborator traits in [`crate::ports`]. These are deliberately thin:
//! the tree-block binary format and the physical placement logic live
//! outside this crate.

use serde::{Deserialize, Serialize};

/// Fixed upper bound on the number of mirrors tracked per extent.
///
/// Placement results wider than this are truncated; the scheduler never
/// needs more than a handful of copies to choose from.
pub const MAX_MIRRORS: usize = 5;

// =============================================================================
// Keys
// =============================================================================

/// An opaque, totally ordered tree key.
///
/// The engine never interprets keys beyond comparison; the surrounding
/// storage engine owns their structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub u64);

impl Key {
    /// Smallest possible key.
    pub const MIN: Key = Key(u64::MIN);

    /// Largest possible key; used as the root's upper bound.
    pub const MAX: Key = Key(u64::MAX);
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Devices
// =============================================================================

/// Identifier of one physical device in the array (value object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl DeviceId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev-{}", self.0)
    }
}

// =============================================================================
// Tree navigation records
// =============================================================================

/// Snapshot of a tree root at the time a prefetch is started.
///
/// The caller resolves this from its own root bookkeeping; the engine only
/// needs enough to seed the walk.
#[derive(Debug, Clone, Copy)]
pub struct RootCursor {
    /// Owning root identifier (which tree this is)
    pub root: u64,

    /// Logical address of the root block
    pub addr: u64,

    /// Generation stamp of the root block
    pub generation: u64,

    /// Tree level of the root block (0 = leaf)
    pub level: u8,
}

/// One child pointer inside a parsed internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    /// First key reachable through this child
    pub key: Key,

    /// Logical address of the child block
    pub addr: u64,

    /// Generation stamp stored in the pointer
    pub generation: u64,
}

/// Decoded form of one tree block, as produced by [`crate::ports::NodeParser`].
///
/// Leaves decode with an empty entry list; the engine never descends past
/// level 0.
#[derive(Debug, Clone)]
pub struct ParsedNode {
    /// Tree level of the block (0 = leaf)
    pub level: u8,

    /// Generation stamp of the block itself
    pub generation: u64,

    /// Child pointers, in key order
    pub entries: Vec<NodeEntry>,
}

// =============================================================================
// Physical placement
// =============================================================================

/// Placement of one logical block, as resolved by [`crate::ports::BlockMap`].
#[derive(Debug, Clone)]
pub struct MappedBlock {
    /// Start of the containing block-group span (inclusive)
    pub zone_start: u64,

    /// End of the containing block-group span (inclusive)
    pub zone_end: u64,

    /// Devices holding a copy of this span, in mirror order
    pub mirrors: Vec<DeviceId>,
}

impl MappedBlock {
    /// Span covered by the containing block group.
    pub fn span(&self) -> (u64, u64) {
        (self.zone_start, self.zone_end)
    }
}

// =============================================================================
// Tests
// =============================================================================
