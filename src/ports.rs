//! Collaborator ports (port/adapter pattern)
//!
//! The engine is a pure in-memory scheduling layer; everything that touches
//! disk formats or actual devices is consumed through the traits below. The
//! surrounding storage engine implements them as adapters.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Read-Ahead Engine                     │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │              Ports (Traits)                         │  │
//! │  │  BlockMap  │  BlockReader  │  NodeParser            │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │   Storage Engine (chunk tree, block I/O, node codec)      │
//! └──────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::{DeviceId, MappedBlock, ParsedNode};

/// Physical placement resolution for logical addresses.
///
/// Implementations map a logical block address to the block-group span that
/// contains it and the ordered list of devices holding a mirror of that
/// span. The mirror order must be stable for a given address.
pub trait BlockMap: Send + Sync {
    /// Resolve the placement of `logical`.
    ///
    /// Returns an error when the address is not mapped at all; an empty
    /// mirror list is treated the same way by the caller.
    fn map(&self, logical: u64) -> Result<MappedBlock>;
}

/// Asynchronous block fetch.
#[async_trait]
pub trait BlockReader: Send + Sync {
    /// Read the block at `logical` from `device`.
    ///
    /// `mirror` is the position of `device` within the extent's resolved
    /// mirror list, for implementations that address copies by index.
    /// Structural-corruption detection belongs here: a block that fails
    /// validation surfaces as `Err`, exactly like an I/O error.
    async fn read(&self, device: DeviceId, logical: u64, mirror: usize) -> Result<Bytes>;
}

/// Tree-block decode.
///
/// Assumed infallible given a structurally valid buffer; validity failures
/// are the [`BlockReader`]'s business, not the parser's.
pub trait NodeParser: Send + Sync {
    fn parse(&self, buf: &Bytes) -> ParsedNode;
}
