//! treeahead - Asynchronous tree read-ahead for mirrored copy-on-write storage
//!
//! Given a key range on a named tree root, the engine walks the tree
//! asynchronously, prefetches every block that will eventually satisfy the
//! range, and fans the reads out across devices and mirrors so that no
//! device services more concurrent reads than it can sustain and mirrored
//! copies of a block are never read redundantly. Callers either wait for
//! completion or detach and let the prefetch finish in the background.
//!
//! # Architecture
//!
//! ```text
//! Caller ──► Control Handle ──► Extent Index (global dedup)
//!                                     │
//!                    per-device Zones ┴ Extents
//!                                     │
//!            Dispatch Loop ──► Zone Scheduler ──► BlockReader
//!                   ▲                                  │
//!                   └────────── Completion Hook ◄──────┘
//! ```
//!
//! The tree-block format, physical placement, and the block I/O primitive
//! are consumed through the ports in [`ports`]; this crate is a pure
//! in-memory scheduling layer. Read-ahead is a hint: failures prune the
//! affected branch and are never fatal to the surrounding storage engine.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::new(EngineConfig::default(), map, reader, parser)?;
//! engine.add_device(DeviceId(0));
//!
//! let control = engine.start(root_cursor, Key(0), Key::MAX)?;
//! engine.wait(control).await; // or engine.detach(control)
//! ```
//!
//! # Modules
//!
//! - [`config`] - Engine configuration
//! - [`control`] - Caller-visible prefetch handles
//! - [`engine`] - Entry points, dispatch loop, completion hook
//! - [`error`] - Error types
//! - [`extent`] - In-flight read-ahead units
//! - [`index`] - Global deduplication index
//! - [`ports`] - Collaborator traits
//! - [`scheduler`] - Per-device greedy zone scheduler
//! - [`stats`] - Engine counters
//! - [`zone`] - Block-group spans per device

pub mod config;
pub mod control;
pub mod device;
pub mod engine;
pub mod error;
pub mod extent;
pub mod index;
pub mod ports;
pub mod scheduler;
pub mod stats;
pub mod types;
pub mod zone;

// Re-export commonly used types
pub use config::EngineConfig;
pub use control::Control;
pub use engine::{DeviceBacklog, Engine};
pub use error::{Error, Result};
pub use ports::{BlockMap, BlockReader, NodeParser};
pub use stats::EngineStatsSnapshot;
pub use types::{DeviceId, Key, MappedBlock, NodeEntry, ParsedNode, RootCursor, MAX_MIRRORS};
