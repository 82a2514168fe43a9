//! The virtual filesystem.
//!
//! Layers, kernel side down:
//! - `fuse`: inode-based FUSE callbacks bridged onto the async engine
//! - `engine`: path-based operations over the namespace skeleton and overlays
//! - `registry`: lazy per-`(profile, region, service)` provider construction
//! - `path`: the skeleton path split
//! - `handle`: read and write file handles

mod engine;
mod fuse;
mod handle;
mod path;
mod registry;

pub use engine::{Attr, Engine, FileKind};
pub use fuse::{mount, MountHandle, SisuFs};
pub use handle::{ReadHandle, WriteHandle};
pub use path::ParsedPath;
