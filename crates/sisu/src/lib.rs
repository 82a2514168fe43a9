//! Sisu - browse AWS resources as a mounted filesystem.
//!
//! Sisu exposes cloud resources (S3 objects, SSM parameters, IAM entities,
//! EC2 instances, VPCs, Lambda functions) as a POSIX-style tree so ordinary
//! tools - `ls`, `cat`, `grep`, `diff` - can work on them without bespoke
//! CLIs. The tree below the mount root is always
//! `profile/region/service/...`, with the `global` sentinel standing in for
//! the region of region-independent services.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let profiles = sisu::config::load_profiles();
//!     let engine = Arc::new(sisu::fs::Engine::new(profiles, vec![]));
//!     let handle = sisu::fs::mount(
//!         engine,
//!         tokio::runtime::Handle::current(),
//!         Path::new("/tmp/sisu-mnt"),
//!     )?;
//!     // ... browse the mount ...
//!     handle.unmount();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
mod error;
pub mod fs;
pub mod provider;

pub use error::{Error, Result};
