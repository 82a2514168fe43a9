//! The filesystem engine.
//!
//! Path-based core behind the FUSE adapter: attribute lookup, directory
//! listing, open/create/unlink/mkdir. The engine owns the fixed namespace
//! skeleton (`profile/region/service`), the overlay tables that make
//! in-flight writes and user-created directories visible, and the provider
//! registry everything deeper is routed through.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::config::{default_regions, GLOBAL_HOME_REGION, GLOBAL_REGION};
use crate::error::{Error, Result};
use crate::provider::{parent_of, Entry, Provider};

use super::handle::{ReadHandle, WriteHandle};
use super::path::ParsedPath;
use super::registry::Registry;

/// Services visible only under the `global` region sentinel.
const GLOBAL_SERVICES: &[&str] = &["iam", "s3"];

/// Services visible only under real regions.
const REGIONAL_SERVICES: &[&str] = &["ssm", "vpc", "lambda", "ec2"];

/// Services that accept write and delete.
const WRITABLE_SERVICES: &[&str] = &["s3", "ssm"];

/// Names shells and tools probe for; rejected without any backend call.
const IGNORED_NAMES: &[&str] = &[
    ".git",
    "HEAD",
    ".hg",
    ".svn",
    ".gitignore",
    ".gitmodules",
    ".DS_Store",
    "Thumbs.db",
];

fn is_writable(service: &str) -> bool {
    WRITABLE_SERVICES.contains(&service)
}

fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// What a path looks like to the kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub kind: FileKind,
    pub perm: u16,
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

impl Attr {
    fn dir(perm: u16) -> Self {
        Self {
            kind: FileKind::Directory,
            perm,
            size: 0,
            mtime: None,
        }
    }

    fn file(perm: u16, size: u64, mtime: Option<SystemTime>) -> Self {
        Self {
            kind: FileKind::File,
            perm,
            size,
            mtime,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// In-memory overlays over the provider-backed tree.
///
/// `pending` holds the live write handle for every created-but-unreleased
/// file; it is the sole owning reference to those handles. `virtual_dirs`
/// holds directories the user created that have no backing resource yet.
/// Both are lost on unmount.
#[derive(Default)]
pub struct Overlays {
    pub(crate) pending: HashMap<String, Arc<WriteHandle>>,
    pub(crate) virtual_dirs: HashSet<String>,
}

pub struct Engine {
    profiles: Vec<String>,
    regions: Vec<String>,
    pub(crate) registry: Registry,
    overlays: Arc<RwLock<Overlays>>,
}

impl Engine {
    /// Build an engine over the given profile and region sets. An empty
    /// region list falls back to the defaults.
    pub fn new(profiles: Vec<String>, regions: Vec<String>) -> Self {
        let regions = if regions.is_empty() {
            default_regions()
        } else {
            regions
        };
        Self {
            profiles,
            regions,
            registry: Registry::new(),
            overlays: Arc::new(RwLock::new(Overlays::default())),
        }
    }

    /// Route a parsed path to its provider, rewriting the `global` sentinel
    /// to the region global services are actually served from.
    async fn provider_for(&self, parsed: &ParsedPath<'_>) -> Result<Arc<dyn Provider>> {
        let region = if parsed.region == GLOBAL_REGION {
            GLOBAL_HOME_REGION
        } else {
            parsed.region
        };
        self.registry
            .provider(parsed.profile, region, parsed.service)
            .await
    }

    /// Whether `service` is listed under `region`.
    fn service_visible(&self, region: &str, service: &str) -> bool {
        if region == GLOBAL_REGION {
            GLOBAL_SERVICES.contains(&service)
        } else {
            REGIONAL_SERVICES.contains(&service)
        }
    }

    fn is_virtual_dir(&self, path: &str) -> bool {
        self.overlays.read().unwrap().virtual_dirs.contains(path)
    }

    /// Attribute lookup.
    pub async fn getattr(&self, path: &str) -> Result<Attr> {
        if path.is_empty() {
            return Ok(Attr::dir(0o777));
        }

        if IGNORED_NAMES.contains(&basename(path)) {
            return Err(Error::not_found(path));
        }

        // Overlays first: an in-flight write or a user-created directory
        // shadows whatever the provider would say.
        {
            let overlays = self.overlays.read().unwrap();
            if let Some(handle) = overlays.pending.get(path) {
                return Ok(Attr::file(0o666, handle.len(), None));
            }
            if overlays.virtual_dirs.contains(path) {
                return Ok(Attr::dir(0o777));
            }
        }

        let parsed = ParsedPath::parse(path).ok_or_else(|| Error::not_found(path))?;

        if parsed.region.is_empty() {
            if self.profiles.iter().any(|p| p == parsed.profile) {
                return Ok(Attr::dir(0o555));
            }
            return Err(Error::not_found(path));
        }

        if parsed.service.is_empty() {
            if parsed.region == GLOBAL_REGION || self.regions.iter().any(|r| r == parsed.region) {
                return Ok(Attr::dir(0o555));
            }
            return Err(Error::not_found(path));
        }

        if parsed.subpath.is_empty() {
            if self.service_visible(parsed.region, parsed.service) {
                let perm = if is_writable(parsed.service) { 0o755 } else { 0o555 };
                return Ok(Attr::dir(perm));
            }
            return Err(Error::not_found(path));
        }

        let provider = self.provider_for(&parsed).await?;
        let entry = provider.stat(parsed.subpath).await?;
        let writable = is_writable(parsed.service);
        if entry.is_dir {
            Ok(Attr::dir(if writable { 0o755 } else { 0o555 }))
        } else {
            let perm = if writable { 0o644 } else { 0o444 };
            Ok(Attr::file(perm, entry.size, entry.mtime))
        }
    }

    /// Directory listing.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        let mut entries = if path.is_empty() {
            self.profiles.iter().map(Entry::dir).collect()
        } else {
            let parsed = ParsedPath::parse(path).ok_or_else(|| Error::not_found(path))?;

            if parsed.region.is_empty() {
                let mut entries = vec![Entry::dir(GLOBAL_REGION)];
                entries.extend(self.regions.iter().map(Entry::dir));
                entries
            } else if parsed.service.is_empty() {
                let services: &[&str] = if parsed.region == GLOBAL_REGION {
                    GLOBAL_SERVICES
                } else {
                    REGIONAL_SERVICES
                };
                services.iter().map(|s| Entry::dir(*s)).collect()
            } else {
                let listing = match self.provider_for(&parsed).await {
                    Ok(provider) => provider.read_dir(parsed.subpath).await,
                    Err(err) => Err(err),
                };
                match listing {
                    Ok(entries) => entries,
                    // A user-created directory with no backing resource
                    // lists as empty rather than erroring.
                    Err(_) if self.is_virtual_dir(path) => Vec::new(),
                    Err(Error::Backend(msg)) => return Err(Error::Backend(msg)),
                    Err(err) => return Err(Error::Backend(err.to_string())),
                }
            }
        };

        self.merge_overlay_children(path, &mut entries);
        Ok(entries)
    }

    /// Add overlay children of `path` that the backing listing cannot know
    /// about: in-flight writes and virtual directories.
    fn merge_overlay_children(&self, path: &str, entries: &mut Vec<Entry>) {
        let overlays = self.overlays.read().unwrap();
        for (pending_path, handle) in &overlays.pending {
            if parent_of(pending_path) == path {
                let name = basename(pending_path);
                if !entries.iter().any(|e| e.name == name) {
                    entries.push(Entry::file(name, handle.len(), None));
                }
            }
        }
        for dir_path in &overlays.virtual_dirs {
            if parent_of(dir_path) == path {
                let name = basename(dir_path);
                if !entries.iter().any(|e| e.name == name) {
                    entries.push(Entry::dir(name));
                }
            }
        }
    }

    /// Open for reading: fetch the full content up front.
    ///
    /// The handle is read-only whatever flags the caller opened with;
    /// existing files are rewritten through create, not open.
    pub async fn open(&self, path: &str) -> Result<ReadHandle> {
        let parsed = ParsedPath::parse(path).ok_or_else(|| Error::not_found(path))?;
        if parsed.subpath.is_empty() {
            return Err(Error::not_found(path));
        }

        let provider = self.provider_for(&parsed).await?;
        let data = provider.read(parsed.subpath).await?;
        Ok(ReadHandle::new(data))
    }

    /// Create a file for writing and register it in the pending table.
    pub async fn create(&self, path: &str) -> Result<Arc<WriteHandle>> {
        let parsed = ParsedPath::parse(path).ok_or_else(|| Error::not_found(path))?;
        if parsed.subpath.is_empty() || !is_writable(parsed.service) {
            return Err(Error::Permission(format!("cannot create {path}")));
        }

        let provider = self.provider_for(&parsed).await?;
        let handle = Arc::new(WriteHandle::new(
            path.to_string(),
            parsed.subpath.to_string(),
            provider,
            Arc::downgrade(&self.overlays),
        ));
        self.overlays
            .write()
            .unwrap()
            .pending
            .insert(path.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Delete the backing resource.
    pub async fn unlink(&self, path: &str) -> Result<()> {
        let parsed = ParsedPath::parse(path).ok_or_else(|| Error::not_found(path))?;
        if parsed.subpath.is_empty() {
            return Err(Error::Permission(format!("cannot unlink {path}")));
        }

        let provider = self.provider_for(&parsed).await?;
        provider.delete(parsed.subpath).await
    }

    /// Record a user-created directory. No provider call: backends without
    /// real directories still need `mkdir -p` to work ahead of a write.
    pub fn mkdir(&self, path: &str) {
        self.overlays
            .write()
            .unwrap()
            .virtual_dirs
            .insert(path.to_string());
    }

    /// Apply a truncate to the in-flight buffer for `path`. Returns whether
    /// a pending write exists there; only a truncate to zero resets the
    /// buffer, matching the rewrite-from-scratch pattern create serves.
    pub fn truncate_pending(&self, path: &str, size: u64) -> bool {
        let overlays = self.overlays.read().unwrap();
        match overlays.pending.get(path) {
            Some(handle) => {
                if size == 0 {
                    handle.truncate();
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory provider recording every call, standing in for a cloud
    /// backend in engine tests.
    #[derive(Default)]
    struct FakeProvider {
        files: Mutex<HashMap<String, Vec<u8>>>,
        dirs: Mutex<HashSet<String>>,
        calls: AtomicUsize,
        fail_listings: bool,
    }

    impl FakeProvider {
        fn with_file(self, path: &str, data: &[u8]) -> Self {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), data.to_vec());
            self
        }

        fn with_dir(self, path: &str) -> Self {
            self.dirs.lock().unwrap().insert(path.to_string());
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listings {
                return Err(Error::Backend("listing failed".to_string()));
            }
            let files = self.files.lock().unwrap();
            let mut entries: Vec<Entry> = files
                .iter()
                .filter(|(p, _)| parent_of(p) == path)
                .map(|(p, data)| Entry::file(basename(p), data.len() as u64, None))
                .collect();
            let dirs = self.dirs.lock().unwrap();
            entries.extend(
                dirs.iter()
                    .filter(|p| parent_of(p) == path)
                    .map(|p| Entry::dir(basename(p))),
            );
            Ok(entries)
        }

        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::not_found(path))
        }

        async fn stat(&self, path: &str) -> Result<Entry> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.dirs.lock().unwrap().contains(path) {
                return Ok(Entry::dir(basename(path)));
            }
            let files = self.files.lock().unwrap();
            match files.get(path) {
                Some(data) => Ok(Entry::file(basename(path), data.len() as u64, None)),
                None => Err(Error::not_found(path)),
            }
        }

        async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| Error::not_found(path))
        }
    }

    fn engine() -> Engine {
        Engine::new(
            vec!["default".to_string(), "prod".to_string()],
            vec!["us-east-1".to_string(), "eu-west-1".to_string()],
        )
    }

    fn engine_with(service: &str, region: &str, provider: Arc<FakeProvider>) -> Engine {
        let engine = engine();
        engine.registry.insert("default", region, service, provider);
        engine
    }

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn root_lists_profiles() {
        let engine = engine();
        let entries = engine.read_dir("").await.unwrap();
        assert_eq!(names(&entries), vec!["default", "prod"]);
        assert!(entries.iter().all(|e| e.is_dir));
    }

    #[tokio::test]
    async fn profile_lists_global_then_regions() {
        let engine = engine();
        let entries = engine.read_dir("default").await.unwrap();
        assert_eq!(names(&entries), vec!["global", "us-east-1", "eu-west-1"]);
    }

    #[tokio::test]
    async fn region_level_lists_matching_services() {
        let engine = engine();
        let global = engine.read_dir("default/global").await.unwrap();
        assert_eq!(names(&global), vec!["iam", "s3"]);

        let regional = engine.read_dir("default/us-east-1").await.unwrap();
        assert_eq!(names(&regional), vec!["ssm", "vpc", "lambda", "ec2"]);
    }

    #[tokio::test]
    async fn skeleton_getattr_levels() {
        let engine = engine();
        assert!(engine.getattr("").await.unwrap().is_dir());
        assert!(engine.getattr("prod").await.unwrap().is_dir());
        assert!(engine.getattr("prod/global").await.unwrap().is_dir());
        assert!(engine.getattr("prod/eu-west-1").await.unwrap().is_dir());

        let ssm = engine.getattr("prod/eu-west-1/ssm").await.unwrap();
        assert_eq!(ssm.perm, 0o755);
        let iam = engine.getattr("prod/global/iam").await.unwrap();
        assert_eq!(iam.perm, 0o555);
    }

    #[tokio::test]
    async fn unknown_skeleton_names_are_not_found() {
        let engine = engine();
        assert!(matches!(
            engine.getattr("nobody").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine.getattr("default/mars-central-1").await,
            Err(Error::NotFound(_))
        ));
        // Classification is region-dependent: s3 is global-only, ssm
        // regional-only.
        assert!(matches!(
            engine.getattr("default/us-east-1/s3").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine.getattr("default/global/ssm").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn probe_names_short_circuit_without_provider_calls() {
        let provider = Arc::new(FakeProvider::default());
        let engine = engine_with("ssm", "us-east-1", Arc::clone(&provider));

        for probe in [".git", ".DS_Store", "Thumbs.db", "HEAD"] {
            let path = format!("default/us-east-1/ssm/app/{probe}");
            assert!(matches!(
                engine.getattr(&path).await,
                Err(Error::NotFound(_))
            ));
        }
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_backed_getattr_maps_permissions() {
        let provider =
            Arc::new(FakeProvider::default().with_file("app/key", b"v\n").with_dir("app"));
        let engine = engine_with("ssm", "us-east-1", provider);

        let file = engine.getattr("default/us-east-1/ssm/app/key").await.unwrap();
        assert_eq!(file.kind, FileKind::File);
        assert_eq!(file.perm, 0o644);
        assert_eq!(file.size, 2);

        let dir = engine.getattr("default/us-east-1/ssm/app").await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.perm, 0o755);
    }

    #[tokio::test]
    async fn read_only_services_expose_read_only_modes() {
        let provider = Arc::new(FakeProvider::default().with_file("users/alice/info.json", b"{}"));
        let engine = engine_with("iam", "us-east-1", provider);

        let attr = engine
            .getattr("default/global/iam/users/alice/info.json")
            .await
            .unwrap();
        assert_eq!(attr.perm, 0o444);
    }

    #[tokio::test]
    async fn global_region_rewrite_routes_to_home_region() {
        // The provider is registered under us-east-1; reaching it through
        // the global sentinel must find the same instance.
        let provider = Arc::new(FakeProvider::default().with_file("bucket/key", b"data"));
        let engine = engine_with("s3", "us-east-1", provider);

        let attr = engine.getattr("default/global/s3/bucket/key").await.unwrap();
        assert_eq!(attr.size, 4);
    }

    #[tokio::test]
    async fn create_write_flush_release_read_round_trip() {
        let provider = Arc::new(FakeProvider::default());
        let engine = engine_with("ssm", "us-east-1", Arc::clone(&provider));
        let path = "default/us-east-1/ssm/app/key";

        let handle = engine.create(path).await.unwrap();
        handle.write(b"hello", 0);
        handle.flush().await.unwrap();
        handle.release();

        let read = engine.open(path).await.unwrap();
        assert_eq!(read.read_at(0, 16), b"hello");
    }

    #[tokio::test]
    async fn pending_write_is_visible_to_stat_and_list() {
        let provider = Arc::new(FakeProvider::default());
        let engine = engine_with("ssm", "us-east-1", provider);
        let path = "default/us-east-1/ssm/app/key";

        let handle = engine.create(path).await.unwrap();
        handle.write(b"abc", 0);

        // Stat reports a regular file sized by the live buffer even though
        // no backing parameter exists.
        let attr = engine.getattr(path).await.unwrap();
        assert_eq!(attr.kind, FileKind::File);
        assert_eq!(attr.perm, 0o666);
        assert_eq!(attr.size, 3);

        let listing = engine.read_dir("default/us-east-1/ssm/app").await.unwrap();
        assert!(listing.iter().any(|e| e.name == "key" && !e.is_dir));

        handle.release();
        assert!(matches!(
            engine.getattr(path).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn release_removes_the_sole_pending_reference() {
        let provider = Arc::new(FakeProvider::default());
        let engine = engine_with("ssm", "us-east-1", provider);
        let path = "default/us-east-1/ssm/app/key";

        let handle = engine.create(path).await.unwrap();
        handle.release();
        // A second release is a no-op rather than a panic.
        handle.release();
        assert!(!engine.truncate_pending(path, 0));
    }

    #[tokio::test]
    async fn truncate_to_zero_resets_a_pending_buffer() {
        let provider = Arc::new(FakeProvider::default());
        let engine = engine_with("ssm", "us-east-1", provider);
        let path = "default/us-east-1/ssm/app/key";

        let handle = engine.create(path).await.unwrap();
        handle.write(b"stale", 0);

        assert!(engine.truncate_pending(path, 0));
        assert_eq!(engine.getattr(path).await.unwrap().size, 0);

        // A non-zero truncate acknowledges the handle without touching it.
        handle.write(b"fresh", 0);
        assert!(engine.truncate_pending(path, 5));
        assert_eq!(engine.getattr(path).await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn create_on_read_only_service_is_permission_denied() {
        let engine = engine();
        assert!(matches!(
            engine.create("default/global/iam/users/x").await,
            Err(Error::Permission(_))
        ));
        assert!(matches!(
            engine.create("default/us-east-1/ssm").await,
            Err(Error::Permission(_))
        ));
    }

    #[tokio::test]
    async fn unlink_deletes_and_next_stat_misses() {
        let provider = Arc::new(FakeProvider::default().with_file("app/key", b"v"));
        let engine = engine_with("ssm", "us-east-1", Arc::clone(&provider));
        let path = "default/us-east-1/ssm/app/key";

        engine.unlink(path).await.unwrap();
        assert!(matches!(
            engine.getattr(path).await,
            Err(Error::NotFound(_))
        ));
        let listing = engine.read_dir("default/us-east-1/ssm/app").await.unwrap();
        assert!(!listing.iter().any(|e| e.name == "key"));
    }

    #[tokio::test]
    async fn unlink_above_the_subpath_is_permission_denied() {
        let engine = engine();
        assert!(matches!(
            engine.unlink("default/us-east-1/ssm").await,
            Err(Error::Permission(_))
        ));
    }

    #[tokio::test]
    async fn mkdir_makes_a_phantom_directory_visible() {
        let provider = Arc::new(FakeProvider::default());
        let engine = engine_with("s3", "us-east-1", provider);
        let path = "default/global/s3/my-bucket/new-prefix";

        engine.mkdir(path);

        let attr = engine.getattr(path).await.unwrap();
        assert!(attr.is_dir());
        // The parent listing now includes it.
        let listing = engine.read_dir("default/global/s3/my-bucket").await.unwrap();
        assert!(listing.iter().any(|e| e.name == "new-prefix" && e.is_dir));
    }

    #[tokio::test]
    async fn virtual_dir_lists_empty_when_provider_errors() {
        let provider = Arc::new(FakeProvider {
            fail_listings: true,
            ..FakeProvider::default()
        });
        let engine = engine_with("ssm", "us-east-1", provider);
        let path = "default/us-east-1/ssm/made-up";

        // Without the virtual entry the failure surfaces as a backend error.
        assert!(matches!(
            engine.read_dir(path).await,
            Err(Error::Backend(_))
        ));

        engine.mkdir(path);
        assert_eq!(engine.read_dir(path).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn virtual_dir_under_unknown_service_lists_empty() {
        let engine = engine();
        let path = "default/us-east-1/dynamodb/phantom";
        engine.mkdir(path);
        // No provider exists for the service; the virtual-dir fallback
        // still applies.
        assert_eq!(engine.read_dir(path).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn open_requires_a_subpath() {
        let engine = engine();
        assert!(matches!(
            engine.open("default/us-east-1/ssm").await,
            Err(Error::NotFound(_))
        ));
    }
}
