//! Scoped temporary workspaces for batch materialization.
//!
//! Each batch extracts its result archives into an exclusively-owned
//! directory that must not outlive the batch. Three layers of cleanup
//! cover three failure modes:
//!
//! 1. **RAII guard** — [`Workspace`] removes its directory on `Drop`, which
//!    runs on normal return, early `?` propagation, and unwind alike.
//! 2. **Registry shutdown** — every live workspace is tracked in a
//!    process-wide [`WorkspaceRegistry`]; the binary calls
//!    [`WorkspaceRegistry::shutdown`] deterministically on exit and on
//!    Ctrl-C, covering guards whose owning frame never got to drop.
//! 3. **Startup sweep** — [`sweep_orphans`] reclaims prefix-matched
//!    directories older than a configurable age, covering prior runs that
//!    died without any cleanup (SIGKILL, power loss). Cleanup on SIGKILL
//!    itself is not attempted; the sweep is the safety net for that gap.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Directory-name prefix identifying workspaces to the orphan sweep.
pub const WORKSPACE_PREFIX: &str = "_scan2md_";

/// Monotonic component appended to workspace names so two batches started
/// within the same second never share a directory.
static WORKSPACE_SEQ: AtomicU64 = AtomicU64::new(0);

static REGISTRY: Lazy<WorkspaceRegistry> = Lazy::new(WorkspaceRegistry::new);

/// The process-wide registry of live workspaces.
///
/// Single composition root: the library registers through it internally and
/// the process entry point calls [`WorkspaceRegistry::shutdown`] on it.
pub fn registry() -> &'static WorkspaceRegistry {
    &REGISTRY
}

/// Tracks every workspace currently alive in this process.
pub struct WorkspaceRegistry {
    live: Mutex<HashSet<PathBuf>>,
}

impl WorkspaceRegistry {
    fn new() -> Self {
        Self {
            live: Mutex::new(HashSet::new()),
        }
    }

    fn register(&self, path: &Path) {
        self.live.lock().unwrap().insert(path.to_path_buf());
        debug!("Registered workspace: {}", path.display());
    }

    fn unregister(&self, path: &Path) {
        self.live.lock().unwrap().remove(path);
        debug!("Unregistered workspace: {}", path.display());
    }

    /// Number of workspaces currently tracked.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Whether `path` is currently tracked.
    pub fn is_live(&self, path: &Path) -> bool {
        self.live.lock().unwrap().contains(path)
    }

    /// Remove every tracked workspace directory. Returns the count removed.
    ///
    /// Best-effort: removal failures are logged and the entry dropped, so a
    /// stuck directory is left for the next startup sweep instead of
    /// blocking shutdown.
    pub fn shutdown(&self) -> usize {
        let paths: Vec<PathBuf> = self.live.lock().unwrap().drain().collect();
        if paths.is_empty() {
            return 0;
        }
        info!("Shutdown: removing {} live workspace(s)", paths.len());
        let mut removed = 0;
        for path in paths {
            match remove_dir_best_effort(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove workspace {}: {e}", path.display()),
            }
        }
        removed
    }
}

fn remove_dir_best_effort(path: &Path) -> io::Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// An exclusively-owned temporary directory, removed on drop.
///
/// Created under a base directory with a name embedding the caller's
/// identifier, a unix timestamp, and a per-process counter. The `images`
/// subdirectory is pre-created because every materializer worker writes
/// there.
pub struct Workspace {
    path: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Allocate a fresh workspace under `base`.
    pub fn create(base: &Path, identifier: &str) -> io::Result<Self> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let seq = WORKSPACE_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!("{WORKSPACE_PREFIX}{identifier}_{ts}_{seq}");
        let path = base.join(name);
        std::fs::create_dir_all(path.join("images"))?;
        registry().register(&path);
        debug!("Created workspace: {}", path.display());
        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The images subdirectory materializer workers write into.
    pub fn images_dir(&self) -> PathBuf {
        self.path.join("images")
    }

    /// Opt out of cleanup and take ownership of the directory path.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        registry().unregister(&self.path);
        self.path.clone()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = remove_dir_best_effort(&self.path) {
            warn!("Failed to clean workspace {}: {e}", self.path.display());
        } else {
            debug!("Cleaned workspace: {}", self.path.display());
        }
        registry().unregister(&self.path);
    }
}

/// Remove leftover workspace directories from prior runs.
///
/// Scans `base` for directories named with [`WORKSPACE_PREFIX`] whose
/// modification time is older than `max_age`, removing each. Returns the
/// count removed. Call once at process startup.
pub fn sweep_orphans(base: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Orphan sweep: cannot read {}: {e}", base.display());
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let is_candidate = path.is_dir()
            && name
                .to_str()
                .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX));
        if !is_candidate {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok());

        match age {
            Some(age) if age > max_age => match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(
                        "Removed orphaned workspace {} ({:.1}h old)",
                        path.display(),
                        age.as_secs_f64() / 3600.0
                    );
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove orphan {}: {e}", path.display()),
            },
            _ => {}
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn workspace_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let path = {
            let ws = Workspace::create(base.path(), "drop_test").unwrap();
            assert!(ws.path().is_dir());
            assert!(ws.images_dir().is_dir());
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn workspace_survives_keep() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path(), "keep_test").unwrap();
        let path = ws.keep();
        assert!(path.exists());
        fs::remove_dir_all(&path).unwrap();
    }

    #[test]
    fn concurrent_creates_get_distinct_paths() {
        let base = tempfile::tempdir().unwrap();
        let a = Workspace::create(base.path(), "same").unwrap();
        let b = Workspace::create(base.path(), "same").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn registry_tracks_live_workspaces() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path(), "reg_test").unwrap();
        let path = ws.path().to_path_buf();
        assert!(registry().is_live(&path));
        drop(ws);
        assert!(!registry().is_live(&path));
    }

    #[test]
    fn sweep_ignores_fresh_and_foreign_dirs() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join(format!("{WORKSPACE_PREFIX}fresh_1_0"))).unwrap();
        fs::create_dir(base.path().join("unrelated")).unwrap();
        let removed = sweep_orphans(base.path(), Duration::from_secs(3600));
        assert_eq!(removed, 0);
        assert!(base.path().join("unrelated").exists());
    }

    #[test]
    fn sweep_removes_old_prefixed_dirs() {
        let base = tempfile::tempdir().unwrap();
        let old = base.path().join(format!("{WORKSPACE_PREFIX}old_1_0"));
        fs::create_dir(&old).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let removed = sweep_orphans(base.path(), Duration::from_millis(10));
        assert_eq!(removed, 1);
        assert!(!old.exists());
    }
}
