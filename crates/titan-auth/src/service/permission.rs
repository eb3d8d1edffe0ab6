//! Permission table with copy-on-write reload
//!
//! The table maps resource paths to the roles that may access them. Readers
//! take a snapshot `Arc` and never observe a partially built table; reloads
//! build the replacement completely and publish it with a single swap.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::PermissionLoadError;
use crate::model::PermissionEntry;

const PREFIX_WILDCARD: &str = "/*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathRule {
    Roles(BTreeSet<String>),
    Misconfigured(String),
}

/// Result of looking a path up in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPolicy<'a> {
    /// The path is registered; any of these roles grants access
    Roles(&'a BTreeSet<String>),
    /// The path is registered but at least one of its entries cannot be resolved
    Misconfigured(&'a str),
    /// The table says nothing about the path
    Unmapped,
}

impl PathPolicy<'_> {
    pub fn is_registered(&self) -> bool {
        !matches!(self, PathPolicy::Unmapped)
    }
}

/// Immutable permission table built from a full set of entries
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    exact: HashMap<String, PathRule>,
    /// Prefix rules ordered longest first
    prefixes: Vec<(String, PathRule)>,
    case_sensitive: bool,
    entry_count: usize,
    misconfigured_count: usize,
    generation: u64,
}

impl PermissionTable {
    /// Build a table; entries that cannot be resolved mark their path misconfigured
    pub fn from_entries(entries: &[PermissionEntry], case_sensitive: bool) -> Self {
        let mut rules: HashMap<String, PathRule> = HashMap::new();
        let mut misconfigured_count = 0;

        for entry in entries {
            let path = normalize_path(entry.resource_path.trim(), case_sensitive);
            let role = entry.required_role.trim();

            let problem = if path.is_empty() || path.contains(char::is_whitespace) {
                Some(format!("invalid resource path '{}'", entry.resource_path))
            } else if role.is_empty() || role.contains(char::is_whitespace) {
                Some(format!(
                    "unresolvable role '{}' for '{}'",
                    entry.required_role, entry.resource_path
                ))
            } else {
                None
            };

            if let Some(reason) = problem {
                warn!(
                    path = %entry.resource_path,
                    role = %entry.required_role,
                    "Malformed permission entry, path will be denied: {}",
                    reason
                );
                misconfigured_count += 1;
                if !path.is_empty() {
                    rules.insert(path, PathRule::Misconfigured(reason));
                }
                continue;
            }

            match rules
                .entry(path)
                .or_insert_with(|| PathRule::Roles(BTreeSet::new()))
            {
                PathRule::Roles(roles) => {
                    roles.insert(role.to_string());
                }
                PathRule::Misconfigured(_) => {}
            }
        }

        let mut exact = HashMap::new();
        let mut prefixes = Vec::new();
        for (path, rule) in rules {
            match path.strip_suffix(PREFIX_WILDCARD) {
                Some(base) => prefixes.push((format!("{}/", base), rule)),
                None => {
                    exact.insert(path, rule);
                }
            }
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self {
            exact,
            prefixes,
            case_sensitive,
            entry_count: entries.len(),
            misconfigured_count,
            generation: 0,
        }
    }

    /// Look up the acceptable roles for a path
    pub fn lookup(&self, resource_path: &str) -> PathPolicy<'_> {
        let path = normalize_path(resource_path, self.case_sensitive);

        let rule = self.exact.get(&path).or_else(|| {
            self.prefixes
                .iter()
                .find(|(prefix, _)| path.starts_with(prefix.as_str()))
                .map(|(_, rule)| rule)
        });

        match rule {
            Some(PathRule::Roles(roles)) => PathPolicy::Roles(roles),
            Some(PathRule::Misconfigured(reason)) => PathPolicy::Misconfigured(reason),
            None => PathPolicy::Unmapped,
        }
    }

    pub fn is_registered(&self, resource_path: &str) -> bool {
        self.lookup(resource_path).is_registered()
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn misconfigured_count(&self) -> usize {
        self.misconfigured_count
    }

    pub fn path_count(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn normalize_path(path: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        path.to_string()
    } else {
        path.to_lowercase()
    }
}

/// Outcome of a successful reload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSummary {
    pub generation: u64,
    pub entries: usize,
    pub paths: usize,
    pub misconfigured: usize,
}

/// Owner of the live permission table
pub struct PermissionStore {
    current: RwLock<Arc<PermissionTable>>,
    case_sensitive: bool,
}

impl PermissionStore {
    /// Create a store holding an empty table, which denies every path under
    /// the default unmapped policy
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            current: RwLock::new(Arc::new(PermissionTable::from_entries(&[], case_sensitive))),
            case_sensitive,
        }
    }

    pub fn with_entries(entries: &[PermissionEntry], case_sensitive: bool) -> Self {
        let store = Self::new(case_sensitive);
        store.reload(entries);
        store
    }

    /// Current table; the snapshot stays valid across later reloads
    pub fn snapshot(&self) -> Arc<PermissionTable> {
        self.current.read().clone()
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Replace the whole table
    pub fn reload(&self, entries: &[PermissionEntry]) -> ReloadSummary {
        let mut table = PermissionTable::from_entries(entries, self.case_sensitive);

        // Numbered under the write lock so generations are published in order
        let summary = {
            let mut current = self.current.write();
            table.generation = current.generation + 1;
            let summary = ReloadSummary {
                generation: table.generation,
                entries: table.entry_count(),
                paths: table.path_count(),
                misconfigured: table.misconfigured_count(),
            };
            *current = Arc::new(table);
            summary
        };

        info!(
            generation = summary.generation,
            entries = summary.entries,
            paths = summary.paths,
            misconfigured = summary.misconfigured,
            "Permission table reloaded"
        );
        summary
    }

    /// Load entries from a source and swap them in; on failure the active
    /// table is left untouched
    pub async fn reload_from(
        &self,
        source: &dyn PermissionSource,
    ) -> Result<ReloadSummary, PermissionLoadError> {
        match source.load().await {
            Ok(entries) => Ok(self.reload(&entries)),
            Err(e) => {
                error!(
                    source = %source.describe(),
                    generation = self.snapshot().generation(),
                    "Permission reload failed, keeping active table: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Start a background task that reloads from `source` every `interval`
    pub fn start_reload_task(
        self: Arc<Self>,
        source: Arc<dyn PermissionSource>,
        interval: Duration,
    ) -> ReloadTask {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let store = self.clone();

        let handle = tokio::spawn(async move {
            info!(
                "Starting permission reload task with interval {:?} from {}",
                interval,
                source.describe()
            );
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately and the table was loaded at startup
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let _ = store.reload_from(source.as_ref()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Permission reload task stopped");
                        break;
                    }
                }
            }
        });

        ReloadTask {
            handle,
            shutdown_tx,
        }
    }
}

impl std::fmt::Debug for PermissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.snapshot();
        f.debug_struct("PermissionStore")
            .field("generation", &table.generation())
            .field("entries", &table.entry_count())
            .field("case_sensitive", &self.case_sensitive)
            .finish()
    }
}

/// Handle for the periodic reload task
pub struct ReloadTask {
    handle: tokio::task::JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReloadTask {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            warn!("Permission reload task ended abnormally: {}", e);
        }
    }
}

/// External store providing (resource path, role) pairs
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn load(&self) -> Result<Vec<PermissionEntry>, PermissionLoadError>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Entries held in memory, e.g. built from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticPermissionSource {
    entries: Vec<PermissionEntry>,
}

impl StaticPermissionSource {
    pub fn new(entries: Vec<PermissionEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl PermissionSource for StaticPermissionSource {
    async fn load(&self) -> Result<Vec<PermissionEntry>, PermissionLoadError> {
        Ok(self.entries.clone())
    }

    fn describe(&self) -> String {
        format!("static ({} entries)", self.entries.len())
    }
}

/// YAML or JSON file holding a list of `{url, role}` entries
#[derive(Debug, Clone)]
pub struct FilePermissionSource {
    path: PathBuf,
}

impl FilePermissionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
    }

    fn parse(&self, content: &str) -> Result<Vec<PermissionEntry>, PermissionLoadError> {
        let parse_error = |message: String| PermissionLoadError::Parse {
            path: self.path.clone(),
            message,
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        if self.is_json() {
            serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))
        } else {
            serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))
        }
    }
}

#[async_trait]
impl PermissionSource for FilePermissionSource {
    async fn load(&self) -> Result<Vec<PermissionEntry>, PermissionLoadError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| PermissionLoadError::Io {
                path: self.path.clone(),
                source,
            })?;

        let entries = self.parse(&content)?;
        debug!(
            "Loaded {} permission entries from {}",
            entries.len(),
            self.path.display()
        );
        Ok(entries)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn roles(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn entries(pairs: &[(&str, &str)]) -> Vec<PermissionEntry> {
        pairs
            .iter()
            .map(|(p, r)| PermissionEntry::new(*p, *r))
            .collect()
    }

    #[test]
    fn test_lookup_merges_roles_for_same_path() {
        let table = PermissionTable::from_entries(
            &entries(&[
                ("/api/values", "Admin"),
                ("/api/values", "System"),
                ("/api/claims", "Admin"),
            ]),
            true,
        );

        let expected = roles(&["Admin", "System"]);
        assert_eq!(table.lookup("/api/values"), PathPolicy::Roles(&expected));
        assert_eq!(table.lookup("/api/unknown"), PathPolicy::Unmapped);
        assert_eq!(table.entry_count(), 3);
        assert_eq!(table.path_count(), 2);
    }

    #[test]
    fn test_lookup_is_case_sensitive_by_default() {
        let table = PermissionTable::from_entries(&entries(&[("/api/Users", "Admin")]), true);
        assert!(table.is_registered("/api/Users"));
        assert!(!table.is_registered("/api/users"));
    }

    #[test]
    fn test_case_insensitive_paths() {
        let table = PermissionTable::from_entries(&entries(&[("/api/Users", "Admin")]), false);
        assert!(table.is_registered("/API/USERS"));
        assert!(table.is_registered("/api/users"));

        // Roles keep their case
        let expected = roles(&["Admin"]);
        assert_eq!(table.lookup("/api/users"), PathPolicy::Roles(&expected));
    }

    #[test]
    fn test_prefix_entries() {
        let table = PermissionTable::from_entries(
            &entries(&[
                ("/api/posts/*", "Client"),
                ("/api/posts/drafts/*", "Admin"),
                ("/api/posts/featured", "System"),
            ]),
            true,
        );

        assert_eq!(table.lookup("/api/posts/5"), PathPolicy::Roles(&roles(&["Client"])));
        assert_eq!(
            table.lookup("/api/posts/drafts/9"),
            PathPolicy::Roles(&roles(&["Admin"]))
        );
        assert_eq!(
            table.lookup("/api/posts/featured"),
            PathPolicy::Roles(&roles(&["System"]))
        );
        // The wildcard covers children only
        assert_eq!(table.lookup("/api/posts"), PathPolicy::Unmapped);
    }

    #[test]
    fn test_malformed_entry_marks_path_misconfigured() {
        let table = PermissionTable::from_entries(
            &entries(&[
                ("/api/users", "Admin"),
                ("/api/users", "  "),
                ("/api/values", "Admin"),
            ]),
            true,
        );

        assert!(matches!(
            table.lookup("/api/users"),
            PathPolicy::Misconfigured(_)
        ));
        assert_eq!(table.lookup("/api/values"), PathPolicy::Roles(&roles(&["Admin"])));
        assert_eq!(table.misconfigured_count(), 1);
    }

    #[test]
    fn test_misconfigured_is_not_overridden_by_later_entries() {
        let table = PermissionTable::from_entries(
            &entries(&[("/api/users", "Super Admin"), ("/api/users", "Admin")]),
            true,
        );
        assert!(matches!(
            table.lookup("/api/users"),
            PathPolicy::Misconfigured(_)
        ));
    }

    #[test]
    fn test_store_reload_swaps_table() {
        let store = PermissionStore::with_entries(&entries(&[("/api/a", "Admin")]), true);
        let before = store.snapshot();
        assert_eq!(before.generation(), 1);

        let summary = store.reload(&entries(&[("/api/b", "Admin"), ("/api/b", "System")]));
        assert_eq!(summary.generation, 2);
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.paths, 1);

        // The old snapshot is unaffected
        assert!(before.is_registered("/api/a"));
        assert!(!before.is_registered("/api/b"));

        let after = store.snapshot();
        assert!(!after.is_registered("/api/a"));
        assert!(after.is_registered("/api/b"));
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_table() {
        let old = entries(&[("/api/one", "Admin"), ("/api/two", "Admin")]);
        let new = entries(&[("/api/three", "System"), ("/api/four", "System")]);
        let store = Arc::new(PermissionStore::with_entries(&old, true));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let t = store.snapshot();
                        let old_view = t.is_registered("/api/one") && t.is_registered("/api/two");
                        let new_view =
                            t.is_registered("/api/three") && t.is_registered("/api/four");
                        assert!(old_view ^ new_view, "observed a torn table");
                    }
                })
            })
            .collect();

        for i in 0..200 {
            store.reload(if i % 2 == 0 { &new } else { &old });
        }

        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_concurrent_reloads_publish_generations_in_order() {
        let store = Arc::new(PermissionStore::new(true));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let table = entries(&[("/api/a", if w % 2 == 0 { "Admin" } else { "System" })]);
                    let mut seen = Vec::new();
                    for _ in 0..250 {
                        let summary = store.reload(&table);
                        // A later reload never publishes a lower generation
                        assert!(store.snapshot().generation() >= summary.generation);
                        seen.push(summary.generation);
                    }
                    seen
                })
            })
            .collect();

        let mut generations: Vec<u64> = writers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        generations.sort_unstable();
        generations.dedup();

        assert_eq!(generations.len(), 1_000);
        assert_eq!(store.snapshot().generation(), 1_000);
    }

    #[tokio::test]
    async fn test_reload_from_failure_keeps_previous_table() {
        let store = PermissionStore::with_entries(&entries(&[("/api/a", "Admin")]), true);
        let missing = FilePermissionSource::new("/definitely/not/here/permissions.yml");

        let result = store.reload_from(&missing).await;
        assert!(matches!(result, Err(PermissionLoadError::Io { .. })));

        let table = store.snapshot();
        assert!(table.is_registered("/api/a"));
        assert_eq!(table.generation(), 1);
    }

    #[tokio::test]
    async fn test_file_source_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            "- url: /api/values\n  role: Admin\n- resourcePath: /api/values\n  requiredRole: System"
        )
        .unwrap();

        let source = FilePermissionSource::new(file.path());
        let loaded = source.load().await.unwrap();
        assert_eq!(
            loaded,
            entries(&[("/api/values", "Admin"), ("/api/values", "System")])
        );
    }

    #[tokio::test]
    async fn test_file_source_json_and_malformed() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"url": "/api/claims", "role": "Admin"}}]"#).unwrap();
        let source = FilePermissionSource::new(file.path());
        assert_eq!(source.load().await.unwrap().len(), 1);

        let mut broken = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(broken, r#"[{{"url": "/api/claims""#).unwrap();
        let store = PermissionStore::with_entries(&entries(&[("/api/a", "Admin")]), true);
        let result = store
            .reload_from(&FilePermissionSource::new(broken.path()))
            .await;
        assert!(matches!(result, Err(PermissionLoadError::Parse { .. })));
        assert!(store.snapshot().is_registered("/api/a"));
    }

    #[tokio::test]
    async fn test_static_source_reload() {
        let store = PermissionStore::new(true);
        let source = StaticPermissionSource::new(entries(&[("/api/users", "Admin")]));
        let summary = store.reload_from(&source).await.unwrap();
        assert_eq!(summary.entries, 1);
        assert!(store.snapshot().is_registered("/api/users"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_task_picks_up_changes() {
        let store = Arc::new(PermissionStore::new(true));
        let source = Arc::new(StaticPermissionSource::new(entries(&[("/api/users", "Admin")])));

        let task = store
            .clone()
            .start_reload_task(source, Duration::from_secs(30));
        assert!(!store.snapshot().is_registered("/api/users"));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(store.snapshot().is_registered("/api/users"));

        task.shutdown().await;
    }
}
