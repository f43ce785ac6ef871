//! Style profiles and the process-wide profile cache.
//!
//! Profiles are stored as `<dir>/<name>.json`, loaded once per distinct
//! (trimmed) name, and shared as `Arc<StyleProfile>` afterwards.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ImitatorError;

/// Behavioral knobs of a style profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub aggressiveness: f64,
    pub eval_weight: f64,
    /// Largest tolerated drop from the best evaluation, in centipawns
    pub min_eval_cp: f64,
    pub deterministic: bool,
    pub error_rate_multiplier: f64,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            aggressiveness: 1.0,
            eval_weight: 0.001,
            min_eval_cp: 150.0,
            deterministic: false,
            error_rate_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleProfile {
    #[serde(alias = "player_name")]
    pub name: String,
    /// Reward per tag
    pub tag_weights: HashMap<String, f64>,
    /// Severity per tag
    pub penalty_tags: HashMap<String, f64>,
    /// Explicit failure tags; the penalty tag names are used when absent
    pub failure_tags: Option<Vec<String>>,
    pub config: StyleConfig,
}

impl StyleProfile {
    /// Tags whose presence marks a candidate as a plausible mistake.
    pub fn failure_tag_set(&self) -> HashSet<&str> {
        match &self.failure_tags {
            Some(tags) => tags.iter().map(String::as_str).collect(),
            None => self.penalty_tags.keys().map(String::as_str).collect(),
        }
    }
}

/// Storage backend for style profiles.
pub trait ProfileStore: Send + Sync {
    /// Load the profile stored under `name` (already trimmed).
    fn load(&self, name: &str) -> Result<StyleProfile, ImitatorError>;
}

/// Profiles stored as JSON files in one directory.
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ProfileStore for DirectoryStore {
    fn load(&self, name: &str) -> Result<StyleProfile, ImitatorError> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ImitatorError::ProfileNotFound(name.to_string()));
        }
        let path = self.dir.join(format!("{name}.json"));
        info!(profile = name, path = %path.display(), "Loading style profile");

        let raw = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ImitatorError::ProfileNotFound(name.to_string()),
            _ => ImitatorError::ProfileNotFound(format!("{name} ({e})")),
        })?;
        let mut profile: StyleProfile =
            serde_json::from_str(&raw).map_err(|source| ImitatorError::ProfileParse {
                name: name.to_string(),
                source,
            })?;
        if profile.name.is_empty() {
            profile.name = name.to_string();
        }
        Ok(profile)
    }
}

/// In-memory profiles, for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    profiles: HashMap<String, StyleProfile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: StyleProfile) -> Self {
        self.profiles.insert(profile.name.clone(), profile);
        self
    }
}

impl ProfileStore for MemoryStore {
    fn load(&self, name: &str) -> Result<StyleProfile, ImitatorError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ImitatorError::ProfileNotFound(name.to_string()))
    }
}

/// Memoizes loaded profiles for the lifetime of the cache.
///
/// Constructed once at startup and shared by every search. Population is
/// guarded by a lock so concurrent searches may load profiles safely; a
/// name is loaded at most once unless [`ProfileCache::clear`] is called.
pub struct ProfileCache {
    store: Box<dyn ProfileStore>,
    profiles: RwLock<HashMap<String, Arc<StyleProfile>>>,
}

impl ProfileCache {
    pub fn new(store: impl ProfileStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached profile, loading it on first use.
    pub fn get(&self, name: &str) -> Result<Arc<StyleProfile>, ImitatorError> {
        let normalized = name.trim();
        if let Some(profile) = self.profiles.read().get(normalized) {
            return Ok(Arc::clone(profile));
        }

        let mut profiles = self.profiles.write();
        if let Some(profile) = profiles.get(normalized) {
            return Ok(Arc::clone(profile));
        }
        let profile = Arc::new(self.store.load(normalized)?);
        profiles.insert(normalized.to_string(), Arc::clone(&profile));
        Ok(profile)
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached profile; the next `get` reloads from the store.
    pub fn clear(&self) {
        self.profiles.write().clear();
    }
}
