//! Disabled-node registry
//!
//! Handles loading, saving, and querying the disabled-servers JSON file.
//! The file is a single JSON object mapping node names to the reason the
//! node was taken out of rotation.
//!
//! The registry is the single source of truth for "is this node out of
//! rotation". Every mutation is a load → mutate → persist cycle held under
//! one lock, so concurrent node tasks in the same process cannot lose each
//! other's writes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

/// Reason recorded for a node that is parked while the cluster upgrades.
pub const PREPARE: &str = "PREPARE";

/// Reason recorded when quarantine happened but no incident could be opened.
pub const TICKET_CREATION_FAILED: &str = "Ticket Creation Failed";

/// Raw persisted form: node name → reason string.
pub type DisabledMap = BTreeMap<String, String>;

/// Errors raised while reading or writing the registry file.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Filesystem failure on the registry file or its temp sibling
    #[error("registry I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File exists but does not hold a JSON object of strings
    #[error("registry at {path} is corrupted: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// Serialization of the in-memory map failed
    #[error("failed to encode registry: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Why a node is in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DisabledReason {
    /// Node is mid cluster upgrade; the entry is provisional and self-clears.
    Prepare,
    /// Quarantined, but the incident system did not return an id.
    TicketCreationFailed,
    /// Quarantined under the given incident id.
    Incident(String),
}

impl DisabledReason {
    /// Interpret a persisted reason string. Anything that is not one of the
    /// two sentinels is an incident identifier.
    pub fn parse(raw: &str) -> Self {
        match raw {
            PREPARE => Self::Prepare,
            TICKET_CREATION_FAILED => Self::TicketCreationFailed,
            other => Self::Incident(other.to_string()),
        }
    }

    /// Reason for a final quarantine, given the incident system's answer.
    ///
    /// An absent or blank id degrades to the `Ticket Creation Failed`
    /// sentinel so the persisted reason is never empty.
    pub fn from_incident(incident: Option<&str>) -> Self {
        match incident.map(str::trim) {
            Some(id) if !id.is_empty() => Self::Incident(id.to_string()),
            _ => Self::TicketCreationFailed,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Prepare => PREPARE,
            Self::TicketCreationFailed => TICKET_CREATION_FAILED,
            Self::Incident(id) => id,
        }
    }

    /// Whether this entry is provisional (upgrade in progress).
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Prepare)
    }

    /// Incident id to close once the node is back, if any.
    pub fn incident_id(&self) -> Option<&str> {
        match self {
            Self::Incident(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-backed registry of disabled nodes.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Every call does
/// synchronous file I/O, so async callers run it via `spawn_blocking`.
#[derive(Debug)]
pub struct DisabledRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DisabledRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current mapping.
    ///
    /// An absent, empty, or malformed file is treated as empty and an empty
    /// object is written back immediately. Never fails.
    pub fn load(&self) -> DisabledMap {
        let _guard = self.lock();
        self.load_locked()
    }

    /// Whether `node` has any entry, provisional or not.
    pub fn is_disabled(&self, node: &str) -> bool {
        self.load().contains_key(node)
    }

    /// The parsed reason for `node`, if it is registered.
    pub fn reason(&self, node: &str) -> Option<DisabledReason> {
        self.load().get(node).map(|raw| DisabledReason::parse(raw))
    }

    /// Set or overwrite the entry for `node` and persist the whole mapping.
    pub fn add(&self, node: &str, reason: &DisabledReason) -> RegistryResult<()> {
        let _guard = self.lock();
        let mut map = self.load_locked();
        map.insert(node.to_string(), reason.as_str().to_string());
        self.persist(&map)?;
        debug!(node, reason = %reason, "registry entry written");
        Ok(())
    }

    /// Delete the entry for `node`, returning the reason it was held under.
    ///
    /// Returns `Ok(None)` without touching the file when the node is absent.
    pub fn remove(&self, node: &str) -> RegistryResult<Option<DisabledReason>> {
        let _guard = self.lock();
        let mut map = self.load_locked();
        let Some(raw) = map.remove(node) else {
            return Ok(None);
        };
        self.persist(&map)?;
        debug!(node, reason = %raw, "registry entry removed");
        Ok(Some(DisabledReason::parse(&raw)))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guard protects no data, only ordering; a panicked holder
        // leaves nothing half-written in memory.
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn load_locked(&self) -> DisabledMap {
        match self.read() {
            Ok(map) => map,
            Err(e) => {
                if !matches!(&e, RegistryError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
                {
                    warn!(path = %self.path.display(), error = %e, "resetting disabled-node registry");
                }
                let empty = DisabledMap::new();
                if let Err(e) = self.persist(&empty) {
                    warn!(path = %self.path.display(), error = %e, "failed to rewrite empty registry");
                }
                empty
            }
        }
    }

    fn read(&self) -> RegistryResult<DisabledMap> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|e| RegistryError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    /// Save atomically: write a temp sibling, then rename over the target.
    fn persist(&self, map: &DisabledMap) -> RegistryResult<()> {
        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(map)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(&temp_path, content).map_err(|source| RegistryError::Io {
            path: temp_path.clone(),
            source,
        })?;

        std::fs::rename(&temp_path, &self.path).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
