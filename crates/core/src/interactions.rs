//! Durable set of users who already received the welcome message.
//!
//! The file holds a JSON array of user-id strings. It is read once at startup and
//! rewritten wholesale on every save through a sibling temporary file plus rename,
//! so an interrupted write leaves the previous contents intact.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::user::UserId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read interaction store `{path}`: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("could not parse interaction store `{path}`: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("could not serialize interaction store: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("could not write interaction store `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// In-memory membership set. Pure; persistence lives in [`FileInteractionStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InteractionSet {
    users: HashSet<UserId>,
}

impl InteractionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains(user_id)
    }

    /// Returns `true` if the user was not yet present.
    pub fn add(&mut self, user_id: UserId) -> bool {
        self.users.insert(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Sorted so that saves of the same set produce identical files.
    pub fn to_sorted_vec(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.iter().cloned().collect();
        users.sort();
        users
    }
}

impl FromIterator<UserId> for InteractionSet {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        Self { users: iter.into_iter().collect() }
    }
}

/// Seam the event handlers depend on.
pub trait InteractionStore: Send + Sync {
    fn contains(&self, user_id: &UserId) -> bool;

    /// Atomically checks and records the user, persisting when newly added.
    /// Returns `true` only for the first interaction.
    fn record_first_interaction(&self, user_id: &UserId) -> bool;

    /// Best-effort flush of the full set.
    fn save(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct FileInteractionStore {
    path: PathBuf,
    users: Mutex<InteractionSet>,
}

impl FileInteractionStore {
    /// Never fails: a missing or unreadable file degrades to an empty store and the
    /// file is re-initialized as `[]`.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let users = match read_set(&path) {
            Ok(users) => {
                info!(
                    event_name = "store.interactions.loaded",
                    path = %path.display(),
                    user_count = users.len(),
                    "loaded user interactions from storage"
                );
                users
            }
            Err(error) => {
                warn!(
                    event_name = "store.interactions.reset",
                    path = %path.display(),
                    error = %error,
                    "no usable user interactions found, starting fresh"
                );
                let empty = InteractionSet::new();
                if let Err(error) = write_set(&path, &empty) {
                    warn!(
                        event_name = "store.interactions.init_failed",
                        path = %path.display(),
                        error = %error,
                        "could not initialize empty interaction store; continuing in memory"
                    );
                }
                empty
            }
        };

        Self { path, users: Mutex::new(users) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&self, user_id: UserId) -> bool {
        self.lock().add(user_id)
    }

    pub fn snapshot(&self) -> InteractionSet {
        self.lock().clone()
    }

    /// Writes the current set, returning the number of ids saved.
    pub fn try_save(&self) -> Result<usize, StoreError> {
        let users = self.lock();
        write_set(&self.path, &users)?;
        Ok(users.len())
    }

    fn lock(&self) -> MutexGuard<'_, InteractionSet> {
        match self.users.lock() {
            Ok(users) => users,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl InteractionStore for FileInteractionStore {
    fn contains(&self, user_id: &UserId) -> bool {
        self.lock().contains(user_id)
    }

    fn record_first_interaction(&self, user_id: &UserId) -> bool {
        let mut users = self.lock();
        if !users.add(user_id.clone()) {
            return false;
        }
        // Saved under the lock so concurrent writers never interleave renames.
        if let Err(error) = write_set(&self.path, &users) {
            warn!(
                event_name = "store.interactions.save_failed",
                path = %self.path.display(),
                error = %error,
                "could not persist user interactions; keeping in-memory state"
            );
        }
        true
    }

    fn save(&self) {
        match self.try_save() {
            Ok(user_count) => info!(
                event_name = "store.interactions.saved",
                path = %self.path.display(),
                user_count,
                "saved user interactions to storage"
            ),
            Err(error) => warn!(
                event_name = "store.interactions.save_failed",
                path = %self.path.display(),
                error = %error,
                "could not persist user interactions; keeping in-memory state"
            ),
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Non-durable store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryInteractionStore {
    users: Mutex<InteractionSet>,
}

impl MemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = UserId>,
    {
        Self { users: Mutex::new(users.into_iter().collect()) }
    }

    fn lock(&self) -> MutexGuard<'_, InteractionSet> {
        match self.users.lock() {
            Ok(users) => users,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl InteractionStore for MemoryInteractionStore {
    fn contains(&self, user_id: &UserId) -> bool {
        self.lock().contains(user_id)
    }

    fn record_first_interaction(&self, user_id: &UserId) -> bool {
        self.lock().add(user_id.clone())
    }

    fn save(&self) {}

    fn len(&self) -> usize {
        self.lock().len()
    }
}

fn read_set(path: &Path) -> Result<InteractionSet, StoreError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| StoreError::Read { path: path.to_path_buf(), source })?;
    let users: Vec<UserId> = serde_json::from_str(&raw)
        .map_err(|source| StoreError::Parse { path: path.to_path_buf(), source })?;
    Ok(users.into_iter().collect())
}

fn write_set(path: &Path, users: &InteractionSet) -> Result<(), StoreError> {
    let payload = serde_json::to_string(&users.to_sorted_vec()).map_err(StoreError::Serialize)?;
    let write_error = |source| StoreError::Write { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }

    let staging = staging_path(path);
    fs::write(&staging, payload).map_err(write_error)?;
    fs::rename(&staging, path).map_err(|source| {
        let _ = fs::remove_file(&staging);
        write_error(source)
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
