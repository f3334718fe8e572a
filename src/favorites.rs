use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::source::{GalleryImage, ImageSource, SavedImage, SourceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteImage {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Favorites kept on this machine, persisted as JSON.
#[derive(Debug, Default)]
pub struct FavoritesStore {
    path: Option<PathBuf>,
    favorites: Vec<FavoriteImage>,
}

impl FavoritesStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads from `path`; a missing or unreadable file starts an empty list.
    pub fn load(path: PathBuf) -> Self {
        let favorites = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<Vec<FavoriteImage>>(&text).unwrap_or_else(|err| {
                log::warn!("ignoring malformed favorites file {}: {err}", path.display());
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            path: Some(path),
            favorites,
        }
    }

    pub fn favorites(&self) -> &[FavoriteImage] {
        &self.favorites
    }

    pub fn is_favorite(&self, image_id: &str) -> bool {
        self.favorites.iter().any(|fav| fav.id == image_id)
    }

    /// Returns the new membership.
    pub fn toggle(&mut self, image_id: &str) -> bool {
        if self.is_favorite(image_id) {
            self.remove(image_id);
            false
        } else {
            self.add(image_id);
            true
        }
    }

    pub fn add(&mut self, image_id: &str) {
        if self.is_favorite(image_id) {
            return;
        }
        self.favorites.push(FavoriteImage {
            id: image_id.to_string(),
            timestamp: now_millis(),
        });
    }

    pub fn remove(&mut self, image_id: &str) {
        self.favorites.retain(|fav| fav.id != image_id);
    }

    pub fn clear(&mut self) {
        self.favorites.clear();
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        write_json(path, &self.favorites)
    }
}

fn write_json(path: &Path, favorites: &[FavoriteImage]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create directory {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(favorites).context("Could not encode favorites")?;
    fs::write(path, text)
        .with_context(|| format!("Could not write favorites file {}", path.display()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Remote saved-image CRUD.
pub trait SavedImagesService: Send + Sync {
    fn list_saved(&self) -> Result<Vec<SavedImage>, SourceError>;

    fn save(&self, public_image_id: &str) -> Result<SavedImage, SourceError>;

    fn delete(&self, saved_image_id: &str) -> Result<(), SourceError>;
}

/// What the remote call for a toggle has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAction {
    Save { public_image_id: String },
    Delete { saved_image_id: String },
    /// Locally saved but the record is not known yet; nothing to delete remotely.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToggle {
    pub public_image_id: String,
    pub was_saved: bool,
    pub action: RemoteAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteResult {
    Saved(SavedImage),
    Deleted,
}

/// Saved-image membership with optimistic updates against the remote list.
#[derive(Debug, Default)]
pub struct SavedImages {
    saved_ids: HashSet<String>,
    records: HashMap<String, SavedImage>,
    pending: HashSet<String>,
}

impl SavedImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&mut self, records: Vec<SavedImage>) {
        self.saved_ids = records
            .iter()
            .map(|record| record.public_image_id.clone())
            .collect();
        self.records = records
            .into_iter()
            .map(|record| (record.public_image_id.clone(), record))
            .collect();
    }

    pub fn is_saved(&self, public_image_id: &str) -> bool {
        self.saved_ids.contains(public_image_id)
    }

    pub fn len(&self) -> usize {
        self.saved_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved_ids.is_empty()
    }

    /// Whether a remote call for this image has not completed yet.
    pub fn is_pending(&self, public_image_id: &str) -> bool {
        self.pending.contains(public_image_id)
    }

    /// Flips membership right away and describes the remote call to make.
    ///
    /// Returns `None` while an earlier toggle of the same image is in flight.
    pub fn begin_toggle(&mut self, public_image_id: &str) -> Option<PendingToggle> {
        if !self.pending.insert(public_image_id.to_string()) {
            return None;
        }
        let was_saved = self.saved_ids.contains(public_image_id);
        let action = if was_saved {
            self.saved_ids.remove(public_image_id);
            match self.records.get(public_image_id) {
                Some(record) => RemoteAction::Delete {
                    saved_image_id: record.saved_image_id.clone(),
                },
                None => RemoteAction::Nothing,
            }
        } else {
            self.saved_ids.insert(public_image_id.to_string());
            RemoteAction::Save {
                public_image_id: public_image_id.to_string(),
            }
        };
        Some(PendingToggle {
            public_image_id: public_image_id.to_string(),
            was_saved,
            action,
        })
    }

    /// Applies the remote result, reverting the optimistic flip on failure.
    pub fn complete(&mut self, pending: PendingToggle, result: Result<RemoteResult, String>) {
        self.pending.remove(&pending.public_image_id);
        match result {
            Ok(RemoteResult::Saved(record)) => {
                self.records.insert(pending.public_image_id, record);
            }
            Ok(RemoteResult::Deleted) => {
                self.records.remove(&pending.public_image_id);
            }
            Err(err) => {
                log::warn!(
                    "reverting saved state of {}: {err}",
                    pending.public_image_id
                );
                if pending.was_saved {
                    self.saved_ids.insert(pending.public_image_id);
                } else {
                    self.saved_ids.remove(&pending.public_image_id);
                }
            }
        }
    }
}

/// Runs the remote half of a toggle. Meant for a worker thread.
pub fn execute_remote(
    service: &dyn SavedImagesService,
    action: &RemoteAction,
) -> Result<RemoteResult, String> {
    match action {
        RemoteAction::Save { public_image_id } => service
            .save(public_image_id)
            .map(RemoteResult::Saved)
            .map_err(|err| err.to_string()),
        RemoteAction::Delete { saved_image_id } => service
            .delete(saved_image_id)
            .map(|()| RemoteResult::Deleted)
            .map_err(|err| err.to_string()),
        RemoteAction::Nothing => Ok(RemoteResult::Deleted),
    }
}

/// Looks up each favorite id; images the source no longer has are skipped.
pub fn resolve_favorite_images(source: &dyn ImageSource, ids: &[String]) -> Vec<GalleryImage> {
    ids.iter()
        .filter_map(|id| match source.get_photo(id) {
            Ok(image) => Some(image),
            Err(err) => {
                log::warn!("skipping favorite {id}: {err}");
                None
            }
        })
        .collect()
}
