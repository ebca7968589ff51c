//! Current-catalog holder.
//!
//! The live catalog is an `Arc<CatalogModel>` published through a
//! `tokio::sync::watch` channel. Readers take a snapshot and keep using it for
//! as long as they need; writers build a complete new model and swap it in.
//! A model is never mutated after it is published.

use super::error::CatalogError;
use super::loader;
use super::types::CatalogModel;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

pub struct CatalogStore {
    sender: watch::Sender<Arc<CatalogModel>>,
    path: Option<PathBuf>,
}

impl CatalogStore {
    /// In-memory store; changes are not persisted.
    pub fn new(model: CatalogModel) -> Arc<Self> {
        let (sender, _) = watch::channel(Arc::new(model));
        Arc::new(Self { sender, path: None })
    }

    /// Loads `path` and persists every later change back to it.
    pub fn open(path: &Path) -> Result<Arc<Self>, CatalogError> {
        let model = loader::load_file(path)?;
        let (sender, _) = watch::channel(Arc::new(model));
        Ok(Arc::new(Self {
            sender,
            path: Some(path.to_path_buf()),
        }))
    }

    /// Snapshot of the current catalog.
    pub fn current(&self) -> Arc<CatalogModel> {
        self.sender.borrow().clone()
    }

    /// Receiver notified on every swap.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CatalogModel>> {
        self.sender.subscribe()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Publishes `model` as the current catalog.
    pub fn replace(&self, model: CatalogModel) -> Result<Arc<CatalogModel>, CatalogError> {
        self.persist(&model)?;
        let model = Arc::new(model);
        self.sender.send_replace(model.clone());
        tracing::info!("Catalog replaced (effective {})", model.effective_date());
        Ok(model)
    }

    /// Derives a new catalog from the current one and publishes it.
    ///
    /// `change` runs while no other writer can swap, so concurrent
    /// modifications never lose each other's updates. When it fails the
    /// current catalog stays in place.
    pub fn modify<F>(&self, change: F) -> Result<Arc<CatalogModel>, CatalogError>
    where
        F: FnOnce(&CatalogModel) -> Result<CatalogModel, CatalogError>,
    {
        let mut outcome = None;
        self.sender.send_if_modified(|current| {
            let next = change(current).and_then(|next| {
                self.persist(&next)?;
                Ok(Arc::new(next))
            });
            match next {
                Ok(next) => {
                    *current = next.clone();
                    outcome = Some(Ok(next));
                    true
                }
                Err(error) => {
                    outcome = Some(Err(error));
                    false
                }
            }
        });
        outcome.unwrap_or_else(|| Err(CatalogError::Unsupported("catalog was not modified".into())))
    }

    /// Re-reads the backing file. An invalid file leaves the current catalog untouched.
    pub fn reload(&self) -> Result<Arc<CatalogModel>, CatalogError> {
        let Some(path) = &self.path else {
            return Err(CatalogError::Unsupported(
                "catalog store has no backing file".to_string(),
            ));
        };
        let model = Arc::new(loader::load_file(path)?);
        self.sender.send_replace(model.clone());
        tracing::info!("Catalog reloaded from {}", path.display());
        Ok(model)
    }

    /// Writes to a temporary sibling then renames, so readers never see a partial file.
    fn persist(&self, model: &CatalogModel) -> Result<(), CatalogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_error = |source| CatalogError::Io {
            path: path.clone(),
            source,
        };
        let contents = serde_json::to_string_pretty(model.to_json())?;
        let temporary = path.with_extension("json.tmp");
        std::fs::write(&temporary, contents).map_err(io_error)?;
        std::fs::rename(&temporary, path).map_err(io_error)?;
        Ok(())
    }
}
