use std::sync::Arc;

use crate::backup::BackupService;
use crate::collections::CollectionResolver;
use crate::config::StoreConfig;
use crate::db::DatabaseRegistry;
use crate::documents::DocumentStore;
use crate::error::StoreError;

/// The storage core wired together from one configuration.
pub struct Store {
  pub registry: Arc<DatabaseRegistry>,
  pub collections: Arc<CollectionResolver>,
  pub documents: DocumentStore,
  pub backups: BackupService,
}

impl Store {
  /// Builds every component and opens the main database.
  pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
    let store = Self::new(config);
    store.registry.ensure_ready().await?;
    Ok(store)
  }

  /// Builds every component without touching disk; databases open on first use.
  pub fn new(config: StoreConfig) -> Self {
    let registry = Arc::new(DatabaseRegistry::new(config.storage));
    let collections = Arc::new(CollectionResolver::new(registry.clone()));
    let documents = DocumentStore::new(registry.clone(), collections.clone());
    let backups = BackupService::new(registry.clone(), config.backup);
    Self {
      registry,
      collections,
      documents,
      backups,
    }
  }
}
