//! Process-wide state assembled once at startup.
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;

use crate::category::CategoryMap;
use crate::config::Config;
use crate::db::Store;
use crate::embedder::{Embedder, build_embedder};
use crate::error::EngineError;
use crate::finder::{ResourceFinder, SearchPolicy};
use crate::indexer::{BuildReport, IndexBuilder};
use crate::records::{ResourceRecord, load_records_dir};

/// Shared, read-only handles used by every request. Cheap to clone.
#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub categories: Arc<CategoryMap>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Store,
    /// Held for the duration of a build; concurrent rebuilds queue up.
    build_lock: Arc<TokioMutex<()>>,
}

impl App {
    pub fn new(
        config: Config,
        categories: CategoryMap,
        embedder: Arc<dyn Embedder>,
        store: Store,
    ) -> Self {
        Self {
            config: Arc::new(config),
            categories: Arc::new(categories),
            embedder,
            store,
            build_lock: Arc::new(TokioMutex::new(())),
        }
    }

    /// Load the category map, open the store and create the embedder described by `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let categories = CategoryMap::load(&config.category_map_path)?;
        let store = Store::open(&config.db_path, config.store.pool_size)
            .with_context(|| format!("failed to open index store at {}", config.db_path))?;
        let embedder = build_embedder(&config.embedding)?;
        info!("Embedding function: {}", embedder.version());

        Ok(Self::new(config, categories, embedder, store))
    }

    pub fn finder(&self) -> ResourceFinder {
        ResourceFinder::new(
            self.categories.clone(),
            self.embedder.clone(),
            self.store.clone(),
            SearchPolicy::from_config(&self.config.search),
        )
    }

    pub fn builder(&self) -> IndexBuilder {
        IndexBuilder::new(self.store.clone(), self.embedder.clone())
            .with_categories(self.categories.clone())
            .with_concurrency(self.config.embedding.max_concurrency)
    }

    /// Load every record file under `dir` (default: the configured records directory)
    /// and rebuild the index from it.
    pub async fn rebuild_from_dir(
        &self,
        dir: Option<&Path>,
        force: bool,
        progress: Option<ProgressBar>,
    ) -> Result<BuildReport> {
        let dir = dir.unwrap_or_else(|| Path::new(&self.config.records_dir));
        let records = load_records_dir(dir)?;

        let _guard = self.build_lock.lock().await;
        let mut builder = self.builder();
        if let Some(pb) = progress {
            builder = builder.with_progress(pb);
        }
        let report = builder.build(&records, force).await?;
        Ok(report)
    }

    /// Rebuild the index from records already in memory.
    pub async fn rebuild(
        &self,
        records: &[ResourceRecord],
        force: bool,
    ) -> Result<BuildReport, EngineError> {
        let _guard = self.build_lock.lock().await;
        self.builder().build(records, force).await
    }
}
