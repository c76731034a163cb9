//! Test context: a temporary data root and an in-memory cache.

use crate::fixtures::ENGINE_TEMPLATE;
use isoreach_cache::{Database, SqliteIsochroneCache};
use isoreach_engine::EngineLayout;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Drop this to remove the data root.
pub struct TestContext {
    pub dir: TempDir,
    pub db: Database,
    pub cache: Arc<SqliteIsochroneCache>,
}

impl TestContext {
    /// Fresh data root with an engine template and an empty cache.
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let dir = tempfile::tempdir()?;
        let layout = EngineLayout::under(dir.path());
        tokio::fs::create_dir_all(layout.engine_dir()).await?;
        tokio::fs::write(layout.template_path(), ENGINE_TEMPLATE).await?;

        let db = Database::in_memory().await?;
        let cache = Arc::new(db.isochrones());
        Ok(Self { dir, db, cache })
    }

    pub fn data_root(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> EngineLayout {
        EngineLayout::under(self.dir.path())
    }
}
