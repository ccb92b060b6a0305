//! Batched asynchronous module loading.
use async_trait::async_trait;
use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
#[error("Failed to load module '{path}': {source}")]
pub struct ModuleLoadError {
    pub path: String,
    #[source]
    pub source: anyhow::Error,
}

impl ModuleLoadError {
    pub fn new(path: &str, source: impl Into<anyhow::Error>) -> Self {
        Self {
            path: path.to_string(),
            source: source.into(),
        }
    }
}

/// Loads one module (a require, helper or spec file) into the suite engine.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, path: &str) -> Result<(), ModuleLoadError>;
}

/// Loads `paths` as one batch.
///
/// Every load is started before any is awaited to completion. The batch resolves once all
/// loads succeed and fails with the first error reported.
#[instrument(skip(loader))]
pub async fn load_all(loader: &dyn ModuleLoader, paths: &[String]) -> Result<(), ModuleLoadError> {
    if paths.is_empty() {
        return Ok(());
    }
    try_join_all(paths.iter().map(|path| loader.load(path))).await?;
    debug!(count = paths.len(), "Loaded module batch");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingLoader {
        started: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ModuleLoader for RecordingLoader {
        async fn load(&self, path: &str) -> Result<(), ModuleLoadError> {
            self.started.lock().unwrap().push(path.to_string());
            tokio::task::yield_now().await;
            if self.fail_on.as_deref() == Some(path) {
                return Err(ModuleLoadError::new(path, anyhow!("boom")));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_all_loads_every_path() {
        let loader = RecordingLoader::default();
        let paths = vec!["a.yml".to_string(), "b.yml".to_string()];

        load_all(&loader, &paths).await.unwrap();

        assert_eq!(*loader.started.lock().unwrap(), paths);
    }

    #[tokio::test]
    async fn test_load_all_empty_is_noop() {
        let loader = RecordingLoader::default();
        load_all(&loader, &[]).await.unwrap();
        assert!(loader.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_all_surfaces_failing_path() {
        let loader = RecordingLoader {
            fail_on: Some("b.yml".to_string()),
            ..Default::default()
        };
        let paths = vec!["a.yml".to_string(), "b.yml".to_string()];

        let err = load_all(&loader, &paths).await.unwrap_err();

        assert_eq!(err.path, "b.yml");
        assert!(err.to_string().contains("boom"));
    }

    /// Loader whose first path waits until the second one has started.
    struct GatedLoader {
        second_started: Notify,
    }

    #[async_trait]
    impl ModuleLoader for GatedLoader {
        async fn load(&self, path: &str) -> Result<(), ModuleLoadError> {
            if path == "first" {
                self.second_started.notified().await;
            } else {
                self.second_started.notify_one();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_all_starts_loads_concurrently() {
        let loader = GatedLoader {
            second_started: Notify::new(),
        };
        let paths = vec!["first".to_string(), "second".to_string()];

        // Would hang if "second" only started after "first" finished.
        tokio::time::timeout(std::time::Duration::from_secs(5), load_all(&loader, &paths))
            .await
            .expect("loads should run concurrently")
            .unwrap();
    }
}
