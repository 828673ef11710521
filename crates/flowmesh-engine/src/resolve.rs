//! Object store and cluster client construction from configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use flowmesh_store::{ObjectStore, PostgresObjectStore, SqliteObjectStore};
use kube::config::{KubeConfigOptions, Kubeconfig};

use crate::cluster::{ClusterClient, KubeCluster};
use crate::config::types::{ClusterConfig, StoreBackendKind, StoreConfig};

/// Open the configured object store.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or initialized.
pub fn create_object_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StoreBackendKind::Sqlite => {
            let store = if let Some(path) = &config.connection {
                SqliteObjectStore::open(Path::new(path)).context("Failed to open object DB")?
            } else {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                let path = PathBuf::from(home).join(".flowmesh").join("objects.db");
                SqliteObjectStore::open(&path).context("Failed to open default object DB")?
            };
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        }
        StoreBackendKind::Postgres => {
            let connstr = config
                .connection
                .as_deref()
                .unwrap_or("host=localhost dbname=flowmesh");
            let store = PostgresObjectStore::open(connstr)
                .map_err(|e| anyhow::anyhow!("failed to open Postgres object store: {e}"))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        }
    }
}

/// Build a `kube` client: in-cluster service account, an explicit
/// kubeconfig (optionally pinned to a context), or the default chain.
///
/// # Errors
///
/// Returns an error if credentials cannot be loaded.
pub async fn connect_cluster(config: &ClusterConfig) -> Result<Arc<dyn ClusterClient>> {
    let options = KubeConfigOptions {
        context: config.context.clone(),
        ..KubeConfigOptions::default()
    };

    let client_config = if config.in_cluster {
        kube::Config::incluster().context("Failed to load in-cluster credentials")?
    } else if let Some(path) = &config.kubeconfig {
        let kubeconfig = Kubeconfig::read_from(path)
            .with_context(|| format!("Failed to read kubeconfig: {path}"))?;
        kube::Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .context("Failed to load kubeconfig")?
    } else if config.context.is_some() {
        kube::Config::from_kubeconfig(&options)
            .await
            .context("Failed to load kubeconfig context")?
    } else {
        kube::Config::infer()
            .await
            .context("Failed to infer cluster credentials")?
    };

    tracing::info!(
        cluster_url = %client_config.cluster_url,
        in_cluster = config.in_cluster,
        context = config.context.as_deref().unwrap_or("<default>"),
        "Cluster client configured"
    );

    let client = kube::Client::try_from(client_config).context("Failed to build cluster client")?;
    Ok(Arc::new(KubeCluster::new(client)) as Arc<dyn ClusterClient>)
}

/// Verify the object store opens. Logs the outcome.
pub fn check_object_store(config: &StoreConfig) -> bool {
    match create_object_store(config) {
        Ok(_) => {
            tracing::info!("Object store: OK");
            true
        }
        Err(e) => {
            tracing::error!("Object store: FAILED ({e:#})");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_types::ids::ObjectId;

    #[test]
    fn test_sqlite_store_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackendKind::Sqlite,
            connection: Some(dir.path().join("nested/objects.db").display().to_string()),
        };
        let store = create_object_store(&config).unwrap();
        assert!(store.find_object(ObjectId(1)).unwrap().is_none());
        assert!(check_object_store(&config));
    }

    #[test]
    fn test_unreachable_postgres_fails() {
        let config = StoreConfig {
            backend: StoreBackendKind::Postgres,
            connection: Some("host=127.0.0.1 port=1 dbname=none connect_timeout=1".to_string()),
        };
        assert!(create_object_store(&config).is_err());
        assert!(!check_object_store(&config));
    }
}
