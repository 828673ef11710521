use std::path::Path;

use anyhow::Result;
use flowmesh_engine::resolve::{check_object_store, connect_cluster};

/// Execute the `check-config` command: validate config and connectivity.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    // 1. Parse, overlay environment, validate
    let config = super::config(config_path)?;
    println!("Configuration:     OK");
    println!("  Kafka bootstrap: {}", config.kafka.bootstrap_servers());
    println!("  Sandbox image:   {}", config.images.sandbox);
    println!("  Listen:          {}:{}", config.server.host, config.server.port);

    // 2. Object store
    let store_ok = check_object_store(&config.store);
    println!("{:18} {}", "Object store:", if store_ok { "OK" } else { "FAILED" });

    // 3. Cluster credentials
    let cluster_ok = match connect_cluster(&config.cluster).await {
        Ok(_) => true,
        Err(e) => {
            println!("  {e:#}");
            false
        }
    };
    println!("{:18} {}", "Cluster client:", if cluster_ok { "OK" } else { "FAILED" });

    if store_ok && cluster_ok {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}
