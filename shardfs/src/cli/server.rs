use crate::config::Settings;
use crate::fs::flake::Flake;
use crate::fs::store::ChunkStore;
use crate::fs::DirService;
use crate::kv::{Kv, MemoryKv, RocksKv};
use crate::rpc::server::{serve_tcp, ApiConfig, ApiServer};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run_server(config_path: &Path, ephemeral: bool) -> Result<()> {
    let settings = Settings::from_file(config_path)?;

    let kv: Arc<dyn Kv> = if ephemeral {
        info!("running with an in-memory store; data will not survive exit");
        Arc::new(MemoryKv::new())
    } else {
        Arc::new(
            RocksKv::open(&settings.server.data_dir).with_context(|| {
                format!(
                    "failed to open data dir {}",
                    settings.server.data_dir.display()
                )
            })?,
        )
    };

    let dir = Arc::new(
        DirService::new(kv.clone())
            .await
            .context("failed to initialize directory service")?,
    );
    let chunks = ChunkStore::new(kv);
    let flake = Arc::new(Flake::new(settings.flake.node_id, settings.flake.epoch_ms));
    let api = Arc::new(ApiServer::new(
        dir,
        chunks,
        flake,
        ApiConfig {
            block_size: settings.server.block_size,
            customer_id: settings.server.customer_id,
            share_id: settings.server.share_id,
        },
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    serve_tcp(
        settings.server.listen,
        api,
        settings.server.allowed_addrs,
        shutdown,
    )
    .await
}
