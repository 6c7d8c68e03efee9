//! `stripevault request-file` — reconstruct a stored file.

use std::path::Path;

use anyhow::{Context, Result};
use stripe_store::{LedgerClient, Reconstructor, StripeCodec};

use crate::config::ClusterConfig;

pub async fn run(
    config: &ClusterConfig,
    addr: Option<String>,
    hash: &str,
    out: &Path,
) -> Result<()> {
    let addr = addr.unwrap_or_else(|| config.ledger.addr.clone());

    let ledger = LedgerClient::connect(&addr)
        .await
        .with_context(|| format!("failed to reach ledger at {addr}"))?;
    let codec = StripeCodec::new(config.codec.total_shards, config.codec.data_shards)?;

    let data = Reconstructor::new(codec, ledger)
        .fetch_file(hash)
        .await
        .with_context(|| format!("failed to reconstruct {hash}"))?;

    tokio::fs::write(out, &data)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
    eprintln!("wrote {} bytes to {}", data.len(), out.display());
    Ok(())
}
