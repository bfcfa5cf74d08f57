//! Deployment self-check: tools, Redis and object storage.

use std::path::Path;
use std::process::Command;

use spin_media::stabilize::vidstab_available;
use spin_queue::JobQueue;
use spin_storage::S3Store;
use spin_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider already installed");
    }
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    println!("spin-selfcheck: starting with work_dir={}", config.work_dir.display());

    ensure_workdir(&config.work_dir).await?;
    ensure_tool("ffmpeg")?;
    ensure_tool("ffprobe")?;

    if vidstab_available().await {
        println!("spin-selfcheck: vidstab available");
    } else {
        println!("spin-selfcheck: vidstab missing, stabilization will fall back to deshake");
    }

    ensure_env_present(&["REDIS_URL", "S3_ENDPOINT_URL", "S3_ACCESS_KEY_ID", "S3_SECRET_ACCESS_KEY"])?;

    let queue = JobQueue::from_env()?;
    queue.ping().await?;
    println!(
        "spin-selfcheck: redis reachable (queued={}, dead-lettered={})",
        queue.len().await?,
        queue.dlq_len().await?
    );

    let store = S3Store::from_env()?;
    store.check_connectivity().await?;
    println!("spin-selfcheck: bucket '{}' reachable", store.bucket());

    println!("spin-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}

fn ensure_tool(name: &str) -> anyhow::Result<()> {
    let output = Command::new(name)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("{} -version failed: {:?}", name, output.status));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
