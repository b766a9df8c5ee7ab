//! CLI for cluster operations

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ringkv::common::{encode_key, parse_duration, retry_with_backoff};
use ringkv::{Consistency, Error};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ringkv")]
#[command(about = "ringkv distributed key-value store CLI")]
#[command(version)]
struct Cli {
    /// Node URL
    #[arg(long, default_value = "http://localhost:7000")]
    node: String,

    /// Request timeout (e.g. 500ms, 5s)
    #[arg(long, default_value = "10s")]
    timeout: String,

    /// Attempts for retryable failures
    #[arg(long, default_value = "3")]
    retries: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a value
    Put {
        key: String,

        /// Value (reads --file when omitted)
        value: Option<String>,

        #[arg(long)]
        file: Option<std::path::PathBuf>,

        #[arg(long, default_value = "strong")]
        consistency: Consistency,
    },

    /// Read a value
    Get {
        key: String,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<std::path::PathBuf>,

        #[arg(long, default_value = "strong")]
        consistency: Consistency,
    },

    /// Delete a key
    Delete {
        key: String,

        #[arg(long, default_value = "strong")]
        consistency: Consistency,
    },

    /// Create a backup
    Backup,

    /// Restore a backup
    Restore { backup_id: String },

    /// List backups
    Backups,

    /// List cluster nodes
    Nodes,

    /// Add a node (hosted by the target node unless --addr is given)
    AddNode {
        id: String,

        #[arg(long)]
        addr: Option<String>,
    },

    /// Remove a node
    RemoveNode { id: String },

    /// Run one sync sweep
    Sync,

    /// Verify cluster integrity
    Verify,
}

struct Api {
    base: String,
    client: reqwest::Client,
    retries: usize,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    /// Send a request, retrying while the node reports a retryable failure
    async fn send<F>(&self, build: F) -> anyhow::Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = retry_with_backoff(
            || async {
                let response = build(&self.client).send().await?;
                match response.status() {
                    reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                        let body = response.text().await.unwrap_or_default();
                        Err(Error::NodeUnreachable(body))
                    }
                    reqwest::StatusCode::REQUEST_TIMEOUT => {
                        Err(Error::Timeout(response.text().await.unwrap_or_default()))
                    }
                    _ => Ok(response),
                }
            },
            self.retries.max(1),
            Duration::from_millis(200),
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{}: {}", status, body);
        }
        Ok(response)
    }

    async fn json(&self, response: reqwest::Response) -> anyhow::Result<serde_json::Value> {
        Ok(response.json().await?)
    }
}

fn kv_path(key: &str, consistency: Consistency) -> String {
    format!("/kv/{}?consistency={}", encode_key(key), consistency)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let timeout = parse_duration(&cli.timeout)?;
    let api = Api {
        base: cli.node.clone(),
        client: reqwest::Client::builder().timeout(timeout).build()?,
        retries: cli.retries,
    };

    match cli.command {
        Commands::Put {
            key,
            value,
            file,
            consistency,
        } => {
            let body = match (value, file) {
                (Some(value), _) => value.into_bytes(),
                (None, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => bail!("either a value or --file is required"),
            };
            let url = api.url(&kv_path(&key, consistency));
            let response = api.send(|c| c.put(&url).body(body.clone())).await?;
            let written = api.json(response).await?;
            println!("OK {} (version {})", key, written["version"]);
        }

        Commands::Get {
            key,
            output,
            consistency,
        } => {
            let url = api.url(&kv_path(&key, consistency));
            let response = api.send(|c| c.get(&url)).await?;
            let bytes = response.bytes().await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &bytes)?;
                    println!("Wrote {} bytes to {}", bytes.len(), path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&bytes)),
            }
        }

        Commands::Delete { key, consistency } => {
            let url = api.url(&kv_path(&key, consistency));
            api.send(|c| c.delete(&url)).await?;
            println!("Deleted {}", key);
        }

        Commands::Backup => {
            let url = api.url("/backups");
            let response = api.send(|c| c.post(&url)).await?;
            let body = api.json(response).await?;
            println!("Created backup {}", body["backup_id"]);
        }

        Commands::Restore { backup_id } => {
            let url = api.url(&format!("/backups/{}/restore", encode_key(&backup_id)));
            api.send(|c| c.post(&url)).await?;
            println!("Restored backup {}", backup_id);
        }

        Commands::Backups => {
            let url = api.url("/backups");
            let response = api.send(|c| c.get(&url)).await?;
            let body = api.json(response).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::Nodes => {
            let url = api.url("/cluster/nodes");
            let response = api.send(|c| c.get(&url)).await?;
            let body = api.json(response).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        Commands::AddNode { id, addr } => {
            let url = api.url(&format!("/cluster/nodes/{}", encode_key(&id)));
            let response = api
                .send(|c| match &addr {
                    Some(addr) => c.post(&url).json(&serde_json::json!({ "addr": addr })),
                    None => c.post(&url),
                })
                .await?;
            let body = api.json(response).await?;
            println!("Rebalance report:");
            println!("{}", serde_json::to_string_pretty(&body["report"])?);
        }

        Commands::RemoveNode { id } => {
            let url = api.url(&format!("/cluster/nodes/{}", encode_key(&id)));
            let response = api.send(|c| c.delete(&url)).await?;
            let body = api.json(response).await?;
            println!("Rebalance report:");
            println!("{}", serde_json::to_string_pretty(&body["report"])?);
        }

        Commands::Sync => {
            let url = api.url("/admin/sync");
            let response = api.send(|c| c.post(&url)).await?;
            let body = api.json(response).await?;
            let report = &body["report"];
            println!("Sync report:");
            println!("  Pairs synced: {}", report["pairs_synced"]);
            println!("  Pairs failed: {}", report["pairs_failed"]);
            println!("  Copied: {}", report["copied"]);
            println!("  Resolved: {}", report["resolved"]);
            println!("  Tombstones collected: {}", report["tombstones_collected"]);
        }

        Commands::Verify => {
            let url = api.url("/admin/verify");
            let response = api.send(|c| c.get(&url)).await?;
            let body = api.json(response).await?;
            let report = &body["report"];
            println!("Verification report:");
            println!("  Total keys: {}", report["total_keys"]);
            println!("  Healthy: {}", report["healthy"]);
            println!("  Under-replicated: {}", report["under_replicated"]);
            println!("  Divergent: {}", report["divergent"]);
            println!("  Misplaced: {}", report["misplaced"]);
        }
    }

    Ok(())
}
