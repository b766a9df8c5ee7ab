//! HTTP replica transport
//!
//! Nodes hosted by this process are served by the wrapped `LocalTransport`;
//! every other node id is forwarded to the owning peer's internal API
//! (`/internal/:node/...`) with bincode-encoded bodies.

use crate::common::{encode_key, Error, PeerConfig, Result};
use crate::coordinator::transport::{LocalTransport, Transport};
use crate::node::{Entry, VersionVector};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub const OCTET_STREAM: &str = "application/octet-stream";

pub struct HttpTransport {
    local: Arc<LocalTransport>,
    peers: RwLock<HashMap<String, String>>,
    client: Client,
}

impl HttpTransport {
    pub fn new(local: Arc<LocalTransport>, peers: &[PeerConfig], timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        let peers = peers
            .iter()
            .map(|p| (p.id.clone(), p.addr.clone()))
            .collect();
        Ok(Self {
            local,
            peers: RwLock::new(peers),
            client,
        })
    }

    pub fn local(&self) -> &Arc<LocalTransport> {
        &self.local
    }

    /// Register (or re-address) a remote node
    pub fn add_peer(&self, id: &str, addr: &str) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), addr.trim_end_matches('/').to_string());
    }

    fn peer_addr(&self, node: &str) -> Option<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
    }

    fn entries_url(&self, node: &str) -> Result<String> {
        let addr = self
            .peer_addr(node)
            .ok_or_else(|| Error::UnknownNode(node.to_string()))?;
        Ok(format!("{}/internal/{}/entries", addr, encode_key(node)))
    }

    fn entry_url(&self, node: &str, key: &str) -> Result<String> {
        Ok(format!("{}/{}", self.entries_url(node)?, encode_key(key)))
    }

    fn versions_url(&self, node: &str) -> Result<String> {
        let addr = self
            .peer_addr(node)
            .ok_or_else(|| Error::UnknownNode(node.to_string()))?;
        Ok(format!("{}/internal/{}/versions", addr, encode_key(node)))
    }

    async fn check(node: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => Error::UnknownNode(node.to_string()),
            StatusCode::SERVICE_UNAVAILABLE => Error::NodeUnreachable(node.to_string()),
            StatusCode::REQUEST_TIMEOUT => Error::Timeout(node.to_string()),
            _ => Error::Http(format!("{} returned {}: {}", node, status, body)),
        })
    }

    async fn decode<T: DeserializeOwned>(node: &str, response: Response) -> Result<T> {
        let bytes = Self::check(node, response).await?.bytes().await?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn put_entry(&self, node: &str, entry: Entry) -> Result<()> {
        if self.local.hosts(node) {
            return self.local.put_entry(node, entry).await;
        }
        let url = self.entry_url(node, &entry.key)?;
        let body = bincode::serialize(&entry)?;
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send()
            .await?;
        Self::check(node, response).await?;
        Ok(())
    }

    async fn get_entry(&self, node: &str, key: &str) -> Result<Option<Entry>> {
        if self.local.hosts(node) {
            return self.local.get_entry(node, key).await;
        }
        let response = self.client.get(self.entry_url(node, key)?).send().await?;
        Self::decode(node, response).await
    }

    async fn delete_entry(&self, node: &str, key: &str) -> Result<bool> {
        if self.local.hosts(node) {
            return self.local.delete_entry(node, key).await;
        }
        let response = self.client.delete(self.entry_url(node, key)?).send().await?;
        Self::decode(node, response).await
    }

    async fn entries(&self, node: &str) -> Result<Vec<Entry>> {
        if self.local.hosts(node) {
            return self.local.entries(node).await;
        }
        let response = self.client.get(self.entries_url(node)?).send().await?;
        Self::decode(node, response).await
    }

    async fn replace_entries(&self, node: &str, entries: Vec<Entry>) -> Result<()> {
        if self.local.hosts(node) {
            return self.local.replace_entries(node, entries).await;
        }
        let body = bincode::serialize(&entries)?;
        let response = self
            .client
            .put(self.entries_url(node)?)
            .header(reqwest::header::CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send()
            .await?;
        Self::check(node, response).await?;
        Ok(())
    }

    async fn version_vector(&self, node: &str) -> Result<VersionVector> {
        if self.local.hosts(node) {
            return self.local.version_vector(node).await;
        }
        let response = self.client.get(self.versions_url(node)?).send().await?;
        Self::decode(node, response).await
    }

    /// Known peers attach as-is; any other id becomes a node hosted here.
    fn attach(&self, node: &str) -> Result<()> {
        if self.peer_addr(node).is_some() {
            return Ok(());
        }
        self.local.attach(node)
    }

    fn detach(&self, node: &str) -> Result<()> {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node);
        if removed.is_none() {
            self.local.detach(node)?;
        }
        Ok(())
    }

    fn is_attached(&self, node: &str) -> bool {
        self.local.hosts(node) || self.peer_addr(node).is_some()
    }
}
