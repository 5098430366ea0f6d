//! Node RPC queries.
//!
//! The [`NodeRpc`] trait decouples the health cycle from the HTTP
//! transport so cycles can be driven by an in-memory fake in tests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Boxed future returned by [`NodeRpc`] methods.
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Response of the node's `getinfo` method.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Local block height.
    pub height: u64,
    /// Current network difficulty.
    pub difficulty: u64,
    /// Node status string (`"OK"` when healthy).
    pub status: String,
    /// Height reported by the node's peers.
    pub network_height: u64,
}

/// Response of the node's `getheight` method.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HeightReport {
    /// Local block height.
    pub height: u64,
    /// Node status string.
    pub status: String,
}

/// Response of the node's `gettransactions` method; only the status is
/// consumed.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TransactionsReport {
    /// Node status string.
    pub status: String,
}

/// Query interface of a running node.
pub trait NodeRpc: Send + Sync {
    /// General node info: height, difficulty, status, network height.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rpc` on transport, status or decode failure.
    fn get_info(&self) -> RpcFuture<'_, NodeInfo>;

    /// Current height, queried independently of [`get_info`](Self::get_info).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rpc` on transport, status or decode failure.
    fn get_height(&self) -> RpcFuture<'_, HeightReport>;

    /// Pending-transaction listing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rpc` on transport, status or decode failure.
    fn get_transactions(&self) -> RpcFuture<'_, TransactionsReport>;
}

/// [`NodeRpc`] over the node's HTTP interface:
/// `GET http://{host}:{port}/{method}` returning a JSON object.
#[derive(Debug, Clone)]
pub struct HttpRpc {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRpc {
    /// Build a client for `base_url` (no trailing slash) with a per-call
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rpc` if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Rpc(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Base URL queries are issued against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn query<T: DeserializeOwned>(&self, method: &str) -> Result<T> {
        let url = format!("{}/{method}", self.base_url);
        debug!(%url, "rpc query");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Rpc(format!("could not get /{method}: {err}")))?;
        response
            .json::<T>()
            .await
            .map_err(|err| AppError::Rpc(format!("invalid /{method} response: {err}")))
    }
}

impl NodeRpc for HttpRpc {
    fn get_info(&self) -> RpcFuture<'_, NodeInfo> {
        Box::pin(self.query("getinfo"))
    }

    fn get_height(&self) -> RpcFuture<'_, HeightReport> {
        Box::pin(self.query("getheight"))
    }

    fn get_transactions(&self) -> RpcFuture<'_, TransactionsReport> {
        Box::pin(self.query("gettransactions"))
    }
}
