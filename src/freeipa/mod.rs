//! FreeIPA JSON-RPC transport.

pub mod client;
pub mod types;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use types::RpcResult;

/// One JSON-RPC round trip: `method(args..., **options)`.
///
/// Implemented by [`client::FreeIpaClient`] for real servers; reconcilers only
/// ever see this trait, so one client handle can be shared across all of them.
#[async_trait]
pub trait IpaRpc: Send + Sync {
    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        options: Map<String, Value>,
    ) -> Result<RpcResult>;
}
