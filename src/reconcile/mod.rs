//! Create/read/update/delete reconciliation shared by every resource kind.
//!
//! Each resource kind provides a model (the attribute record kept in state)
//! and a reconciler (the RPC sequence for each verb). Updates always go
//! through [`diff::diff`], so only changed options reach the server.

pub mod diff;
pub mod members;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::freeipa::IpaRpc;
use crate::freeipa::types::{Record, RpcResult};
pub use diff::{ChangeSet, Field, FieldKind};

pub trait ResourceModel: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync {
    const KIND: &'static str;

    fn id(&self) -> Option<&str>;

    /// Local checks that must pass before any RPC is sent.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Attributes carried by the generic modify call, in wire form.
    fn fields(&self) -> Result<Vec<Field>>;

    /// Immutable attributes that differ from `prior`; any change forces
    /// the object to be replaced.
    fn replaced_fields(&self, prior: &Self) -> Vec<&'static str>;

    /// RPCs other than the modify call that an update from `prior` issues.
    fn side_calls(&self, _prior: &Self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Create,
    NoOp,
    Update { modify: ChangeSet, calls: Vec<String> },
    Replace { fields: Vec<&'static str> },
}

/// Preview what applying `config` over `prior` would do.
pub fn plan<M: ResourceModel>(config: &M, prior: Option<&M>) -> Result<PlannedAction> {
    config.validate()?;
    let Some(prior) = prior else {
        return Ok(PlannedAction::Create);
    };

    let replaced = config.replaced_fields(prior);
    if !replaced.is_empty() {
        return Ok(PlannedAction::Replace { fields: replaced });
    }

    let modify = diff::diff(&config.fields()?, &prior.fields()?);
    let calls = config.side_calls(prior)?;
    if modify.is_empty() && calls.is_empty() {
        Ok(PlannedAction::NoOp)
    } else {
        Ok(PlannedAction::Update { modify, calls })
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    type Model: ResourceModel;

    async fn create(&self, plan: Self::Model) -> Result<Self::Model>;

    /// `Ok(None)` means the object is gone and should be dropped from state.
    async fn read(&self, state: Self::Model) -> Result<Option<Self::Model>>;

    async fn update(&self, plan: Self::Model, prior: Self::Model) -> Result<Self::Model>;

    async fn delete(&self, state: &Self::Model) -> Result<()>;

    /// Adopt an existing object by identifier, tracking every attribute it has.
    async fn import(&self, id: &str) -> Result<Option<Self::Model>>;

    /// Data-source style lookup: like import, but absence is an error.
    async fn lookup(&self, id: &str) -> Result<Self::Model> {
        self.import(id).await?.ok_or_else(|| ProviderError::NotFound {
            kind: <Self::Model as ResourceModel>::KIND,
            id: id.to_string(),
        })
    }
}

/// Drop values that stayed pending through apply: they were never sent, so
/// the new state does not track them.
pub(crate) fn settle<M: ResourceModel>(model: M) -> Result<M> {
    let mut doc = serde_json::to_value(&model)
        .map_err(|e| ProviderError::protocol(format!("cannot encode {} state: {e}", M::KIND)))?;
    if let Value::Object(fields) = &mut doc {
        for value in fields.values_mut() {
            let pending = value
                .as_object()
                .is_some_and(|o| o.len() == 1 && o.get("unknown") == Some(&Value::Bool(true)));
            if pending {
                *value = Value::Null;
            }
        }
    }
    serde_json::from_value(doc)
        .map_err(|e| ProviderError::protocol(format!("cannot decode {} state: {e}", M::KIND)))
}

pub(crate) fn options(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// `*_show` with all attributes; `None` when the object does not exist.
pub(crate) async fn show(
    rpc: &dyn IpaRpc,
    method: &str,
    args: Vec<Value>,
) -> Result<Option<Record>> {
    match rpc
        .call(method, args, options(&[("all", Value::Bool(true))]))
        .await
    {
        Ok(res) => Ok(Some(res.record())),
        Err(err) if err.is_not_found() => {
            debug!(method, "object not found");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// `*_mod` with the given changes. An empty change set sends nothing.
pub(crate) async fn modify(
    rpc: &dyn IpaRpc,
    method: &str,
    args: Vec<Value>,
    changes: ChangeSet,
) -> Result<Option<RpcResult>> {
    if changes.is_empty() {
        debug!(method, "no attribute changes, skipping modify");
        return Ok(None);
    }
    debug!(method, options = ?changes.options().collect::<Vec<_>>(), "modifying");
    match rpc.call(method, args, changes.into_options()).await {
        Ok(res) => Ok(Some(res)),
        Err(ProviderError::Client(err)) if err.is_empty_modlist() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Enable/disable style call; "already enabled/disabled" replies count as done.
pub(crate) async fn switch(rpc: &dyn IpaRpc, method: &str, args: Vec<Value>) -> Result<()> {
    debug!(method, "toggling");
    match rpc.call(method, args, Map::new()).await {
        Ok(_) => Ok(()),
        Err(ProviderError::Client(err)) if err.is_already_in_state() => Ok(()),
        Err(err) => Err(err),
    }
}
