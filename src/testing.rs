//! In-memory `IpaRpc` double: records every call and replays scripted replies.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{ProviderError, Result};
use crate::freeipa::IpaRpc;
use crate::freeipa::types::{RpcError, RpcResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: String,
    pub args: Vec<Value>,
    pub options: Map<String, Value>,
}

#[derive(Default)]
pub struct MockRpc {
    calls: Mutex<Vec<Call>>,
    replies: Mutex<HashMap<String, VecDeque<std::result::Result<RpcResult, RpcError>>>>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply whose `result` is `record`.
    pub fn respond(&self, method: &str, record: Value) {
        self.push(method, Ok(RpcResult {
            result: record,
            ..Default::default()
        }));
    }

    /// Queue a successful reply given as the full `result` object.
    pub fn respond_raw(&self, method: &str, reply: Value) {
        let parsed: RpcResult = serde_json::from_value(reply).unwrap();
        self.push(method, Ok(parsed));
    }

    pub fn fail(&self, method: &str, err: RpcError) {
        self.push(method, Err(err));
    }

    fn push(&self, method: &str, reply: std::result::Result<RpcResult, RpcError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }
}

pub fn not_found(what: &str) -> RpcError {
    RpcError {
        code: 4001,
        name: "NotFound".into(),
        message: format!("{what}: not found"),
    }
}

#[async_trait]
impl IpaRpc for MockRpc {
    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        options: Map<String, Value>,
    ) -> Result<RpcResult> {
        self.calls.lock().unwrap().push(Call {
            method: method.to_string(),
            args,
            options,
        });
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(Ok(res)) => Ok(res),
            Some(Err(err)) => Err(ProviderError::Client(err)),
            None => Ok(RpcResult::default()),
        }
    }
}
