//! Test doubles for the exchange transport, the chat and the settings store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::chat::{ChatTransport, UserId};
use crate::exchange::{ExchangeTransport, Operation, TransportError};
use crate::settings::SettingsStore;

/// Scripted response for one attempt.
#[derive(Debug, Clone)]
pub enum Scripted {
    Ok(Value),
    Err(TransportError),
    /// Never answers; the caller's timeout has to fire
    Hang,
}

/// One recorded attempt.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub operation: Operation,
    pub params: Vec<(String, String)>,
    pub nonce: u64,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Transport answering from per-operation queues. Unscripted calls fail
/// with a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<HashMap<Operation, VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, operation: Operation, response: Scripted) {
        self.script
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(response);
    }

    pub fn push_ok(&self, operation: Operation, result: Value) {
        self.push(operation, Scripted::Ok(result));
    }

    pub fn push_err(&self, operation: Operation, error: TransportError) {
        self.push(operation, Scripted::Err(error));
    }

    pub fn push_hang(&self, operation: Operation) {
        self.push(operation, Scripted::Hang);
    }

    pub fn calls(&self, operation: Operation) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExchangeTransport for ScriptedTransport {
    async fn send(
        &self,
        operation: Operation,
        params: &[(String, String)],
        nonce: u64,
    ) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            operation,
            params: params.to_vec(),
            nonce,
        });

        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Scripted::Ok(value)) => Ok(value),
            Some(Scripted::Err(error)) => Err(error),
            Some(Scripted::Hang) => futures::future::pending().await,
            None => Err(TransportError::Network(format!("unscripted {}", operation))),
        }
    }
}

/// `AddOrder` result for a given transaction id.
pub fn add_order_ok(txid: &str) -> Value {
    json!({
        "descr": { "order": "buy 0.50000000 XBTEUR @ limit 20000.0" },
        "txid": [txid]
    })
}

/// One open order entry as listed by `OpenOrders`.
pub fn open_order_json(description: &str) -> Value {
    json!({
        "status": "open",
        "opentm": 1688666559.8974,
        "descr": {
            "pair": "XBTEUR",
            "type": "buy",
            "ordertype": "limit",
            "price": "20000.0",
            "order": description
        },
        "vol": "0.50000000",
        "vol_exec": "0.00000000"
    })
}

/// Chat transport that records messages and can be told to fail.
#[derive(Default)]
pub struct RecordingChat {
    messages: Mutex<Vec<(UserId, String, Vec<String>)>>,
    failures: AtomicUsize,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<(UserId, String, Vec<String>)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    async fn send_message(&self, user: UserId, text: &str, choices: &[String]) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("chat unavailable"));
        }

        self.messages
            .lock()
            .unwrap()
            .push((user, text.to_string(), choices.to_vec()));
        Ok(())
    }
}

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .values
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
