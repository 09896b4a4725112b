use std::sync::Arc;
use std::time::Duration;

use nebula_core::{ClusterError, Method, Request};
use nebula_dispatch::Dispatcher;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::key::AgencyKey;

/// A single key mutation within a [`Transaction`].
#[derive(Clone, Debug)]
pub enum Mutation {
    Set {
        key: AgencyKey,
        value: serde_json::Value,
        ttl: Option<Duration>,
    },
    Delete {
        key: AgencyKey,
    },
    Observe {
        key: AgencyKey,
        url: String,
    },
    Unobserve {
        key: AgencyKey,
        url: String,
    },
    ArrayPush {
        key: AgencyKey,
        value: serde_json::Value,
    },
    ArrayErase {
        key: AgencyKey,
        value: serde_json::Value,
    },
    ArrayReplace {
        key: AgencyKey,
        old: serde_json::Value,
        new: serde_json::Value,
    },
}

/// A conditional guard attached to a key within a [`Transaction`]. The whole
/// transaction is rejected (`PreconditionFailed`) if any guard does not hold
/// at commit time.
#[derive(Clone, Debug)]
pub enum Precondition {
    IfEqual(serde_json::Value),
    IfNotEqual(serde_json::Value),
    OldEmpty(bool),
    IsArray(bool),
}

/// An ordered batch of [`Mutation`]s plus a `key -> Precondition` map,
/// applied atomically: all mutations commit or none do.
#[derive(Clone, Debug, Default)]
pub struct Transaction {
    mutations: Vec<Mutation>,
    preconditions: Vec<(AgencyKey, Precondition)>,
    client_id: Option<String>,
    transient: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    pub fn with_precondition(mut self, key: AgencyKey, precondition: Precondition) -> Self {
        self.preconditions.push((key, precondition));
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Marks the transaction as transient: its writes are applied but skip
    /// the durable replicated log, and are POSTed to `/_api/agency/transient`.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

fn mutation_entry(mutation: &Mutation) -> (String, serde_json::Value) {
    match mutation {
        Mutation::Set { key, value, ttl } => {
            let mut entry = json!({"op": "set", "new": value});
            if let Some(ttl) = ttl {
                entry["ttl"] = json!(ttl.as_secs());
            }
            (key.wire(), entry)
        }
        Mutation::Delete { key } => (key.wire(), json!({"op": "delete"})),
        Mutation::Observe { key, url } => (key.wire(), json!({"op": "observe", "url": url})),
        Mutation::Unobserve { key, url } => (key.wire(), json!({"op": "unobserve", "url": url})),
        Mutation::ArrayPush { key, value } => (key.wire(), json!({"op": "arrayPush", "new": value})),
        Mutation::ArrayErase { key, value } => (key.wire(), json!({"op": "arrayErase", "val": value})),
        Mutation::ArrayReplace { key, old, new } => {
            (key.wire(), json!({"op": "arrayReplace", "val": old, "new": new}))
        }
    }
}

fn precondition_entry(precondition: &Precondition) -> serde_json::Value {
    match precondition {
        Precondition::IfEqual(v) => json!({"ifEqual": v}),
        Precondition::IfNotEqual(v) => json!({"ifNotEqual": v}),
        Precondition::OldEmpty(b) => json!({"oldEmpty": b}),
        Precondition::IsArray(b) => json!({"isArray": b}),
    }
}

/// Walks a nested JSON document one path segment at a time. The agency
/// mirrors a key's path as nested objects in its read responses, rather
/// than returning a flat dotted map.
fn walk<'a>(mut node: &'a serde_json::Value, segments: &[String]) -> Option<&'a serde_json::Value> {
    for segment in segments {
        node = node.get(segment)?;
    }
    Some(node)
}

/// Key-path reads/writes and conditional transactions against the agency.
pub struct AgencyClient {
    dispatcher: Arc<Dispatcher>,
}

impl AgencyClient {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Raw read: `Ok(Value::Null)` is never returned, an absent key surfaces
    /// as [`ClusterError::KeyNotFound`] directly.
    pub(crate) async fn read_raw(&self, key: &AgencyKey) -> Result<serde_json::Value, ClusterError> {
        let request = Request::builder(Method::Post)
            .segment("_api")
            .segment("agency")
            .segment("read")
            .json_body(json!([[key.wire()]]))
            .build();

        let response = self.dispatcher.execute(request).await?;
        let entry = response.body.get(0).cloned().unwrap_or(serde_json::Value::Null);
        match walk(&entry, key.segments()) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(ClusterError::KeyNotFound),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_key<T: DeserializeOwned>(&self, key: &AgencyKey) -> Result<T, ClusterError> {
        let value = self.read_raw(key).await?;
        serde_json::from_value(value).map_err(|err| ClusterError::Protocol(format!("agency value did not decode: {err}")))
    }

    #[tracing::instrument(skip(self, tx))]
    pub async fn write_transaction(&self, tx: Transaction) -> Result<(), ClusterError> {
        let mut mutations = serde_json::Map::new();
        for mutation in &tx.mutations {
            let (key, entry) = mutation_entry(mutation);
            mutations.insert(key, entry);
        }
        let mut preconditions = serde_json::Map::new();
        for (key, precondition) in &tx.preconditions {
            preconditions.insert(key.wire(), precondition_entry(precondition));
        }
        let client_id = tx.client_id.clone().unwrap_or_default();
        let body = json!([[mutations, preconditions, client_id]]);

        let segment = if tx.transient { "transient" } else { "write" };
        let request = Request::builder(Method::Post)
            .segment("_api")
            .segment("agency")
            .segment(segment)
            .json_body(body)
            .build();

        self.dispatcher.execute(request).await?;
        Ok(())
    }

    pub async fn write_key(
        &self,
        key: &AgencyKey,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), ClusterError> {
        self.write_transaction(Transaction::new().with_mutation(Mutation::Set {
            key: key.clone(),
            value,
            ttl,
        }))
        .await
    }

    pub async fn write_key_if_empty(
        &self,
        key: &AgencyKey,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), ClusterError> {
        let tx = Transaction::new()
            .with_mutation(Mutation::Set {
                key: key.clone(),
                value,
                ttl,
            })
            .with_precondition(key.clone(), Precondition::OldEmpty(true));
        self.write_transaction(tx).await
    }

    pub async fn write_key_if_equal_to(
        &self,
        key: &AgencyKey,
        new_value: serde_json::Value,
        old_value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), ClusterError> {
        let tx = Transaction::new()
            .with_mutation(Mutation::Set {
                key: key.clone(),
                value: new_value,
                ttl,
            })
            .with_precondition(key.clone(), Precondition::IfEqual(old_value));
        self.write_transaction(tx).await
    }

    pub async fn remove_key(&self, key: &AgencyKey) -> Result<(), ClusterError> {
        self.write_transaction(Transaction::new().with_mutation(Mutation::Delete { key: key.clone() }))
            .await
    }

    pub async fn remove_key_if_equal_to(&self, key: &AgencyKey, old_value: serde_json::Value) -> Result<(), ClusterError> {
        let tx = Transaction::new()
            .with_mutation(Mutation::Delete { key: key.clone() })
            .with_precondition(key.clone(), Precondition::IfEqual(old_value));
        self.write_transaction(tx).await
    }

    pub async fn register_change_callback(&self, key: &AgencyKey, url: impl Into<String>) -> Result<(), ClusterError> {
        let tx = Transaction::new().with_mutation(Mutation::Observe {
            key: key.clone(),
            url: url.into(),
        });
        self.write_transaction(tx).await
    }

    pub async fn unregister_change_callback(&self, key: &AgencyKey, url: impl Into<String>) -> Result<(), ClusterError> {
        let tx = Transaction::new().with_mutation(Mutation::Unobserve {
            key: key.clone(),
            url: url.into(),
        });
        self.write_transaction(tx).await
    }
}
