use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nebula_core::ClusterError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::client::{AgencyClient, Precondition};
use crate::key::AgencyKey;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct LeaseValue {
    token: String,
    #[serde(with = "time::serde::rfc3339")]
    expires: OffsetDateTime,
}

impl LeaseValue {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires
    }
}

/// A leased, CAS-based advisory lock at an agency path, built entirely on
/// [`AgencyClient`]. `{}` or absent at `path` means unlocked; `{token,
/// expires}` means held by `token` until `expires`.
///
/// `owner_token` must uniquely identify this holder across hosts; two
/// `DistributedLock`s racing for the same path with different tokens behave
/// correctly, but two instances sharing a token would not be distinguishable
/// from each other's renewals.
pub struct DistributedLock {
    agency: Arc<AgencyClient>,
    path: AgencyKey,
    owner_token: String,
    lease: Duration,
    locked: AtomicBool,
    held: Mutex<Option<LeaseValue>>,
}

impl DistributedLock {
    pub fn new(agency: Arc<AgencyClient>, path: AgencyKey, owner_token: impl Into<String>, lease: Duration) -> Self {
        Self {
            agency,
            path,
            owner_token: owner_token.into(),
            lease,
            locked: AtomicBool::new(false),
            held: Mutex::new(None),
        }
    }

    /// A local snapshot; does NOT confirm the server still holds the lease.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    #[tracing::instrument(skip(self))]
    pub async fn lock(&self, deadline: Duration) -> Result<(), ClusterError> {
        if self.locked.load(Ordering::Acquire) {
            return Err(ClusterError::AlreadyLocked);
        }

        let started = tokio::time::Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let observed = self.agency.read_raw(&self.path).await;
            let precondition = match observed {
                Err(ClusterError::KeyNotFound) => Some(Precondition::OldEmpty(true)),
                Err(err) => return Err(err),
                Ok(value) => match serde_json::from_value::<LeaseValue>(value.clone()) {
                    Ok(existing) if !existing.is_expired(now()) => None,
                    _ => Some(Precondition::IfEqual(value)),
                },
            };

            if let Some(precondition) = precondition {
                let lease = LeaseValue {
                    token: self.owner_token.clone(),
                    expires: now() + self.lease,
                };
                let tx = crate::client::Transaction::new()
                    .with_mutation(crate::client::Mutation::Set {
                        key: self.path.clone(),
                        value: json!(lease),
                        ttl: Some(self.lease),
                    })
                    .with_precondition(self.path.clone(), precondition);

                match self.agency.write_transaction(tx).await {
                    Ok(()) => {
                        *self.held.lock().expect("lock state poisoned") = Some(lease);
                        self.locked.store(true, Ordering::Release);
                        return Ok(());
                    }
                    Err(err) if err.is_precondition_failed() => {
                        // lost the race; fall through to backoff and retry
                    }
                    Err(err) => return Err(err),
                }
            }

            if started.elapsed() >= deadline {
                return Err(ClusterError::LockTimeout);
            }
            tokio::time::sleep(jittered(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn unlock(&self) -> Result<(), ClusterError> {
        if !self.locked.load(Ordering::Acquire) {
            return Err(ClusterError::NotLocked);
        }

        let expected = self.held.lock().expect("lock state poisoned").clone();
        let Some(expected) = expected else {
            self.locked.store(false, Ordering::Release);
            return Err(ClusterError::NotLocked);
        };

        let result = self
            .agency
            .remove_key_if_equal_to(&self.path, json!(expected))
            .await;

        self.locked.store(false, Ordering::Release);
        *self.held.lock().expect("lock state poisoned") = None;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_precondition_failed() => Err(ClusterError::NotLocked),
            Err(err) => Err(err),
        }
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn jittered(base: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=(base.as_millis() as u64 / 2).max(1));
    base + Duration::from_millis(jitter_ms)
}
