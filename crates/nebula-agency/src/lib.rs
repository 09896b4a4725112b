//! The agency: a typed key/value client over the cluster's fault-tolerant
//! coordination store, plus a distributed advisory lock built entirely on
//! top of it.
//!
//! Callers point the [`nebula_dispatch::Dispatcher`] passed to
//! [`AgencyClient::new`] at the agent endpoints; [`nebula_dispatch`]'s own
//! retry/failover stack already "tries each agent in turn and moves to the
//! next on a non-leader response" when configured with
//! [`nebula_dispatch::SelectionPolicy::RoundRobin`] (a 503/no-leader
//! response is retryable and rotates endpoints), so this crate does not
//! reimplement endpoint iteration.

mod client;
mod key;
mod lock;

pub use client::{AgencyClient, Mutation, Precondition, Transaction};
pub use key::AgencyKey;
pub use lock::DistributedLock;
