use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Create-or-replace policy for document writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverwriteMode {
    Ignore,
    Replace,
    Update,
    Conflict,
}

/// One binding in the option chain. Each `with_*` call on [`RequestContext`]
/// pushes a new binding in front of the chain; reading a key walks the chain
/// from the tip and returns the first match, so later bindings shadow
/// earlier ones of the same key.
#[derive(Clone, Debug)]
enum Binding {
    Revision(String),
    Revisions(Arc<Vec<String>>),
    ReturnNew(bool),
    ReturnOld(bool),
    Silent(bool),
    WaitForSync(bool),
    KeepNull(bool),
    MergeObjects(bool),
    OverwriteMode(OverwriteMode),
    RawResponse(bool),
    Details(bool),
    QueueTimeout(Duration),
    EndpointPin(String),
    Async(bool),
    AsyncId(String),
    ShardIds(Arc<Vec<String>>),
    Profile(bool),
    FillBlockCache(bool),
    ForceOneShardAttributeValue(bool),
    AllowRetry(bool),
    BatchSize(u32),
    Count(bool),
    Cancellation(CancellationToken),
}

#[derive(Debug)]
struct Node {
    parent: Option<Arc<Node>>,
    binding: Binding,
}

/// An immutable, chainable bag of per-call options.
///
/// `RequestContext::default()` is an empty context and is always a valid
/// stand-in for "no options were supplied" -- there is no implicit global
/// context and no thread-local magic. Every setter returns a *new* context;
/// the receiver is left untouched, so contexts can be shared and extended
/// from multiple call sites without surprising each other.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    tip: Option<Arc<Node>>,
}

macro_rules! setter_getter {
    ($with:ident, $get:ident, $variant:ident, $t:ty) => {
        pub fn $with(&self, value: $t) -> Self {
            self.push(Binding::$variant(value))
        }

        pub fn $get(&self) -> Option<$t> {
            self.find(|b| match b {
                Binding::$variant(v) => Some(v.clone()),
                _ => None,
            })
        }
    };
}

impl RequestContext {
    fn push(&self, binding: Binding) -> Self {
        Self {
            tip: Some(Arc::new(Node {
                parent: self.tip.clone(),
                binding,
            })),
        }
    }

    fn find<T>(&self, mut pick: impl FnMut(&Binding) -> Option<T>) -> Option<T> {
        let mut cur = self.tip.as_ref();
        while let Some(node) = cur {
            if let Some(found) = pick(&node.binding) {
                return Some(found);
            }
            cur = node.parent.as_ref();
        }
        None
    }

    setter_getter!(with_revision, revision, Revision, String);
    setter_getter!(with_return_new, return_new, ReturnNew, bool);
    setter_getter!(with_return_old, return_old, ReturnOld, bool);
    setter_getter!(with_silent, silent, Silent, bool);
    setter_getter!(with_wait_for_sync, wait_for_sync, WaitForSync, bool);
    setter_getter!(with_keep_null, keep_null, KeepNull, bool);
    setter_getter!(with_merge_objects, merge_objects, MergeObjects, bool);
    setter_getter!(with_overwrite_mode, overwrite_mode, OverwriteMode, OverwriteMode);
    setter_getter!(with_raw_response, raw_response, RawResponse, bool);
    setter_getter!(with_details, details, Details, bool);
    setter_getter!(with_queue_timeout, queue_timeout, QueueTimeout, Duration);
    setter_getter!(with_endpoint_pin, endpoint_pin, EndpointPin, String);
    setter_getter!(with_async, is_async, Async, bool);
    setter_getter!(with_async_id, async_id, AsyncId, String);
    setter_getter!(with_profile, profile, Profile, bool);
    setter_getter!(with_fill_block_cache, fill_block_cache, FillBlockCache, bool);
    setter_getter!(
        with_force_one_shard_attribute_value,
        force_one_shard_attribute_value,
        ForceOneShardAttributeValue,
        bool
    );
    setter_getter!(with_allow_retry, allow_retry, AllowRetry, bool);
    setter_getter!(with_batch_size, batch_size, BatchSize, u32);
    setter_getter!(with_count, count, Count, bool);
    setter_getter!(with_cancellation, cancellation, Cancellation, CancellationToken);

    pub fn with_revisions(&self, revisions: Vec<String>) -> Self {
        self.push(Binding::Revisions(Arc::new(revisions)))
    }

    pub fn revisions(&self) -> Option<Arc<Vec<String>>> {
        self.find(|b| match b {
            Binding::Revisions(v) => Some(v.clone()),
            _ => None,
        })
    }

    pub fn with_shard_ids(&self, shard_ids: Vec<String>) -> Self {
        self.push(Binding::ShardIds(Arc::new(shard_ids)))
    }

    pub fn shard_ids(&self) -> Option<Arc<Vec<String>>> {
        self.find(|b| match b {
            Binding::ShardIds(v) => Some(v.clone()),
            _ => None,
        })
    }

    /// Validates option combinations that are individually well-typed but
    /// contradictory together, surfacing them as a single client-side
    /// `InvalidArgument` rather than letting the server reject the request.
    pub fn validate(&self) -> Result<(), crate::ClusterError> {
        if self.is_async() == Some(true) && self.async_id().is_some() {
            return Err(crate::ClusterError::InvalidArgument(
                "`async` and `asyncId` are mutually exclusive".into(),
            ));
        }
        if self.revision().is_some() && self.revisions().is_some() {
            return Err(crate::ClusterError::InvalidArgument(
                "`revision` and `revisions` are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}
