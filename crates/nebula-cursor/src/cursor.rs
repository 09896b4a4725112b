use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use nebula_core::{ClusterError, Method, Request, RequestContext};
use nebula_dispatch::Dispatcher;
use page_turner::{PageTurner, PageTurnerOutput, TurnedPage};
use serde::de::DeserializeOwned;

/// Everything `turn_page` needs to fetch one cursor batch: which cursor,
/// whether it allows retry (and therefore expects a batch-id-addressed
/// URL), the batch id to request, and the endpoint an `allowRetry` cursor
/// is pinned to.
#[derive(Clone, Debug)]
struct CursorPageRequest {
    database: String,
    cursor_id: String,
    allow_retry: bool,
    batch_id: u64,
    pinned_endpoint: Option<String>,
}

/// One decoded batch plus enough metadata to decide whether to keep
/// turning, and, for `allowRetry` cursors, to verify a repeated fetch is
/// bitwise identical to the one it replaces.
struct CursorBatch<T> {
    items: Vec<T>,
    has_more: bool,
    count: Option<u64>,
    extra: serde_json::Value,
    raw_result: Bytes,
}

struct CursorClient<T> {
    dispatcher: Arc<Dispatcher>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> CursorClient<T> {
    fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            _marker: std::marker::PhantomData,
        }
    }
}

/// Unwraps a turned page's items regardless of whether it signaled more
/// pages remain.
fn turned_items<Item, Req>(turned: TurnedPage<Item, Req>) -> Vec<Item> {
    match turned {
        TurnedPage::Next(items, _next) => items,
        TurnedPage::Last(items) => items,
    }
}

#[async_trait]
impl<T> PageTurner<CursorPageRequest> for CursorClient<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type PageItem = CursorBatch<T>;
    type PageError = ClusterError;

    async fn turn_page(&self, request: CursorPageRequest) -> PageTurnerOutput<Self, CursorPageRequest> {
        let mut builder = Request::builder(Method::Put)
            .segment("_db")
            .segment(&request.database)
            .segment("_api")
            .segment("cursor")
            .segment(&request.cursor_id);
        if request.allow_retry {
            builder = builder.segment(request.batch_id.to_string());
        }

        let mut ctx = RequestContext::default();
        if let Some(pin) = &request.pinned_endpoint {
            ctx = ctx.with_endpoint_pin(pin.clone());
        }

        let response = self
            .dispatcher
            .execute(builder.context(ctx).build())
            .await?;

        let has_more = response
            .body
            .get("hasMore")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let count = response.body.get("count").and_then(|v| v.as_u64());
        let extra = response
            .body
            .get("extra")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let result_value = response
            .body
            .get("result")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
        let raw_result = Bytes::from(serde_json::to_vec(&result_value).unwrap_or_default());
        let items: Vec<T> = serde_json::from_value(result_value)
            .map_err(|err| ClusterError::Protocol(format!("cursor batch did not decode: {err}")))?;

        let batch = CursorBatch {
            items,
            has_more,
            count,
            extra,
            raw_result,
        };

        if batch.has_more {
            Ok(TurnedPage::next(
                vec![batch],
                CursorPageRequest {
                    batch_id: request.batch_id + 1,
                    ..request
                },
            ))
        } else {
            Ok(TurnedPage::last(vec![batch]))
        }
    }
}

/// A resumable, server-batched result stream. Created from the response to
/// `POST /_api/cursor`; `read_document` drains the locally buffered batch
/// and transparently fetches the next one on exhaustion. `allowRetry`
/// cursors (see [`nebula_core::RequestContext::with_allow_retry`]) pin
/// fetches to the endpoint that produced the cursor and support
/// [`Cursor::retry_read_document`].
pub struct Cursor<T> {
    client: CursorClient<T>,
    database: String,
    id: Option<String>,
    allow_retry: bool,
    pinned_endpoint: Option<String>,
    next_batch_id: u64,
    buffer: VecDeque<T>,
    has_more: bool,
    count: Option<u64>,
    extra: serde_json::Value,
    last_raw_result: Option<Bytes>,
    last_fetched_batch_id: Option<u64>,
    /// How many documents have been popped from `buffer` since it was last
    /// filled; doubles as the index, within the last-fetched batch, of the
    /// next document `read_document` will hand out.
    batch_index: usize,
    /// Index, within the last-fetched batch, of the document the most
    /// recent successful `read_document` call returned. `None` until the
    /// first document is read.
    last_returned_index: Option<usize>,
}

impl<T> Cursor<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    #[tracing::instrument(skip(dispatcher, body, ctx), fields(database = %database.as_ref()))]
    pub async fn create(
        dispatcher: Arc<Dispatcher>,
        database: impl AsRef<str>,
        body: serde_json::Value,
        ctx: RequestContext,
    ) -> Result<Self, ClusterError> {
        ctx.validate()?;
        let database = database.as_ref().to_string();
        let allow_retry = ctx.allow_retry().unwrap_or(false);

        let request = Request::builder(Method::Post)
            .segment("_db")
            .segment(&database)
            .segment("_api")
            .segment("cursor")
            .context(ctx)
            .json_body(body)
            .build();

        let response = dispatcher.execute(request).await?;

        let id = response
            .body
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let has_more = response
            .body
            .get("hasMore")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let count = response.body.get("count").and_then(|v| v.as_u64());
        let extra = response
            .body
            .get("extra")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let result_value = response
            .body
            .get("result")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
        let raw_result = Bytes::from(serde_json::to_vec(&result_value).unwrap_or_default());
        let items: Vec<T> = serde_json::from_value(result_value)
            .map_err(|err| ClusterError::Protocol(format!("cursor batch did not decode: {err}")))?;

        let pinned_endpoint = if allow_retry && id.is_some() {
            Some(response.endpoint.as_str().to_string())
        } else {
            None
        };

        Ok(Self {
            client: CursorClient::new(dispatcher),
            database,
            id,
            allow_retry,
            pinned_endpoint,
            next_batch_id: 2,
            buffer: items.into(),
            has_more,
            count,
            extra,
            last_raw_result: Some(raw_result),
            last_fetched_batch_id: Some(1),
            batch_index: 0,
            last_returned_index: None,
        })
    }

    /// Cheap local check: true while the buffer holds unread documents or
    /// the server has reported more batches remain.
    pub fn has_more(&self) -> bool {
        !self.buffer.is_empty() || self.has_more
    }

    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn extra(&self) -> &serde_json::Value {
        &self.extra
    }

    pub async fn read_document(&mut self) -> Result<Option<T>, ClusterError> {
        if self.buffer.is_empty() && self.has_more {
            self.fetch_next_batch().await?;
        }
        let item = self.buffer.pop_front();
        if item.is_some() {
            self.last_returned_index = Some(self.batch_index);
            self.batch_index += 1;
        }
        Ok(item)
    }

    async fn fetch_next_batch(&mut self) -> Result<(), ClusterError> {
        let cursor_id = self.id.clone().ok_or_else(|| {
            ClusterError::Internal("cursor reported more results but carries no id".into())
        })?;

        let request = CursorPageRequest {
            database: self.database.clone(),
            cursor_id,
            allow_retry: self.allow_retry,
            batch_id: self.next_batch_id,
            pinned_endpoint: self.pinned_endpoint.clone(),
        };
        let fetched_batch_id = self.next_batch_id;
        let turned = self.client.turn_page(request).await?;
        let batch = turned_items(turned)
            .into_iter()
            .next()
            .expect("turn_page always yields exactly one batch");

        self.has_more = batch.has_more;
        if batch.count.is_some() {
            self.count = batch.count;
        }
        self.extra = batch.extra;
        self.last_raw_result = Some(batch.raw_result);
        self.last_fetched_batch_id = Some(fetched_batch_id);
        self.next_batch_id = fetched_batch_id + 1;
        self.batch_index = 0;
        self.buffer.extend(batch.items);
        Ok(())
    }

    /// Re-fetches the batch that produced the document the last
    /// `read_document` call returned, confirms it is bitwise identical to
    /// the original, and returns that same document again. Requires an
    /// `allowRetry` cursor and at least one prior `read_document` call
    /// (including the initial batch `create` fills, so this is valid
    /// immediately after the first `read_document`).
    pub async fn retry_read_document(&mut self) -> Result<Option<T>, ClusterError> {
        if !self.allow_retry {
            return Err(ClusterError::InvalidArgument(
                "retry_read_document requires an allowRetry cursor".into(),
            ));
        }
        let batch_id = self.last_fetched_batch_id.ok_or_else(|| {
            ClusterError::InvalidArgument("no batch has been fetched yet to retry".into())
        })?;
        let index = self.last_returned_index.ok_or_else(|| {
            ClusterError::InvalidArgument("no document has been read yet to retry".into())
        })?;
        let cursor_id = self
            .id
            .clone()
            .ok_or_else(|| ClusterError::Internal("cursor carries no id".into()))?;

        let request = CursorPageRequest {
            database: self.database.clone(),
            cursor_id,
            allow_retry: true,
            batch_id,
            pinned_endpoint: self.pinned_endpoint.clone(),
        };
        let turned = self.client.turn_page(request).await?;
        let batch = turned_items(turned)
            .into_iter()
            .next()
            .expect("turn_page always yields exactly one batch");

        if Some(&batch.raw_result) != self.last_raw_result.as_ref() {
            return Err(ClusterError::Protocol(
                "retried cursor batch was not bitwise identical to the original".into(),
            ));
        }

        Ok(batch.items.into_iter().nth(index))
    }

    /// Idempotent: closing an already-closed (or never-assigned-an-id)
    /// cursor is a no-op.
    pub async fn close(mut self) -> Result<(), ClusterError> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };

        let mut ctx = RequestContext::default();
        if let Some(pin) = &self.pinned_endpoint {
            ctx = ctx.with_endpoint_pin(pin.clone());
        }
        let request = Request::builder(Method::Delete)
            .segment("_db")
            .segment(&self.database)
            .segment("_api")
            .segment("cursor")
            .segment(&id)
            .context(ctx)
            .build();

        match self.client.dispatcher.execute(request).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nebula_core::{Endpoint, EndpointSet, Headers, RawResponse};
    use nebula_dispatch::{EndpointSelector, SelectionPolicy};
    use nebula_transport::auth::{AuthProvider, Credentials};
    use nebula_transport::{Transport, TransportError};

    use super::*;

    struct ScriptedTransport {
        responses: std::sync::Mutex<Vec<serde_json::Value>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<serde_json::Value>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(
            &self,
            endpoint: &Endpoint,
            _request: &Request,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .expect("scripted transport ran out of responses");
            Ok(RawResponse {
                status: 201,
                headers: Headers::new(),
                body,
                raw: None,
                endpoint: endpoint.clone(),
            })
        }
    }

    fn dispatcher(responses: Vec<serde_json::Value>) -> Arc<Dispatcher> {
        let endpoints =
            Arc::new(EndpointSet::new(vec![Endpoint::parse("http://a:8529").unwrap()]).unwrap());
        let auth = Arc::new(AuthProvider::new(reqwest::Client::new(), Credentials::None));
        Arc::new(Dispatcher::new(
            endpoints,
            Arc::new(ScriptedTransport::new(responses)),
            auth,
            EndpointSelector::new(SelectionPolicy::Single),
        ))
    }

    #[tokio::test]
    async fn drains_a_single_batch_without_more_fetches() {
        let dispatch = dispatcher(vec![serde_json::json!({
            "id": "123",
            "hasMore": false,
            "count": 2,
            "result": [1, 2],
        })]);
        let mut cursor: Cursor<i64> =
            Cursor::create(dispatch, "_system", serde_json::json!({"query": "..."}), RequestContext::default())
                .await
                .unwrap();

        assert_eq!(cursor.read_document().await.unwrap(), Some(1));
        assert_eq!(cursor.read_document().await.unwrap(), Some(2));
        assert_eq!(cursor.read_document().await.unwrap(), None);
        assert!(!cursor.has_more());
    }

    #[tokio::test]
    async fn fetches_the_next_batch_on_exhaustion() {
        let dispatch = dispatcher(vec![
            serde_json::json!({"id": "123", "hasMore": true, "result": [1]}),
            serde_json::json!({"id": "123", "hasMore": false, "result": [2]}),
        ]);
        let mut cursor: Cursor<i64> =
            Cursor::create(dispatch, "_system", serde_json::json!({"query": "..."}), RequestContext::default())
                .await
                .unwrap();

        assert_eq!(cursor.read_document().await.unwrap(), Some(1));
        assert_eq!(cursor.read_document().await.unwrap(), Some(2));
        assert!(!cursor.has_more());
    }

    #[tokio::test]
    async fn retry_immediately_after_the_first_read_returns_the_same_document() {
        let page_one = serde_json::json!({"id": "123", "hasMore": true, "result": [1, 2]});
        let dispatch = dispatcher(vec![page_one.clone(), page_one.clone()]);
        let mut cursor: Cursor<i64> = Cursor::create(
            dispatch,
            "_system",
            serde_json::json!({"query": "...", "batchSize": 2}),
            RequestContext::default().with_allow_retry(true),
        )
        .await
        .unwrap();

        let first = cursor.read_document().await.unwrap();
        assert_eq!(first, Some(1));
        let retried = cursor.retry_read_document().await.unwrap();
        assert_eq!(retried, first);
    }

    #[tokio::test]
    async fn retry_after_the_second_read_returns_the_second_document() {
        let page_one = serde_json::json!({"id": "123", "hasMore": true, "result": [1, 2]});
        let dispatch = dispatcher(vec![page_one.clone(), page_one.clone()]);
        let mut cursor: Cursor<i64> = Cursor::create(
            dispatch,
            "_system",
            serde_json::json!({"query": "...", "batchSize": 2}),
            RequestContext::default().with_allow_retry(true),
        )
        .await
        .unwrap();

        cursor.read_document().await.unwrap();
        let second = cursor.read_document().await.unwrap();
        assert_eq!(second, Some(2));
        let retried = cursor.retry_read_document().await.unwrap();
        assert_eq!(retried, second);
    }

    #[tokio::test]
    async fn close_is_idempotent_after_exhaustion_without_id() {
        let dispatch = dispatcher(vec![serde_json::json!({"hasMore": false, "result": []})]);
        let cursor: Cursor<i64> =
            Cursor::create(dispatch, "_system", serde_json::json!({"query": "..."}), RequestContext::default())
                .await
                .unwrap();
        cursor.close().await.unwrap();
    }
}
