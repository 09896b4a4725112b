//! End-to-end scenarios against a real cluster, gated on environment
//! variables so the default `cargo test` run never needs one. Set
//! `TEST_ENDPOINTS` to a comma-separated endpoint list to opt in; every test
//! here is `#[ignore]`d on top of that so `cargo test -- --ignored` (or a
//! dedicated CI job with the env vars set) is what actually runs them.

use std::env;
use std::time::Duration;

use nebula_client::{AgencyKey, Connection, Credentials, RequestContext};
use nebula_core::Method;
use serde_json::json;

fn endpoints() -> Option<Vec<String>> {
    env::var("TEST_ENDPOINTS")
        .ok()
        .map(|raw| raw.split(',').map(str::to_string).collect())
}

fn credentials() -> Credentials {
    match env::var("TEST_AUTHENTICATION") {
        Ok(raw) => {
            let mut parts = raw.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("basic"), Some(user), Some(pass)) => Credentials::Basic {
                    user: user.into(),
                    pass: pass.into(),
                },
                (Some("jwt"), Some(user), Some(pass)) => Credentials::JwtUserPass {
                    user: user.into(),
                    pass: pass.into(),
                },
                _ => Credentials::None,
            }
        }
        Err(_) => Credentials::None,
    }
}

fn connection() -> Option<Connection> {
    let endpoints = endpoints()?;
    Some(
        Connection::builder()
            .endpoints(endpoints)
            .credentials(credentials())
            .build()
            .expect("TEST_ENDPOINTS must be valid URLs"),
    )
}

#[tokio::test]
#[ignore = "requires TEST_ENDPOINTS"]
async fn agency_write_read_round_trip() {
    let Some(connection) = connection() else { return };
    let key = AgencyKey::new(["arango", "go-driver", "test"]);

    connection
        .agency()
        .write_key(&key, json!("hello world"), None)
        .await
        .unwrap();
    let value: String = connection.agency().read_key(&key).await.unwrap();
    assert_eq!(value, "hello world");
}

#[tokio::test]
#[ignore = "requires TEST_ENDPOINTS"]
async fn agency_conditional_replace() {
    let Some(connection) = connection() else { return };
    let key = AgencyKey::new(["arango", "go-driver", "test"]);
    connection.agency().write_key(&key, json!("hello world"), None).await.unwrap();

    let err = connection
        .agency()
        .write_key_if_equal_to(&key, json!("not-foo"), json!("incorrect"), None)
        .await
        .unwrap_err();
    assert!(err.is_precondition_failed());

    connection
        .agency()
        .write_key_if_equal_to(&key, json!("not-foo"), json!("hello world"), None)
        .await
        .unwrap();
    let value: String = connection.agency().read_key(&key).await.unwrap();
    assert_eq!(value, "not-foo");
}

#[tokio::test]
#[ignore = "requires TEST_ENDPOINTS"]
async fn advisory_lock_lifecycle() {
    let Some(connection) = connection() else { return };
    let lock = connection.lock(
        AgencyKey::new(["TestLock"]),
        "2b2173ae-6684-501c-b8b1-c8b754b7fd40",
        Duration::from_secs(60),
    );

    lock.lock(Duration::from_secs(10)).await.unwrap();
    assert!(lock.is_locked());
    assert!(matches!(
        lock.lock(Duration::from_secs(1)).await.unwrap_err(),
        nebula_client::ClusterError::AlreadyLocked
    ));
    lock.unlock().await.unwrap();
    assert!(matches!(
        lock.unlock().await.unwrap_err(),
        nebula_client::ClusterError::NotLocked
    ));
}

#[tokio::test]
#[ignore = "requires TEST_ENDPOINTS"]
async fn async_job_lifecycle() {
    let Some(connection) = connection() else { return };

    let mut job_ids = Vec::new();
    for _ in 0..2 {
        let request = nebula_client::Request::builder(Method::Get)
            .segment("_api")
            .segment("version")
            .context(RequestContext::default().with_async(true))
            .build();
        let err = connection.execute(request).await.unwrap_err();
        match err {
            nebula_client::ClusterError::AsyncJobInProgress(id) => job_ids.push(id),
            other => panic!("expected AsyncJobInProgress, got {other:?}"),
        }
    }

    tokio::time::sleep(Duration::from_secs(3)).await;

    let done = connection.list_jobs(nebula_client::JobStatus::Done).await.unwrap();
    for id in &job_ids {
        assert!(done.contains(id));
        let body = connection.poll_job(id).await.unwrap();
        assert!(body.get("version").and_then(|v| v.as_str()).is_some());
    }

    let done_after = connection.list_jobs(nebula_client::JobStatus::Done).await.unwrap();
    assert!(job_ids.iter().all(|id| !done_after.contains(id)));
}

#[tokio::test]
#[ignore = "requires TEST_ENDPOINTS"]
async fn resumable_cursor_retry_returns_the_same_document() {
    let Some(connection) = connection() else { return };

    let ctx = RequestContext::default().with_batch_size(2).with_allow_retry(true);
    let mut cursor = connection
        .cursor::<serde_json::Value>("_system", json!({"query": "FOR u IN users RETURN u"}), ctx)
        .await
        .unwrap();

    let first = cursor.read_document().await.unwrap().unwrap();
    let retried = cursor.retry_read_document().await.unwrap().unwrap();
    assert_eq!(first.get("Name"), retried.get("Name"));
}

#[tokio::test]
#[ignore = "requires TEST_ENDPOINTS and TEST_ENABLE_BACKUP"]
async fn backup_transfer_lifecycle() {
    let Some(connection) = connection() else { return };
    if env::var("TEST_ENABLE_BACKUP").is_err() {
        return;
    }
    let repo = env::var("TEST_BACKUP_REMOTE_REPO").expect("TEST_BACKUP_REMOTE_REPO");
    let config: serde_json::Value =
        serde_json::from_str(&env::var("TEST_BACKUP_REMOTE_CONFIG").expect("TEST_BACKUP_REMOTE_CONFIG")).unwrap();

    let handle = connection
        .submit_transfer(nebula_client::TransferDirection::Upload, "test-backup", &repo, config.clone())
        .await
        .unwrap();

    loop {
        let report = connection.transfer_progress(&handle).await.unwrap();
        if report.is_terminal() {
            assert!(!report.is_failed());
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
