//! Integration tests for the job API.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use broker::{Broker, InMemoryBroker};
use common::{ParticipantId, TransactionId};
use job_api::routes::jobs::AppState;
use ledger::{CompensationLedger, InMemoryLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;
use transaction::{OutcomeAction, WatchdogConfig};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    state: Arc<AppState<InMemoryLedger>>,
    ledger: InMemoryLedger,
    broker: Arc<InMemoryBroker>,
}

fn setup_with_watchdog(interval: Duration) -> TestApp {
    let ledger = InMemoryLedger::new();
    let broker = Arc::new(InMemoryBroker::new());
    let state = job_api::create_state(
        "job",
        ledger.clone(),
        Arc::clone(&broker) as Arc<dyn Broker>,
        WatchdogConfig::default().with_interval(interval),
    );
    let app = job_api::create_app(state.clone(), get_metrics_handle());
    TestApp {
        app,
        state,
        ledger,
        broker,
    }
}

fn setup() -> TestApp {
    setup_with_watchdog(Duration::from_secs(30))
}

fn job() -> ParticipantId {
    ParticipantId::new("job")
}

fn json_request(
    method: &str,
    uri: &str,
    transaction_id: Option<&TransactionId>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(tx) = transaction_id {
        builder = builder.header("transaction_id", tx.as_str());
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn create_job(t: &TestApp, tx: Option<&TransactionId>, title: &str) -> String {
    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/job",
            tx,
            serde_json::json!({ "title": title, "date": "2020-01-01T00:00:00Z" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["id"].as_str().unwrap().to_string()
}

async fn wait_until_resolved(ledger: &InMemoryLedger, tx: &TransactionId) {
    for _ in 0..100 {
        if !ledger.exists(&job(), tx).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transaction {tx} was never resolved");
}

#[tokio::test]
async fn test_health_check() {
    let t = setup();

    let response = t
        .app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["participant"], "job");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup();

    let response = t
        .app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_and_get_job() {
    let t = setup();
    let id = create_job(&t, None, "paint fence").await;

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/job/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["title"], "paint fence");
    assert_eq!(t.ledger.ledger_count().await, 0);
}

#[tokio::test]
async fn test_get_nonexistent_job() {
    let t = setup();

    let response = t
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/job/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_invalid_job_id_format() {
    let t = setup();

    let response = t
        .app
        .oneshot(
            Request::builder()
                .uri("/job/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_blank_title_is_rejected() {
    let t = setup();

    let response = t
        .app
        .oneshot(json_request(
            "POST",
            "/job",
            None,
            serde_json::json!({ "title": " " }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transactional_create_records_compensation() {
    let t = setup();
    let tx = TransactionId::new();

    let id = create_job(&t, Some(&tx), "paint fence").await;

    let entries = t.ledger.entries_for(&job(), &tx).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "create");
    assert_eq!(entries[0].target_id, id);
    assert!(t.state.participant.bus().is_listening(&job(), &tx));
    assert!(t.broker.has_queue("job"));
}

#[tokio::test]
async fn test_rollback_reverses_create_and_update() {
    let t = setup();
    let handle = t.state.participant.start().await.unwrap();
    let tx = TransactionId::new();

    let id = create_job(&t, Some(&tx), "paint fence").await;
    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/job/{id}"),
            Some(&tx),
            serde_json::json!({ "title": "paint house", "date": "2021-06-01T00:00:00Z" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(t.state.store.count().await, 1);

    t.state
        .participant
        .bus()
        .publish_outcome(&job(), &tx, OutcomeAction::Rollback)
        .await
        .unwrap();
    wait_until_resolved(&t.ledger, &tx).await;

    assert_eq!(t.state.store.count().await, 0);
    handle.shutdown();
}

#[tokio::test]
async fn test_commit_keeps_writes() {
    let t = setup();
    let handle = t.state.participant.start().await.unwrap();
    let tx = TransactionId::new();

    let id = create_job(&t, Some(&tx), "paint fence").await;
    t.state
        .participant
        .bus()
        .publish_outcome(&job(), &tx, OutcomeAction::Commit)
        .await
        .unwrap();
    wait_until_resolved(&t.ledger, &tx).await;

    let id = uuid::Uuid::parse_str(&id).unwrap();
    assert!(t.state.store.read(id).await.is_some());
    handle.shutdown();
}

#[tokio::test]
async fn test_rollback_restores_deleted_job() {
    let t = setup();
    let handle = t.state.participant.start().await.unwrap();
    let id = create_job(&t, None, "paint fence").await;
    let tx = TransactionId::new();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/job/{id}"))
                .header("transaction_id", tx.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(t.state.store.count().await, 0);

    t.state
        .participant
        .bus()
        .publish_outcome(&job(), &tx, OutcomeAction::Rollback)
        .await
        .unwrap();
    wait_until_resolved(&t.ledger, &tx).await;

    let restored = t
        .state
        .store
        .read(uuid::Uuid::parse_str(&id).unwrap())
        .await
        .unwrap();
    assert_eq!(restored.title, "paint fence");
    handle.shutdown();
}

#[tokio::test]
async fn test_watchdog_reverses_abandoned_create() {
    let t = setup_with_watchdog(Duration::from_millis(100));
    let handle = t.state.participant.start().await.unwrap();
    let tx = TransactionId::new();

    create_job(&t, Some(&tx), "paint fence").await;
    assert_eq!(t.state.store.count().await, 1);

    wait_until_resolved(&t.ledger, &tx).await;
    assert_eq!(t.state.store.count().await, 0);
    handle.shutdown();
}

#[tokio::test]
async fn test_failed_compensation_record_undoes_write() {
    let t = setup();
    t.ledger.set_fail_on_append(true);
    let tx = TransactionId::new();

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/job",
            Some(&tx),
            serde_json::json!({ "title": "paint fence" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(t.state.store.count().await, 0);
}
