use std::time::Duration;

use futures_util::StreamExt;
use jobstream_api::config::AppConfig;
use jobstream_auth::TenantKeys;
use jobstream_core::TenantId;
use jobstream_infra::Ceilings;
use reqwest::StatusCode;
use serde_json::{json, Value};

const STORE_KEY: &str = "key-a";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: AppConfig) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let (app, _services) = jobstream_api::app::build_app(&config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    async fn default() -> Self {
        Self::spawn(test_config()).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig {
        tenant_keys: TenantKeys::new()
            .with_key(TenantId::parse("store_a").unwrap(), STORE_KEY)
            .with_key(TenantId::parse("store_b").unwrap(), "key-b"),
        ..AppConfig::default()
    };
    config.streamer.heartbeat = Duration::from_millis(200);
    config
}

async fn create_ticker(
    client: &reqwest::Client,
    srv: &TestServer,
    params: Value,
    session: Option<&str>,
) -> reqwest::Response {
    let mut req = client
        .post(srv.url("/stores/store_a/jobs/ticker"))
        .header("X-Store-Key", STORE_KEY)
        .json(&params);
    if let Some(session) = session {
        req = req.header("X-Client-Session", session);
    }
    req.send().await.unwrap()
}

async fn wait_for_status(client: &reqwest::Client, srv: &TestServer, job_id: &str, wanted: &str) -> Value {
    for _ in 0..200 {
        let body: Value = client
            .get(srv.url(&format!("/stores/store_a/jobs/{job_id}")))
            .header("X-Store-Key", STORE_KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {job_id} never reached {wanted}");
}

#[tokio::test]
async fn health_reports_backend_and_store() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["backend"], "memory");

    let res = client.get(srv.url("/health/store")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_key_guards_job_creation() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/stores/store_a/jobs/ticker"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.headers()["x-error-code"], "forbidden");

    let res = client
        .post(srv.url("/stores/store_a/jobs/ticker"))
        .header("X-Store-Key", "key-b")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(srv.url("/stores/store_z/jobs/ticker"))
        .header("X-Store-Key", STORE_KEY)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_job_type_is_rejected() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/stores/store_a/jobs/does.not.exist"))
        .header("X-Store-Key", STORE_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.headers()["x-error-code"], "unknown_job_type");
}

#[tokio::test]
async fn ticker_job_runs_to_completion_and_exposes_results() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let res = create_ticker(&client, &srv, json!({"steps": 3, "interval_ms": 5}), None).await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["status"], "queued");
    let job_id = created["job_id"].as_str().unwrap().to_string();
    let token = created["job_token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);

    let done = wait_for_status(&client, &srv, &job_id, "done").await;
    assert_eq!(done["progress"]["percent"], 100);
    assert!(done.get("job_token").is_none());

    // Result download needs the token.
    let data_url = srv.url(&format!("/stores/store_a/jobs/{job_id}/data/summary"));
    let res = client.get(&data_url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client.get(&data_url).header("X-Job-Token", &token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let summary: Value = res.json().await.unwrap();
    assert_eq!(summary["steps"], 3);
}

#[tokio::test]
async fn event_stream_requires_token_and_matching_tenant() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let created: Value = create_ticker(&client, &srv, json!({"steps": 1, "interval_ms": 1}), None)
        .await
        .json()
        .await
        .unwrap();
    let job_id = created["job_id"].as_str().unwrap();
    let token = created["job_token"].as_str().unwrap();

    let res = client
        .get(srv.url(&format!("/stores/store_a/jobs/{job_id}/events")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(srv.url(&format!("/stores/store_a/jobs/{job_id}/events?token=not-the-token")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(srv.url(&format!("/stores/store_b/jobs/{job_id}/events?token={token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_stream_replays_from_the_start_and_follows_live() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let created: Value = create_ticker(&client, &srv, json!({"steps": 3, "interval_ms": 50}), None)
        .await
        .json()
        .await
        .unwrap();
    let job_id = created["job_id"].as_str().unwrap();
    let token = created["job_token"].as_str().unwrap();

    let res = client
        .get(srv.url(&format!("/stores/store_a/jobs/{job_id}/events")))
        .header("X-Job-Token", token)
        .header("Last-Event-ID", "0-0")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = String::new();
    let mut chunks = res.bytes_stream();
    let read = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(chunk) = chunks.next().await {
            body.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if body.contains(r#""status":"done""#) {
                break;
            }
        }
    })
    .await;
    assert!(read.is_ok(), "stream did not deliver the done status: {body}");

    let connected = body.find("event: connected").unwrap();
    let snapshot = body.find("event: snapshot").unwrap();
    let first_progress = body.find("event: progress").unwrap();
    assert!(connected < snapshot && snapshot < first_progress);
    assert_eq!(body.matches("event: progress").count(), 3);
    assert!(body.contains("id: "));
}

#[tokio::test]
async fn viewer_joining_after_completion_gets_a_final_snapshot() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let created: Value = create_ticker(&client, &srv, json!({"steps": 4, "interval_ms": 10}), None)
        .await
        .json()
        .await
        .unwrap();
    let job_id = created["job_id"].as_str().unwrap();
    let token = created["job_token"].as_str().unwrap();
    wait_for_status(&client, &srv, job_id, "done").await;

    let res = client
        .get(srv.url(&format!("/stores/store_a/jobs/{job_id}/events")))
        .header("X-Job-Token", token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let mut body = String::new();
    let mut chunks = res.bytes_stream();
    let read = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(chunk) = chunks.next().await {
            body.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if let Some(at) = body.find("event: snapshot") {
                if body[at..].contains("\n\n") {
                    break;
                }
            }
        }
    })
    .await;
    assert!(read.is_ok(), "no snapshot for a finished job: {body}");

    let at = body.find("event: snapshot").unwrap();
    let data = body[at..]
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let snapshot: Value = serde_json::from_str(data).unwrap();
    assert_eq!(snapshot["status"], "done");
    assert_eq!(snapshot["percent"], 100);
    assert_eq!(snapshot["done"], snapshot["total"]);
}

#[tokio::test]
async fn malformed_resume_position_is_a_bad_request() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let created: Value = create_ticker(&client, &srv, json!({"steps": 1, "interval_ms": 1}), None)
        .await
        .json()
        .await
        .unwrap();
    let job_id = created["job_id"].as_str().unwrap();
    let token = created["job_token"].as_str().unwrap();

    let res = client
        .get(srv.url(&format!("/stores/store_a/jobs/{job_id}/events?token={token}&last_event_id=yesterday")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_qualifier_binds_the_job_to_its_creator() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let created: Value = create_ticker(&client, &srv, json!({"steps": 1, "interval_ms": 1}), Some("tab-1"))
        .await
        .json()
        .await
        .unwrap();
    let job_id = created["job_id"].as_str().unwrap();
    let url = srv.url(&format!("/stores/store_a/jobs/{job_id}"));

    let res = client.get(&url).header("X-Store-Key", STORE_KEY).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(&url)
        .header("X-Store-Key", STORE_KEY)
        .header("X-Client-Session", "tab-2")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(&url)
        .header("X-Store-Key", STORE_KEY)
        .header("X-Client-Session", "tab-1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn over_limit_creation_is_rate_limited_until_a_slot_frees() {
    let mut config = test_config();
    config.ceilings = Ceilings {
        jobs: 1,
        ..Ceilings::default()
    };
    let srv = TestServer::spawn(config).await;
    let client = reqwest::Client::new();

    let long = json!({"steps": 1000, "interval_ms": 50});
    let first: Value = create_ticker(&client, &srv, long.clone(), None).await.json().await.unwrap();
    let job_id = first["job_id"].as_str().unwrap().to_string();

    let res = create_ticker(&client, &srv, long.clone(), None).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate_limited");
    assert!(body["message"].as_str().unwrap().contains("limit 1"));

    // Cancelling the first job gives the slot back once the handler stops.
    let res = client
        .post(srv.url(&format!("/stores/store_a/jobs/{job_id}/cancel")))
        .header("X-Store-Key", STORE_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cancelled: Value = res.json().await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");

    let mut accepted = false;
    for _ in 0..100 {
        let res = create_ticker(&client, &srv, json!({"steps": 1, "interval_ms": 1}), None).await;
        if res.status() == StatusCode::ACCEPTED {
            accepted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(accepted, "slot was never released after cancel");
}

#[tokio::test]
async fn cancel_is_idempotent_and_tenant_scoped() {
    let srv = TestServer::default().await;
    let client = reqwest::Client::new();

    let created: Value = create_ticker(&client, &srv, json!({"steps": 1000, "interval_ms": 50}), None)
        .await
        .json()
        .await
        .unwrap();
    let job_id = created["job_id"].as_str().unwrap();

    let res = client
        .post(srv.url(&format!("/stores/store_b/jobs/{job_id}/cancel")))
        .header("X-Store-Key", "key-b")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    for _ in 0..2 {
        let res = client
            .post(srv.url(&format!("/stores/store_a/jobs/{job_id}/cancel")))
            .header("X-Store-Key", STORE_KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    wait_for_status(&client, &srv, job_id, "cancelled").await;
}
