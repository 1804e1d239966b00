//! End-to-end range pipeline tests against an in-process range server.
//!
//! The server answers every prefix with a small body, except for a few
//! prefixes that fail the first time they are requested or always fail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use hashhouse_ingest::{
    BulkLoader, FlushFailurePolicy, HttpClientConfig, HttpClientFactory, LoadError, PipelineConfig,
    RangePipeline, RetryConfig, Row,
};

#[derive(Clone, Default)]
struct ServerState {
    hits: Arc<Mutex<HashMap<String, u32>>>,
}

async fn range(State(state): State<ServerState>, Path(prefix): Path<String>) -> (StatusCode, String) {
    let hits = {
        let mut map = state.hits.lock().unwrap();
        let entry = map.entry(prefix.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    match prefix.as_str() {
        // Busy on the first request only.
        "00003" if hits == 1 => (StatusCode::SERVICE_UNAVAILABLE, String::new()),
        "00005" if hits == 1 => (StatusCode::TOO_MANY_REQUESTS, String::new()),
        // Never available.
        "00007" => (StatusCode::FORBIDDEN, String::new()),
        _ => (
            StatusCode::OK,
            "0018A45C4D1DEF81644B54AB7F969B88D65:10\r\n\
             00D4F6E8FA6EECAD2A3AA415EEC418D38EC:2\r\n\
             garbage-line\r\n"
                .to_string(),
        ),
    }
}

async fn spawn_server() -> (String, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/range/:prefix", get(range))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/range/", addr), state)
}

#[derive(Clone, Default)]
struct MemoryLoader {
    rows: Arc<Mutex<Vec<Row>>>,
    batches: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl BulkLoader for MemoryLoader {
    async fn load(&mut self, rows: &[Row]) -> Result<u64, LoadError> {
        self.rows.lock().unwrap().extend_from_slice(rows);
        self.batches.lock().unwrap().push(rows.len());
        Ok(rows.len() as u64)
    }
}

fn config(base_url: String, limit: u32) -> PipelineConfig {
    PipelineConfig {
        limit: Some(limit),
        batch_size: 6,
        workers: 3,
        work_queue_capacity: 4,
        result_queue_capacity: 4,
        flush_failure: FlushFailurePolicy::Abort,
        http: HttpClientConfig {
            base_url,
            request_timeout_ms: 5_000,
            ..HttpClientConfig::default()
        },
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
            backoff_multiplier: 2.0,
        },
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_range_import_end_to_end() {
    let (base_url, state) = spawn_server().await;
    let factory = Arc::new(HttpClientFactory::new(config(base_url.clone(), 0).http));
    let loader = MemoryLoader::default();

    let summary = RangePipeline::new(config(base_url, 10), factory)
        .run(loader.clone())
        .await
        .unwrap();

    // 10 units, one permanently forbidden.
    assert_eq!(summary.units.units_received, 10);
    assert_eq!(summary.units.units_failed, 1);
    assert_eq!(summary.units.rows_parsed, 18);
    assert_eq!(summary.units.lines_skipped, 9);
    assert_eq!(summary.batches.rows_loaded, 18);
    assert!(!summary.is_clean());

    // Transient failures were retried once; the forbidden unit was not retried.
    let hits = state.hits.lock().unwrap();
    assert_eq!(hits["00003"], 2);
    assert_eq!(hits["00005"], 2);
    assert_eq!(hits["00007"], 1);
    assert_eq!(hits["00000"], 1);

    let rows = loader.rows.lock().unwrap();
    assert!(rows.iter().all(|r| r.hash.len() == 40));
    assert!(rows.iter().all(|r| r.prefix == r.hash[..5] && r.partition_prefix == r.hash[..2]));
    assert!(rows.iter().any(|r| r.hash == "000090018A45C4D1DEF81644B54AB7F969B88D65" && r.count == 10));
    assert!(!rows.iter().any(|r| r.prefix == "00007"));

    assert_eq!(*loader.batches.lock().unwrap(), vec![6, 6, 6]);
}

#[tokio::test]
async fn test_server_down_fails_every_unit_without_retry() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = config(format!("http://{}/range/", addr), 5);
    let factory = Arc::new(HttpClientFactory::new(config.http.clone()));
    let loader = MemoryLoader::default();

    let summary = RangePipeline::new(config, factory)
        .run(loader.clone())
        .await
        .unwrap();

    assert_eq!(summary.units.units_failed, 5);
    assert_eq!(summary.batches.rows_loaded, 0);
    assert!(loader.batches.lock().unwrap().is_empty());
}
