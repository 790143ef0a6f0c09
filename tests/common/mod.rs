#![allow(dead_code)]

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use stageline::config::{BrokerConfig, Config, DatabaseConfig, ServerConfig, SubscriberConfig};
use stageline::process::{Job, ProcessConfig};
use stageline::App;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// Engine config with short timings, rooted in `data_dir`
pub fn test_config(data_dir: &Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseConfig {
            data_dir: data_dir.to_string_lossy().into_owned(),
            max_connections: 4,
        },
        broker: BrokerConfig {
            lease_duration: Duration::from_millis(400),
            reclaim_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(50),
        },
        subscriber: SubscriberConfig {
            health_check_interval: Duration::from_millis(100),
            failure_threshold: 3,
            http_timeout: Duration::from_secs(2),
            default_ttl: None,
        },
    }
}

/// start → {t0}; s1 → {t1, t2} gated on t0; s2 → {t3} gated on t1 and t2
pub fn three_stage_process(process_id: &str) -> ProcessConfig {
    let mut stage_tasks = BTreeMap::new();
    stage_tasks.insert("start".to_string(), vec!["t0".to_string()]);
    stage_tasks.insert("s1".to_string(), vec!["t1".to_string(), "t2".to_string()]);
    stage_tasks.insert("s2".to_string(), vec!["t3".to_string()]);

    let mut stage_gates = BTreeMap::new();
    stage_gates.insert("s1".to_string(), vec!["t0".to_string()]);
    stage_gates.insert("s2".to_string(), vec!["t1".to_string(), "t2".to_string()]);

    ProcessConfig {
        process_id: process_id.to_string(),
        stage_tasks,
        stage_gates,
    }
}

/// Serve `router` on an ephemeral localhost port
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Build an engine and serve its API; returns the app and its base URL
pub async fn spawn_engine(config: &Config) -> (App, String) {
    let app = App::build(config).await.unwrap();
    let addr = serve(app.router()).await;
    (app, format!("http://{}", addr))
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[derive(Default)]
struct MockState {
    unhealthy: AtomicBool,
    reject_jobs: AtomicBool,
    hold_jobs: AtomicBool,
    attempts: AtomicUsize,
    jobs: Mutex<Vec<Job>>,
}

/// A worker endpoint whose health and callback behaviour can be toggled
#[derive(Clone)]
pub struct MockWorker {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockWorker {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let router = Router::new()
            .route("/health", get(mock_health))
            .route("/jobs", post(mock_jobs))
            .with_state(Arc::clone(&state));
        let addr = serve(router).await;
        Self { addr, state }
    }

    pub fn health_url(&self) -> String {
        format!("http://{}/health", self.addr)
    }

    pub fn callback_url(&self) -> String {
        format!("http://{}/jobs", self.addr)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    /// While set, every callback answers 500
    pub fn reject_jobs(&self, reject: bool) {
        self.state.reject_jobs.store(reject, Ordering::SeqCst);
    }

    /// While set, callbacks hang for 10s and then answer 500
    pub fn hold_jobs(&self, hold: bool) {
        self.state.hold_jobs.store(hold, Ordering::SeqCst);
    }

    /// Callback requests received, accepted or not
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.jobs.lock().unwrap().clone()
    }

    pub async fn wait_for_jobs(&self, count: usize, timeout: Duration) -> Vec<Job> {
        eventually(timeout, || async move { self.jobs().len() >= count }).await;
        self.jobs()
    }
}

async fn mock_health(State(state): State<Arc<MockState>>) -> StatusCode {
    if state.unhealthy.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn mock_jobs(State(state): State<Arc<MockState>>, Json(job): Json<Job>) -> StatusCode {
    state.attempts.fetch_add(1, Ordering::SeqCst);
    if state.hold_jobs.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(10)).await;
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if state.reject_jobs.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.jobs.lock().unwrap().push(job);
    StatusCode::OK
}
