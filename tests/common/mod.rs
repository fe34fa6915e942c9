//! Test utilities and fixtures for Coursepay integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub use coursepay::config::{Config, ReceiptConfig, ReconcileConfig, TbankConfig};
pub use coursepay::db::{init_db, queries, AppState, DbPool};
pub use coursepay::models::*;
pub use coursepay::payments::{token, TbankClient, PROVIDER_TBANK};

pub const TEST_TERMINAL_KEY: &str = "TestTerminal";
pub const TEST_PASSWORD: &str = "testpassword";

/// Create a pooled in-memory database. Shared-cache URI so every pooled
/// connection sees the same database; unique name so tests stay isolated.
pub fn setup_test_pool() -> DbPool {
    let uri = format!(
        "file:testdb-{}?mode=memory&cache=shared",
        Uuid::new_v4().as_simple()
    );
    let manager = SqliteConnectionManager::file(uri);
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }
    pool
}

pub fn test_tbank_config(base_url: &str) -> TbankConfig {
    TbankConfig {
        base_url: base_url.to_string(),
        terminal_key: TEST_TERMINAL_KEY.to_string(),
        password: TEST_PASSWORD.to_string(),
        timeout: Duration::from_secs(2),
        slow_threshold: Duration::from_millis(1500),
    }
}

/// App state wired to a provider at `provider_base` (use an unreachable
/// address to simulate outages), or with payments unconfigured when `None`.
pub fn create_test_app_state(provider_base: Option<&str>) -> AppState {
    let tbank = provider_base
        .map(|base| TbankClient::new(&test_tbank_config(base)).unwrap());

    AppState {
        db: setup_test_pool(),
        base_url: "http://localhost:3000".to_string(),
        allowed_origins: vec!["http://app.example.com".to_string()],
        notification_url: None,
        receipts: ReceiptConfig {
            enabled: false,
            tax: None,
            taxation: None,
        },
        tbank,
        dev_mode: true,
    }
}

pub fn test_reconcile_config() -> ReconcileConfig {
    ReconcileConfig {
        interval: Duration::from_secs(30),
        lookback: Duration::from_secs(168 * 3600),
        batch: 20,
    }
}

/// Full config for constructing a Reconciler in tests.
pub fn test_config(provider_base: Option<&str>) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_path: ":memory:".to_string(),
        base_url: "http://localhost:3000".to_string(),
        dev_mode: true,
        tbank: provider_base.map(test_tbank_config),
        reconcile: test_reconcile_config(),
        receipts: ReceiptConfig {
            enabled: false,
            tax: None,
            taxation: None,
        },
        allowed_origins: vec![],
        notification_url: None,
    }
}

/// Router with all endpoints, for oneshot tests.
pub fn app(state: AppState) -> Router {
    coursepay::handlers::router().with_state(state)
}

pub fn create_test_course(state: &AppState, title: &str, price: i64) -> Course {
    let conn = state.db.get().unwrap();
    queries::create_course(
        &conn,
        &CreateCourse {
            title: title.to_string(),
            price,
        },
    )
    .unwrap()
}

/// Insert a purchase row ready for notifications: status `new`, payment id
/// recorded, as if Init had just succeeded.
pub fn create_pending_purchase(
    state: &AppState,
    user_id: &str,
    course_id: &str,
    payment_id: &str,
) -> Purchase {
    let conn = state.db.get().unwrap();
    let purchase = queries::create_purchase(
        &conn,
        &CreatePurchase {
            order_id: Uuid::new_v4().as_simple().to_string(),
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            amount_minor: 190000,
            provider: PROVIDER_TBANK.to_string(),
        },
    )
    .unwrap();
    queries::PurchaseUpdate::new(&purchase.id)
        .set_payment_id(payment_id)
        .set_status(&PurchaseStatus::Business("new".to_string()))
        .execute(&conn)
        .unwrap();
    queries::get_purchase_by_id(&conn, &purchase.id).unwrap().unwrap()
}

/// Backdate a purchase row, for lookback-window tests.
pub fn backdate_purchase(state: &AppState, purchase_id: &str, created_at: i64) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "UPDATE purchases SET created_at = ?1 WHERE id = ?2",
        rusqlite::params![created_at, purchase_id],
    )
    .unwrap();
}

pub fn get_purchase(state: &AppState, purchase_id: &str) -> Purchase {
    let conn = state.db.get().unwrap();
    queries::get_purchase_by_id(&conn, purchase_id).unwrap().unwrap()
}

pub fn count_grants(state: &AppState, user_id: &str, course_id: &str) -> i64 {
    let conn = state.db.get().unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM access_grants WHERE user_id = ?1 AND course_id = ?2",
        rusqlite::params![user_id, course_id],
        |row| row.get(0),
    )
    .unwrap()
}

/// Build a notification payload signed the way the provider signs it.
pub fn signed_notification(mut fields: Map<String, Value>) -> Value {
    let signature = token::sign(
        &fields,
        TEST_PASSWORD,
        token::TokenMode::PasswordKey,
        token::DEFAULT_EXCLUDED,
    );
    fields.insert(token::TOKEN_FIELD.to_string(), Value::String(signature));
    Value::Object(fields)
}

pub fn notification_fields(order_id: &str, payment_id: &str, status: &str) -> Map<String, Value> {
    let Value::Object(map) = json!({
        "TerminalKey": TEST_TERMINAL_KEY,
        "OrderId": order_id,
        "PaymentId": payment_id,
        "Status": status,
        "Success": true,
    }) else {
        unreachable!()
    };
    map
}

// ============ Mock provider ============

#[derive(Default)]
struct MockScript {
    init_replies: VecDeque<Value>,
    get_state_replies: VecDeque<Value>,
    init_requests: Vec<Value>,
    get_state_requests: Vec<Value>,
    get_state_delay: Option<Duration>,
}

/// Scripted stand-in for the T-Bank API, served on an ephemeral local port.
/// Replies are consumed in FIFO order; the last one is repeated when the
/// script runs dry.
#[derive(Clone)]
pub struct MockProvider {
    pub base_url: String,
    script: Arc<Mutex<MockScript>>,
}

impl MockProvider {
    pub fn push_init_reply(&self, reply: Value) {
        self.script.lock().unwrap().init_replies.push_back(reply);
    }

    pub fn push_get_state_reply(&self, reply: Value) {
        self.script.lock().unwrap().get_state_replies.push_back(reply);
    }

    /// Hold every GetState reply for `delay`, keeping the call in flight so
    /// tests can observe concurrent behavior.
    pub fn set_get_state_delay(&self, delay: Duration) {
        self.script.lock().unwrap().get_state_delay = Some(delay);
    }

    pub fn init_requests(&self) -> Vec<Value> {
        self.script.lock().unwrap().init_requests.clone()
    }

    pub fn get_state_requests(&self) -> Vec<Value> {
        self.script.lock().unwrap().get_state_requests.clone()
    }
}

fn next_reply(queue: &mut VecDeque<Value>) -> Value {
    if queue.len() > 1 {
        queue.pop_front().unwrap()
    } else {
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| json!({"Success": false, "ErrorCode": "500", "Message": "unscripted"}))
    }
}

async fn mock_init(
    State(script): State<Arc<Mutex<MockScript>>>,
    axum::Json(body): axum::Json<Value>,
) -> axum::Json<Value> {
    let mut script = script.lock().unwrap();
    script.init_requests.push(body);
    let reply = next_reply(&mut script.init_replies);
    axum::Json(reply)
}

async fn mock_get_state(
    State(script): State<Arc<Mutex<MockScript>>>,
    axum::Json(body): axum::Json<Value>,
) -> axum::Json<Value> {
    // Record the request before any delay; the lock must not be held
    // across the sleep.
    let delay = {
        let mut script = script.lock().unwrap();
        script.get_state_requests.push(body);
        script.get_state_delay
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let reply = next_reply(&mut script.lock().unwrap().get_state_replies);
    axum::Json(reply)
}

pub async fn start_mock_provider() -> MockProvider {
    let script: Arc<Mutex<MockScript>> = Arc::default();
    let router = Router::new()
        .route("/Init", post(mock_init))
        .route("/GetState", post(mock_get_state))
        .with_state(script.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockProvider {
        base_url: format!("http://{}", addr),
        script,
    }
}

pub fn init_success_reply(payment_id: &str) -> Value {
    json!({
        "Success": true,
        "ErrorCode": "0",
        "Status": "NEW",
        "PaymentId": payment_id,
        "PaymentURL": format!("https://pay.example.com/{}", payment_id),
    })
}

pub fn invalid_token_reply() -> Value {
    json!({
        "Success": false,
        "ErrorCode": "9999",
        "Message": "Invalid token",
        "Details": "Token check failed",
    })
}

pub fn get_state_reply(payment_id: &str, status: &str) -> Value {
    json!({
        "Success": true,
        "ErrorCode": "0",
        "Status": status,
        "PaymentId": payment_id,
    })
}
