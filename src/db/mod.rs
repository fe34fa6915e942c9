mod from_row;
mod schema;
pub mod queries;

pub use from_row::{query_all, query_one, FromRow, ACCESS_GRANT_COLS, COURSE_COLS, PURCHASE_COLS};
pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::ReceiptConfig;
use crate::payments::TbankClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by handlers and the reconciliation loop.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Base URL for callbacks (e.g. https://api.example.com)
    pub base_url: String,
    /// Origins allowed as redirect targets after checkout.
    pub allowed_origins: Vec<String>,
    /// Explicit webhook URL override; derived from base_url when unset.
    pub notification_url: Option<String>,
    pub receipts: ReceiptConfig,
    /// Provider client; `None` when credentials are missing.
    pub tbank: Option<TbankClient>,
    pub dev_mode: bool,
}

impl AppState {
    /// The provider client, or a fail-fast 503 when payments are unconfigured.
    pub fn tbank(&self) -> crate::error::Result<&TbankClient> {
        self.tbank.as_ref().ok_or_else(|| {
            crate::error::AppError::NotConfigured(crate::error::msg::PAYMENTS_NOT_CONFIGURED.into())
        })
    }
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
