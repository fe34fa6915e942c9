use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursepay::config::Config;
use coursepay::db::{create_pool, init_db, queries, AppState};
use coursepay::handlers;
use coursepay::models::CreateCourse;
use coursepay::payments::TbankClient;
use coursepay::reconcile::Reconciler;

#[derive(Parser, Debug)]
#[command(name = "coursepay")]
#[command(about = "Course payment lifecycle and reconciliation service")]
struct Cli {
    /// Seed the database with dev data (a couple of priced courses)
    #[arg(long)]
    seed: bool,
}

/// Seeds sample courses for local testing. Dev mode only, empty catalog only.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count = queries::count_courses(&conn).expect("Failed to count courses");
    if count > 0 {
        tracing::info!("Courses already exist, skipping seed");
        return;
    }

    let courses = [
        ("Rust for Backend Engineers", 1900),
        ("Distributed Systems in Practice", 3400),
    ];

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV COURSES");
    for (title, price) in courses {
        let course = queries::create_course(
            &conn,
            &CreateCourse {
                title: title.to_string(),
                price,
            },
        )
        .expect("Failed to create dev course");
        tracing::info!("Course: {} ({} RUB, id: {})", course.title, course.price, course.id);
    }
    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursepay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let tbank = match &config.tbank {
        Some(tbank_config) => {
            Some(TbankClient::new(tbank_config).expect("Failed to build provider client"))
        }
        None => {
            tracing::warn!(
                "TBANK_TERMINAL_KEY / TBANK_PASSWORD not set; payment endpoints will return 503"
            );
            None
        }
    };

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        allowed_origins: config.allowed_origins.clone(),
        notification_url: config.notification_url.clone(),
        receipts: config.receipts.clone(),
        tbank,
        dev_mode: config.dev_mode,
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set COURSEPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    // The reconciler only makes sense with provider credentials present.
    if state.tbank.is_some() {
        Reconciler::new(state.clone(), &config).spawn();
    }

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Coursepay server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
