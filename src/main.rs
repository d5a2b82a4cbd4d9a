//! Course Registry server
//!
//! Serves the identity service, the document store and the atomic
//! enrollment endpoints over REST.
//! - Storage: sled documents + credentials, enrollment in sled transactions
//! - Auth: bcrypt password hashes, JWT bearer sessions
//! - Reports: DataFusion SQL over an Arrow projection of the catalog
//!
//! Usage:
//!   cargo run --bin load_data          # seed accounts and a sample catalog
//!   cargo run --bin course_registry    # start server (REGISTRY_* env, .env honoured)
//!   cargo run --bin registry-cli -- login --email admin@uni.edu

use std::sync::Arc;

use tokio::net::TcpListener;

use course_registry::auth::IdentityService;
use course_registry::config::Settings;
use course_registry::rest::create_router;
use course_registry::storage::Storage;
use course_registry::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();
    let _log_guard = telemetry::init(&settings, "info,course_registry=debug", "registry");

    let storage = Storage::open(&settings.data_path)?;
    let identity = Arc::new(IdentityService::new(storage.clone(), settings.auth.clone()));
    let app = create_router(storage.clone(), identity);

    let listener = TcpListener::bind(settings.rest_addr).await?;
    tracing::info!(
        addr = %settings.rest_addr,
        data_path = %settings.data_path,
        "course registry listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    storage.flush()?;
    Ok(())
}
