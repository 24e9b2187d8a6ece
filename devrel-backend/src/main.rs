use actix_cors::Cors;
use actix_files::Files;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;

mod analytics;
mod config;
mod controllers;
mod crypto;
mod db;
mod errors;
mod ingest;
mod middleware;
mod models;
mod plugins;

use config::Config;
use crypto::SecretCipher;
use db::Database;
use middleware::RateLimiter;
use plugins::{HttpJobInvoker, JobExecutor, JobInvoker, PluginCatalog};

/// How often expired sessions and idle rate-limit windows are dropped
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(300);

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    pub cipher: SecretCipher,
    pub catalog: Arc<PluginCatalog>,
    pub executor: Arc<JobExecutor>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: Arc<Database>, invoker: Arc<dyn JobInvoker>) -> Self {
        let catalog = Arc::new(PluginCatalog::new(config.plugins_dir.clone()));
        let executor = Arc::new(JobExecutor::new(db.clone(), catalog.clone(), invoker));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.shortlink_rate_limit,
            Duration::from_secs(config.shortlink_rate_window_secs),
        ));
        Self {
            cipher: SecretCipher::new(&config.encryption_key),
            db,
            config,
            catalog,
            executor,
            rate_limiter,
        }
    }
}

fn spawn_housekeeping(db: Arc<Database>, rate_limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            interval.tick().await;
            match db.delete_expired_sessions() {
                Ok(0) => {}
                Ok(n) => log::debug!("Removed {} expired sessions", n),
                Err(e) => log::warn!("Failed to remove expired sessions: {}", e),
            }
            let swept = rate_limiter.sweep();
            if swept > 0 {
                log::debug!("Dropped {} idle rate-limit windows", swept);
            }
        }
    });
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    log::info!("Configuration loaded: {:?}", config);

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url)
        .map_err(|e| std::io::Error::other(format!("Failed to initialize database: {}", e)))?;
    let db = Arc::new(db);

    std::fs::create_dir_all(&config.uploads_dir)?;
    if !config.plugins_dir.exists() {
        log::warn!("Plugins directory {} does not exist; no plugins available", config.plugins_dir.display());
    }

    let invoker = HttpJobInvoker::new().map_err(std::io::Error::other)?;
    let state = web::Data::new(AppState::new(config.clone(), db.clone(), Arc::new(invoker)));

    spawn_housekeeping(db, state.rate_limiter.clone());

    log::info!("Starting DevRel backend on port {}", port);

    let uploads_dir = config.uploads_dir.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::configure)
            .service(Files::new("/uploads", uploads_dir.clone()))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
