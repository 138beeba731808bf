//! Admin API server.
//!
//! Binds the actix-web server, wires CORS, request logging and bearer
//! authentication, and returns a handle used to stop it.

use crate::FleetController;
use crate::api::auth::Authentication;
use crate::api::handlers;
use crate::config::{ApiConfig, DEFAULT_WORKERS};
use crate::error::{Error, Result};

use actix_cors::Cors;
use actix_web::{
    App, HttpServer,
    dev::ServerHandle,
    middleware,
    web::{self, Data},
};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Registers every admin route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(handlers::json_error))
        .route("/health", web::get().to(handlers::health))
        .service(
            web::scope("/api")
                .route("/servers", web::get().to(handlers::list_servers))
                .route("/servers", web::post().to(handlers::create_server))
                .route("/servers/{id}", web::get().to(handlers::get_server))
                .route("/servers/{id}", web::patch().to(handlers::update_server))
                .route("/servers/{id}", web::delete().to(handlers::delete_server))
                .route("/servers/{id}/status", web::put().to(handlers::set_server_status))
                .route("/servers/{id}/ssh-test", web::post().to(handlers::test_server_ssh))
                .route(
                    "/servers/{id}/health-check",
                    web::post().to(handlers::trigger_health_check),
                )
                .route("/servers/{id}/restart", web::post().to(handlers::request_restart))
                .route(
                    "/servers/{id}/connections",
                    web::put().to(handlers::report_connections),
                )
                .route("/servers/{id}/guardian-log", web::get().to(handlers::guardian_log))
                .route("/servers/{id}/prediction", web::get().to(handlers::load_prediction))
                .route("/fleet/health", web::get().to(handlers::fleet_health))
                .route("/fleet/view", web::get().to(handlers::fleet_view))
                .route("/fleet/overview", web::get().to(handlers::fleet_overview))
                .route("/fleet/guardian-log", web::get().to(handlers::fleet_log))
                .route("/events", web::get().to(handlers::events)),
        );
}

/// Handle for controlling the running admin API
#[derive(Clone)]
pub struct AdminApiHandle {
    server_handle: ServerHandle,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    addrs: Vec<SocketAddr>,
}

impl AdminApiHandle {
    /// Addresses the server is bound to
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Stop the server gracefully
    pub async fn shutdown(&self) -> Result<()> {
        self.server_handle.stop(true).await;

        let mut task = self.task.lock().await;
        if let Some(h) = task.take() {
            match tokio::time::timeout(Duration::from_secs(5), h).await {
                Ok(Err(e)) => tracing::warn!("Error while joining admin API task: {}", e),
                Ok(Ok(())) => {}
                Err(_) => tracing::warn!("Timeout waiting for admin API task to finish"),
            }
        }

        tracing::info!("Admin API shut down");
        Ok(())
    }
}

/// Admin HTTP API over a [`FleetController`]
pub struct AdminApi;

impl AdminApi {
    /// Start the API configured under `api`.
    ///
    /// # Errors
    ///
    /// Returns an error if no `api` section is configured or the address
    /// cannot be resolved or bound.
    pub async fn start(controller: Arc<FleetController>) -> Result<AdminApiHandle> {
        let config = controller
            .config()
            .api
            .clone()
            .ok_or_else(|| Error::ConfigInvalid("admin API not configured".to_string()))?;
        Self::start_with(controller, config).await
    }

    /// Start the API with an explicit configuration
    pub async fn start_with(controller: Arc<FleetController>, config: ApiConfig) -> Result<AdminApiHandle> {
        let addr_str = format!("{}:{}", config.address, config.port);
        let addr = addr_str
            .to_socket_addrs()
            .map_err(|e| Error::Other(format!("Failed to parse socket address: {}", e)))?
            .next()
            .ok_or_else(|| Error::Other(format!("Could not parse socket address: {}", addr_str)))?;

        tracing::info!(address = %addr_str, "Starting admin API with Actix Web");

        let token: Option<Arc<str>> = config.bearer_token().map(Arc::from);
        if token.is_none() {
            tracing::warn!("Admin API started without authentication");
        }
        let controller = Data::new(controller);

        let mut server_builder = HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(Authentication::new(token.as_deref()))
                .wrap(cors)
                .wrap(middleware::Logger::default())
                .app_data(controller.clone())
                .configure(configure)
        });

        let workers = config.workers.unwrap_or(DEFAULT_WORKERS);
        tracing::info!(workers = workers, "Setting number of Actix Web workers");
        server_builder = server_builder.workers(workers);

        let server_builder = server_builder
            .bind(addr)
            .map_err(|e| Error::Other(format!("Failed to bind server: {}", e)))?;
        let addrs = server_builder.addrs();
        let server = server_builder.run();
        let server_handle = server.handle();

        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Admin API server error");
            }
        });

        tracing::info!(addrs = ?addrs, "Admin API started");

        Ok(AdminApiHandle {
            server_handle,
            task: Arc::new(Mutex::new(Some(task))),
            addrs,
        })
    }
}
