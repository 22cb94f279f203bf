//! Thin HTTP front end over [`ExpenseService`]

pub mod response;
pub mod routes;

use axum::{
    http::{header, Method, StatusCode},
    routing::get,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::service::ExpenseService;

pub async fn serve<F>(
    config: &ServerConfig,
    service: ExpenseService,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(service);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

pub fn create_router(service: ExpenseService) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/v1/expense", routes::expense_routes())
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
        .allow_origin(Any)
        .max_age(Duration::from_secs(3600))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
