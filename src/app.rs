use std::net::SocketAddr;

use axum::Router;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::state::AppState;
use crate::uploads;
use crate::{auth, users};

pub fn build_app(state: AppState) -> Router {
    let upload_dir = state.config.upload_dir.clone();
    Router::new()
        .nest(
            "/api/auth",
            Router::new().merge(auth::router()).merge(users::router()),
        )
        .nest_service(uploads::PUBLIC_PREFIX, ServeDir::new(upload_dir))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
