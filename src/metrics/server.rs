use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::intake::StatusBoard;

/// Start the metrics HTTP server
/// This should be called in a separate thread/runtime to avoid conflicts
pub async fn start_metrics_server(
    registry: Registry,
    status: Arc<StatusBoard>,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::from(status.clone()))
            .configure(routes)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler))
        .route("/status", web::get().to(status_handler));
}

async fn metrics_handler(registry: web::Data<Registry>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().body(e.to_string());
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(status: web::Data<StatusBoard>) -> impl Responder {
    let health = status.health();
    let body = serde_json::json!({
        "health": health,
        "service": "order-intake"
    });

    if health.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}

async fn status_handler(status: web::Data<StatusBoard>) -> impl Responder {
    HttpResponse::Ok().json(status.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::PollCategory;
    use actix_web::{http::StatusCode, test};

    fn app_data(board: Arc<StatusBoard>) -> (web::Data<Registry>, web::Data<StatusBoard>) {
        (web::Data::new(Registry::new()), web::Data::from(board))
    }

    #[actix_web::test]
    async fn test_health_reports_fatal_as_unavailable() {
        let board = Arc::new(StatusBoard::new());
        board.register(PollCategory::Orders);
        let (registry, status) = app_data(board.clone());
        let app = test::init_service(
            App::new()
                .app_data(registry)
                .app_data(status)
                .configure(routes),
        )
        .await;

        let ok = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(ok.status(), StatusCode::OK);

        board.record_fatal(PollCategory::Orders, "invalid client credentials");
        let down = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = test::read_body_json(down).await;
        assert_eq!(body["health"]["status"], "unhealthy");
        assert!(body["health"]["reason"]
            .as_str()
            .unwrap()
            .contains("invalid client credentials"));
    }

    #[actix_web::test]
    async fn test_status_lists_categories() {
        let board = Arc::new(StatusBoard::new());
        board.register(PollCategory::Orders);
        board.register(PollCategory::Merchant);
        let (registry, status) = app_data(board);
        let app = test::init_service(
            App::new()
                .app_data(registry)
                .app_data(status)
                .configure(routes),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/status").to_request()).await;

        assert_eq!(body["categories"].as_array().unwrap().len(), 2);
    }
}
