use actix_web::{HttpResponse, Responder, get, web};
use serde_json::json;

use super::HealthState;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_route).service(ready_route).service(metrics_route);
}

/// Dependency status as reported by the endpoints
fn describe<E: std::fmt::Display>(result: &Result<(), E>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    }
}

/// Liveness with per-dependency detail. Always 200 while the process runs.
#[get("/health")]
pub async fn health_route(state: web::Data<HealthState>) -> impl Responder {
    let queue = state.queue.ping().await;
    let store = state.store.health_check().await;
    let status = if queue.is_ok() && store.is_ok() { "ok" } else { "degraded" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "queue": describe(&queue),
        "store": describe(&store),
    }))
}

/// 200 once both the queue and the store answer, 503 otherwise
#[get("/ready")]
pub async fn ready_route(state: web::Data<HealthState>) -> impl Responder {
    let queue = state.queue.ping().await;
    let store = state.store.health_check().await;
    let body = json!({
        "ready": queue.is_ok() && store.is_ok(),
        "queue": describe(&queue),
        "store": describe(&store),
    });

    if queue.is_ok() && store.is_ok() {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

#[get("/metrics")]
pub async fn metrics_route(state: web::Data<HealthState>) -> impl Responder {
    let mut body = match serde_json::to_value(state.metrics.snapshot()) {
        Ok(body) => body,
        Err(e) => return HttpResponse::InternalServerError().body(e.to_string()),
    };
    body["queue_depth"] = json!(state.queue.depth().await.ok());
    HttpResponse::Ok().json(body)
}
