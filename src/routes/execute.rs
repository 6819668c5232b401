use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, Responder, post, web};
use serde_json::Value;

use crate::executor::Executor;

/// Delivers one message to the executor.
///
/// Accepted messages are answered with `200` and the reply body, whether it is
/// a result or an execution error. Dropped messages get an empty `204`.
#[post("/execute")]
pub async fn execute_handler(
    executor: web::Data<Executor>,
    req: HttpRequest,
    body: web::Bytes,
) -> impl Responder {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("Dropped message that is not JSON: {e}");
            return HttpResponse::NoContent().finish();
        }
    };

    match executor.handle(origin, &payload).await {
        Some(reply) => HttpResponse::Ok().json(reply),
        None => HttpResponse::NoContent().finish(),
    }
}
