use actix_web::{Responder, get, web};

use crate::executor::Executor;

#[get("/status")]
pub async fn status_handler(executor: web::Data<Executor>) -> impl Responder {
    web::Json(executor.status().await)
}
