use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::executor::Executor;
use crate::routes::{execute_handler, status_handler};

pub fn build_server(server_config: ServerConfig, executor: Arc<Executor>) -> std::io::Result<Server> {
    let executor = web::Data::from(executor);
    let payload_limit = server_config.payload_limit();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(executor.clone())
            .app_data(web::PayloadConfig::new(payload_limit))
            .wrap(middleware::Logger::default())
            .service(execute_handler)
            .service(status_handler)
    })
    .bind((server_config.address(), server_config.port()))?
    .run();

    log::info!(
        "Executor listening on {}:{}",
        server_config.address(),
        server_config.port()
    );

    Ok(server)
}
