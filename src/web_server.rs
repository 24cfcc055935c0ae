use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::routes::{compile_handler, health_handler, json_error_handler};
use crate::sandbox::Sandbox;

/// Registers every route and its extractor configuration
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(compile_handler)
        .service(health_handler);
}

pub fn build_server(server_config: ServerConfig, sandbox: Sandbox) -> std::io::Result<Server> {
    let sandbox = web::Data::new(sandbox);
    let ServerConfig {
        bind_address,
        bind_port,
    } = server_config;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(sandbox.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind((bind_address.as_str(), bind_port))?
    .run();

    log::info!("Listening on {bind_address}:{bind_port}");
    Ok(server)
}
