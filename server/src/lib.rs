// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! veil server.

pub mod configurations;
pub mod telemetry;
mod ws;

use std::net::TcpListener;

use actix_cors::Cors;
use actix_web::{
    App, HttpResponse, HttpServer,
    dev::Server,
    web::{self, Data},
};
use tracing_actix_web::TracingLogger;
use veilbackend::ChatService;

use crate::ws::upgrade_connection;

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().finish()
}

/// Configure and run the server application.
pub fn run(listener: TcpListener, service: ChatService) -> Result<Server, std::io::Error> {
    let service_data = Data::new(service);

    tracing::info!(
        address = %listener
            .local_addr()
            .expect("Could not get local address"),
        "Starting server"
    );

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            // The clients are browser bundles served from anywhere.
            .wrap(Cors::permissive())
            .app_data(service_data.clone())
            .route("/health_check", web::get().to(health_check))
            .route("/ws", web::get().to(upgrade_connection))
    })
    .listen(listener)?
    .run();
    Ok(server)
}
