// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::TcpListener;

use tracing::info;
use veilbackend::ChatService;
use veilserver::{
    configurations::get_configuration,
    run,
    telemetry::{get_subscriber, init_subscriber},
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Configure logging/trace subscription
    let subscriber = get_subscriber("veilserver".into(), "info".into(), std::io::stdout);
    init_subscriber(subscriber);

    // Load configuration
    let configuration = get_configuration("server/").expect("Could not load configuration.");

    // Port binding
    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(address)?;

    info!(path = %configuration.database.path, "Opening database");
    let service = ChatService::new(&configuration.database)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    run(listener, service)?.await
}
