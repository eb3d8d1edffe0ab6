//! Main entry point for the Titan server.

use actix_web::{App, HttpServer, web};
use tracing::info;

use titan_server::{api, model::Configuration, startup};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    let address = configuration.server_address();
    let port = configuration.server_port();

    let state = startup::build_state(configuration).await?;
    let reload_task = startup::start_permission_reload(&state);

    let app_state = web::Data::new(state);
    info!("Starting Titan server on {}:{}", address, port);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(api::configure)
    })
    .bind((address, port))?
    .run()
    .await?;

    if let Some(task) = reload_task {
        task.shutdown().await;
    }

    info!("Titan server stopped");
    Ok(())
}
