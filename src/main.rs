mod cgi;
mod config;
mod connection;
mod handlers;
mod request;
mod response;
mod server;

use anyhow::Context;

use log::{error, info};

async fn try_main() -> anyhow::Result<()> {
    let config_file = std::env::args()
        .nth(1)
        .context("config file required as command line argument")?;

    let configuration = crate::config::read_configuration(config_file)
        .await
        .context("read_configuration error")?;

    let handlers =
        crate::handlers::create_handlers(&configuration).context("create_handlers error")?;

    info!(
        "document_root = '{}' handler = '{}'",
        configuration.cgi_configuration().document_root(),
        configuration.cgi_configuration().handler()
    );

    let server = crate::server::Server::new(handlers, configuration.server_configuration());

    server.run().await
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_nanos()
        .init();

    if let Err(err) = try_main().await {
        error!("fatal error in main:\n{:#}", err);
        std::process::exit(1);
    }
}
