mod processor;

use std::{fmt::Debug, sync::Arc};

use anyhow::Context;

use log::{debug, info};

use tokio::net::{TcpListener, UnixListener};

use crate::{
    config::{ServerConfiguration, ServerType},
    connection::FastCGIConnectionIDFactory,
    handlers::RequestHandler,
};

use processor::ConnectionProcessor;

pub struct Server {
    server_configuration: ServerConfiguration,
    handlers: Arc<dyn RequestHandler>,
    connection_id_factory: FastCGIConnectionIDFactory,
}

impl Server {
    pub fn new(
        handlers: Arc<dyn RequestHandler>,
        server_configuration: &ServerConfiguration,
    ) -> Self {
        Self {
            server_configuration: server_configuration.clone(),
            handlers,
            connection_id_factory: FastCGIConnectionIDFactory::new(),
        }
    }

    fn connection_processor(&self, address: impl Debug) -> Arc<ConnectionProcessor> {
        let connection_id = self.connection_id_factory.new_connection_id();

        debug!("connection_id {} from {:?}", connection_id, address);

        ConnectionProcessor::new(
            connection_id,
            Arc::clone(&self.handlers),
            self.server_configuration.fastcgi_connection_configuration(),
        )
    }

    async fn run_tcp(&self, bind_address: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("TcpListener::bind error bind_address '{}'", bind_address))?;

        info!(
            "listening on tcp {:?}",
            listener.local_addr().context("local_addr error")?
        );

        loop {
            let (stream, address) = listener
                .accept()
                .await
                .context("establishing tcp connection failed")?;

            self.connection_processor(address)
                .start(stream.into_split());
        }
    }

    async fn run_unix(&self, bind_address: &str) -> anyhow::Result<()> {
        // do not fail on remove error, the path may not exist.
        let remove_result = tokio::fs::remove_file(bind_address).await;
        debug!("remove_result = {:?}", remove_result);

        let listener = UnixListener::bind(bind_address)
            .with_context(|| format!("UnixListener::bind error path '{}'", bind_address))?;

        info!(
            "listening on unix socket {:?}",
            listener.local_addr().context("local_addr error")?
        );

        loop {
            let (stream, address) = listener
                .accept()
                .await
                .context("establishing unix connection failed")?;

            self.connection_processor(address)
                .start(stream.into_split());
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let bind_address = self.server_configuration.bind_address().clone();

        match self.server_configuration.server_type() {
            ServerType::Tcp => self.run_tcp(&bind_address).await,
            ServerType::Unix => self.run_unix(&bind_address).await,
        }
    }
}
