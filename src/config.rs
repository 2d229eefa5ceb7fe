use std::time::Duration;

use anyhow::Context;

use getset::{CopyGetters, Getters};

use log::info;

use serde::{Deserialize, Serialize};

use tokio::{fs::File, io::AsyncReadExt};

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub enum ServerType {
    #[serde(rename = "TCP")]
    Tcp,

    #[serde(rename = "UNIX")]
    Unix,
}

#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub")]
pub struct FastCGIConnectionConfiguration {
    max_concurrent_connections: u8,
    max_requests_per_connection: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub")]
pub struct ServerConfiguration {
    server_type: ServerType,
    bind_address: String,
    fastcgi_connection_configuration: FastCGIConnectionConfiguration,
}

fn default_handler() -> String {
    crate::cgi::DEFAULT_HANDLER.to_string()
}

fn default_max_output_bytes() -> usize {
    crate::cgi::DEFAULT_MAX_OUTPUT_BYTES
}

#[derive(Debug, Clone, Deserialize, Serialize, Getters, CopyGetters)]
pub struct CGIConfiguration {
    #[getset(get = "pub")]
    document_root: String,

    #[serde(default = "default_handler")]
    #[getset(get = "pub")]
    handler: String,

    #[getset(get_copy = "pub")]
    max_concurrent_handlers: usize,

    #[serde(with = "humantime_serde")]
    #[getset(get_copy = "pub")]
    semaphore_acquire_timeout: Duration,

    #[serde(default, with = "humantime_serde")]
    #[getset(get_copy = "pub")]
    handler_timeout: Option<Duration>,

    #[serde(default = "default_max_output_bytes")]
    #[getset(get_copy = "pub")]
    max_output_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Getters)]
#[getset(get = "pub")]
pub struct Configuration {
    server_configuration: ServerConfiguration,
    cgi_configuration: CGIConfiguration,
}

pub fn parse_configuration(contents: &[u8]) -> anyhow::Result<Configuration> {
    let configuration: Configuration =
        ::serde_json::from_slice(contents).context("error unmarshalling configuration")?;

    anyhow::ensure!(
        configuration.cgi_configuration.document_root.starts_with('/'),
        "document_root '{}' must be an absolute path",
        configuration.cgi_configuration.document_root,
    );

    anyhow::ensure!(
        configuration.cgi_configuration.max_concurrent_handlers > 0,
        "max_concurrent_handlers must be greater than 0",
    );

    Ok(configuration)
}

pub async fn read_configuration(config_file: String) -> anyhow::Result<Configuration> {
    info!("reading {}", config_file);

    let mut file = File::open(&config_file)
        .await
        .with_context(|| format!("error opening config file '{}'", config_file))?;

    let mut file_contents = Vec::new();

    file.read_to_end(&mut file_contents)
        .await
        .with_context(|| format!("error reading config file '{}'", config_file))?;

    let configuration = parse_configuration(&file_contents)
        .with_context(|| format!("error parsing config file '{}'", config_file))?;

    info!("configuration\n{:#?}", configuration);

    Ok(configuration)
}
