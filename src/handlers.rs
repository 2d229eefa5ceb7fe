mod cgi;
mod utils;

pub(crate) use utils::build_status_code_response;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{request::FastCGIRequest, response::HttpResponse};

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: FastCGIRequest<'_>) -> HttpResponse;
}

pub fn create_handlers(
    configuration: &crate::config::Configuration,
) -> anyhow::Result<Arc<dyn RequestHandler>> {
    Ok(Arc::new(cgi::CGIHandler::from_configuration(
        configuration.cgi_configuration(),
    )?))
}
