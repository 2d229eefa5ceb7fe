use async_trait::async_trait;

use log::{debug, warn};

use tokio::{
    sync::{Semaphore, SemaphorePermit},
    time::{Duration, Instant},
};

use crate::{
    cgi::{build_environment, CgiCompletion, CgiInvoker, InvokeError},
    handlers::{utils::build_status_code_response, RequestHandler},
    request::FastCGIRequest,
    response::HttpResponse,
};

#[derive(thiserror::Error, Debug)]
enum AcquireError {
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("semaphore closed")]
    Closed,
}

struct RunHandlerSemaphore {
    semaphore: Semaphore,
    acquire_timeout: Duration,
}

impl RunHandlerSemaphore {
    fn new(max_concurrent_handlers: usize, acquire_timeout: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent_handlers),
            acquire_timeout,
        }
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        tokio::time::timeout(self.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| AcquireError::Timeout(self.acquire_timeout))?
            .map_err(|_| AcquireError::Closed)
    }
}

pub(super) struct CGIHandler {
    document_root: String,
    invoker: CgiInvoker,
    run_handler_semaphore: RunHandlerSemaphore,
}

impl CGIHandler {
    fn new(
        document_root: String,
        invoker: CgiInvoker,
        run_handler_semaphore: RunHandlerSemaphore,
    ) -> Self {
        Self {
            document_root,
            invoker,
            run_handler_semaphore,
        }
    }

    pub(super) fn from_configuration(
        cgi_configuration: &crate::config::CGIConfiguration,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            cgi_configuration.max_concurrent_handlers() > 0,
            "max_concurrent_handlers must be greater than 0"
        );

        let invoker = CgiInvoker::new(cgi_configuration.handler().as_str())
            .with_max_output_bytes(cgi_configuration.max_output_bytes())
            .with_timeout(cgi_configuration.handler_timeout());

        Ok(Self::new(
            cgi_configuration.document_root().clone(),
            invoker,
            RunHandlerSemaphore::new(
                cgi_configuration.max_concurrent_handlers(),
                cgi_configuration.semaphore_acquire_timeout(),
            ),
        ))
    }
}

#[async_trait]
impl RequestHandler for CGIHandler {
    async fn handle(&self, request: FastCGIRequest<'_>) -> HttpResponse {
        let connection_id = request.connection_id();
        let request_id = request.request_id();

        if request.role() != "Responder" {
            warn!(
                "connection_id {} request_id {} unsupported role {}",
                connection_id,
                request_id,
                request.role()
            );
            return build_status_code_response(http::StatusCode::BAD_REQUEST);
        }

        let cgi_request = match request.into_cgi_request() {
            Err(err) => {
                warn!(
                    "connection_id {} request_id {} bad request: {}",
                    connection_id, request_id, err
                );
                return build_status_code_response(http::StatusCode::BAD_REQUEST);
            }
            Ok(cgi_request) => cgi_request,
        };

        let _permit = match self.run_handler_semaphore.acquire().await {
            Err(err) => {
                warn!("acquire run_handler_semaphore error: {}", err);
                return build_status_code_response(http::StatusCode::TOO_MANY_REQUESTS);
            }
            Ok(permit) => permit,
        };

        let env = build_environment(&self.document_root, &cgi_request);

        let start_time = Instant::now();

        let result = self.invoker.invoke(&env, cgi_request.into_body()).await;

        debug!(
            "connection_id {} request_id {} script_name = {:?} handler duration = {:?}",
            connection_id,
            request_id,
            env.get("SCRIPT_NAME"),
            start_time.elapsed(),
        );

        match result {
            Ok(completion) => build_cgi_response(completion),
            Err(err) => {
                warn!(
                    "connection_id {} request_id {} handler '{}' failed: {}",
                    connection_id,
                    request_id,
                    self.invoker.handler(),
                    err
                );
                build_status_code_response(error_status_code(&err))
            }
        }
    }
}

fn error_status_code(err: &InvokeError) -> http::StatusCode {
    match err {
        InvokeError::MissingVariable(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        InvokeError::Timeout(_) => http::StatusCode::GATEWAY_TIMEOUT,
        InvokeError::Spawn { .. } | InvokeError::OutputTooLarge { .. } | InvokeError::Io(_) => {
            http::StatusCode::BAD_GATEWAY
        }
    }
}

/// Converts a finished handler run into the HTTP response sent upstream.
///
/// The `Status` header only feeds the status code. Headers that are not
/// valid HTTP are dropped.
fn build_cgi_response(completion: CgiCompletion) -> HttpResponse {
    if completion.exit_code() != Some(0) {
        warn!("handler exit_code = {:?}", completion.exit_code());
    }

    let (status_code, headers, body) = completion.into_response().into_parts();

    let mut response = http::Response::new(Some(body));

    *response.status_mut() = match http::StatusCode::from_u16(status_code) {
        Ok(status) => status,
        Err(_) => {
            warn!("invalid handler status code {}", status_code);
            http::StatusCode::BAD_GATEWAY
        }
    };

    for (name, value) in headers {
        if name == "Status" {
            continue;
        }

        match (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(&value),
        ) {
            (Ok(header_name), Ok(header_value)) => {
                response.headers_mut().append(header_name, header_value);
            }
            _ => warn!("dropping invalid handler header {:?}: {:?}", name, value),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{connection::FastCGIConnectionID, request::ParamKeyValue};

    fn handler(handler: &str, max_concurrent_handlers: usize) -> CGIHandler {
        CGIHandler::new(
            "/var/www".to_string(),
            CgiInvoker::new(handler),
            RunHandlerSemaphore::new(max_concurrent_handlers, Duration::from_millis(50)),
        )
    }

    fn request(params: Vec<ParamKeyValue<'static>>, body: &[u8]) -> FastCGIRequest<'static> {
        FastCGIRequest::from_parts(FastCGIConnectionID(7), 1, "Responder", params, body.to_vec())
    }

    fn php_request(body: &[u8]) -> FastCGIRequest<'static> {
        request(
            vec![
                ("request_method", "POST"),
                ("request_uri", "/index.php?a=1"),
                ("http_host", "site.test"),
            ],
            body,
        )
    }

    #[tokio::test]
    async fn handler_output_becomes_response() {
        let script: &[u8] = br#"printf 'Status: 404 Not Found\r\nContent-Type: text/plain\r\nX-Script: %s\r\n\r\nmissing' "$SCRIPT_FILENAME""#;

        let response = handler("/bin/sh", 1).handle(php_request(script)).await;

        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(response.headers()["x-script"], "/var/www/index.php");
        assert!(response.headers().get("status").is_none());
        assert_eq!(response.body().as_deref(), Some(&b"missing"[..]));
    }

    #[tokio::test]
    async fn bad_request_without_method() {
        let response = handler("/bin/sh", 1)
            .handle(request(vec![("request_uri", "/")], b""))
            .await;

        assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn spawn_failure_is_bad_gateway() {
        let response = handler("/nonexistent/cgi-handler", 1)
            .handle(php_request(b""))
            .await;

        assert_eq!(response.status(), http::StatusCode::BAD_GATEWAY);
        assert!(response.body().is_none());
    }

    #[tokio::test]
    async fn exhausted_semaphore_is_too_many_requests() {
        let cgi_handler = handler("/bin/sh", 1);
        let _permit = cgi_handler.run_handler_semaphore.acquire().await.unwrap();

        let response = cgi_handler.handle(php_request(b"exit 0")).await;

        assert_eq!(response.status(), http::StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(
            error_status_code(&InvokeError::Timeout(Duration::from_secs(1))),
            http::StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            error_status_code(&InvokeError::OutputTooLarge { limit: 1 }),
            http::StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status_code(&InvokeError::MissingVariable("PATH")),
            http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
