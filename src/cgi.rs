mod environment;
mod header_name;
mod invoker;
mod parser;

use getset::Getters;

use tokio::io::AsyncRead;

pub use environment::{build_environment, CgiEnvironment};
pub use header_name::cgi_variable_name;
pub use invoker::{
    CgiCompletion, CgiInvoker, InvokeError, DEFAULT_HANDLER, DEFAULT_MAX_OUTPUT_BYTES,
};
pub use parser::{parse_response, ParsedResponse};

/// An inbound request as seen by the CGI layer.
///
/// The body is only read once the handler process exists.
#[derive(Debug, Getters)]
pub struct CgiRequest<B> {
    #[getset(get = "pub")]
    method: http::Method,
    path: String,
    query: Option<String>,
    #[getset(get = "pub")]
    headers: http::HeaderMap,
    body: B,
}

impl<B> CgiRequest<B>
where
    B: AsyncRead + Unpin,
{
    /// Creates a request from the raw request target sent by the client.
    ///
    /// The target is split on the first `?` into path and query and any
    /// `#fragment` is dropped. No validation or decoding takes place.
    pub fn new(method: http::Method, target: &str, headers: http::HeaderMap, body: B) -> Self {
        let target = target.split('#').next().unwrap_or_default();

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };

        Self {
            method,
            path: path.to_string(),
            query,
            headers,
            body,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn into_body(self) -> B {
        self.body
    }
}
