use std::io::{Cursor, Read};

use getset::{CopyGetters, Getters};

use log::debug;

use tokio::io::AsyncWrite;

use crate::{cgi::CgiRequest, connection::FastCGIConnectionID};

pub type ParamKeyValue<'a> = (&'a str, &'a str);

/// Request body handed to the handler process.
pub type RequestBody = Cursor<Vec<u8>>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RequestConversionError {
    #[error("missing FastCGI param '{0}'")]
    MissingParam(&'static str),

    #[error("invalid request method '{0}'")]
    InvalidMethod(String),
}

#[derive(Debug, Getters, CopyGetters)]
pub struct FastCGIRequest<'a> {
    #[getset(get_copy = "pub")]
    connection_id: FastCGIConnectionID,
    #[getset(get_copy = "pub")]
    request_id: u16,
    #[getset(get_copy = "pub")]
    role: &'a str,
    #[getset(get = "pub")]
    params: Vec<ParamKeyValue<'a>>,
    #[getset(get = "pub")]
    body: Vec<u8>,
}

impl<'a> FastCGIRequest<'a> {
    pub fn new<W: AsyncWrite + Unpin>(
        connection_id: FastCGIConnectionID,
        request: &'a tokio_fastcgi::Request<W>,
    ) -> std::io::Result<Self> {
        let role = match request.role {
            tokio_fastcgi::Role::Authorizer => "Authorizer",
            tokio_fastcgi::Role::Filter => "Filter",
            tokio_fastcgi::Role::Responder => "Responder",
        };

        let params: Vec<ParamKeyValue> = match request.str_params_iter() {
            Some(iter) => iter
                .map(|v| (v.0, v.1.unwrap_or("[Invalid UTF8]")))
                .collect(),
            None => Vec::new(),
        };

        let mut body = Vec::new();
        request.get_stdin().read_to_end(&mut body)?;

        Ok(Self::from_parts(
            connection_id,
            request.get_request_id(),
            role,
            params,
            body,
        ))
    }

    pub fn from_parts(
        connection_id: FastCGIConnectionID,
        request_id: u16,
        role: &'a str,
        params: Vec<ParamKeyValue<'a>>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            connection_id,
            request_id,
            role,
            params,
            body,
        }
    }

    fn param(&self, name: &str) -> Option<&'a str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }

    /// Rebuilds the HTTP request the web server received.
    ///
    /// Headers come from the `HTTP_*` params plus `CONTENT_TYPE` and
    /// `CONTENT_LENGTH`. Params that do not form a valid header are skipped.
    /// `REQUEST_URI` is taken as sent, without validation.
    pub fn into_cgi_request(self) -> Result<CgiRequest<RequestBody>, RequestConversionError> {
        let method = self
            .param("request_method")
            .ok_or(RequestConversionError::MissingParam("request_method"))?;
        let method = http::Method::from_bytes(method.as_bytes())
            .map_err(|_| RequestConversionError::InvalidMethod(method.to_string()))?;

        let request_uri = self
            .param("request_uri")
            .ok_or(RequestConversionError::MissingParam("request_uri"))?;

        let mut headers = http::HeaderMap::new();
        for (key, value) in self.params.iter() {
            let lower_key = key.to_ascii_lowercase();
            let header_name = match lower_key.strip_prefix("http_") {
                Some(name) => name.replace('_', "-"),
                None if lower_key == "content_type" || lower_key == "content_length" => {
                    lower_key.replace('_', "-")
                }
                None => continue,
            };

            match (
                http::header::HeaderName::from_bytes(header_name.as_bytes()),
                http::HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!("skipping invalid header param '{}'", key),
            }
        }

        Ok(CgiRequest::new(
            method,
            request_uri,
            headers,
            Cursor::new(self.body),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fastcgi_request(params: Vec<ParamKeyValue<'static>>, body: &[u8]) -> FastCGIRequest<'static> {
        FastCGIRequest::from_parts(FastCGIConnectionID(1), 1, "Responder", params, body.to_vec())
    }

    #[test]
    fn converts_params_to_request() {
        let request = fastcgi_request(
            vec![
                ("request_method", "POST"),
                ("request_uri", "/index.php?a=1"),
                ("http_host", "site.test:80"),
                ("http_user_agent", "curl/8.0"),
                ("content_type", "application/x-www-form-urlencoded"),
                ("content_length", "3"),
                ("script_filename", "/ignored"),
            ],
            b"a=b",
        );

        let cgi_request = request.into_cgi_request().unwrap();

        assert_eq!(*cgi_request.method(), http::Method::POST);
        assert_eq!(cgi_request.path(), "/index.php");
        assert_eq!(cgi_request.query(), Some("a=1"));
        assert_eq!(cgi_request.headers()["host"], "site.test:80");
        assert_eq!(cgi_request.headers()["user-agent"], "curl/8.0");
        assert_eq!(
            cgi_request.headers()["content-type"],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(cgi_request.headers()["content-length"], "3");
        assert_eq!(cgi_request.headers().len(), 4);

        let mut body = Vec::new();
        cgi_request.into_body().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"a=b");
    }

    #[test]
    fn missing_method_is_rejected() {
        let request = fastcgi_request(vec![("request_uri", "/")], b"");

        assert_eq!(
            request.into_cgi_request().unwrap_err(),
            RequestConversionError::MissingParam("request_method")
        );
    }

    #[test]
    fn missing_uri_is_rejected() {
        let request = fastcgi_request(vec![("request_method", "GET")], b"");

        assert_eq!(
            request.into_cgi_request().unwrap_err(),
            RequestConversionError::MissingParam("request_uri")
        );
    }

    #[test]
    fn raw_request_uri_is_accepted() {
        let request = fastcgi_request(
            vec![
                ("request_method", "GET"),
                ("request_uri", "/café.php?a=\"b\"&c=d e"),
            ],
            b"",
        );

        let cgi_request = request.into_cgi_request().unwrap();

        assert_eq!(cgi_request.path(), "/café.php");
        assert_eq!(cgi_request.query(), Some("a=\"b\"&c=d e"));
    }

    #[test]
    fn invalid_header_value_is_skipped() {
        let request = fastcgi_request(
            vec![
                ("request_method", "GET"),
                ("request_uri", "/"),
                ("http_x_bad", "line\nbreak"),
                ("http_accept", "*/*"),
            ],
            b"",
        );

        let cgi_request = request.into_cgi_request().unwrap();

        assert_eq!(cgi_request.headers().len(), 1);
        assert_eq!(cgi_request.headers()["accept"], "*/*");
    }
}
