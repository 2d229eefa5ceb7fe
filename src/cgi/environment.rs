use std::collections::BTreeMap;

use tokio::io::AsyncRead;

use crate::cgi::{cgi_variable_name, CgiRequest};

/// Variables every handler invocation must receive.
const REQUIRED_VARIABLES: [&str; 13] = [
    "PATH",
    "GATEWAY_INTERFACE",
    "SERVER_PROTOCOL",
    "SERVER_ROOT",
    "DOCUMENT_ROOT",
    "REDIRECT_STATUS",
    "SERVER_NAME",
    "SERVER_PORT",
    "SCRIPT_NAME",
    "REQUEST_URI",
    "SCRIPT_FILENAME",
    "REQUEST_METHOD",
    "QUERY_STRING",
];

const DEFAULT_SERVER_PORT: u16 = 80;

/// The CGI/1.1 meta-variables passed to one handler process.
///
/// Keys are kept sorted so identical requests always produce identical
/// environments, down to iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiEnvironment {
    variables: BTreeMap<String, String>,
}

impl CgiEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.variables.insert(name.into(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns the first required variable missing from this environment.
    pub fn validate(&self) -> Result<(), &'static str> {
        match REQUIRED_VARIABLES
            .iter()
            .find(|name| !self.variables.contains_key(**name))
        {
            Some(missing) => Err(*missing),
            None => Ok(()),
        }
    }
}

/// Builds the handler environment for `request`, inheriting `PATH` from this
/// process.
pub fn build_environment<B>(document_root: &str, request: &CgiRequest<B>) -> CgiEnvironment
where
    B: AsyncRead + Unpin,
{
    let path = std::env::var("PATH").unwrap_or_default();

    build_environment_with_path(document_root, &path, request)
}

pub(crate) fn build_environment_with_path<B>(
    document_root: &str,
    path: &str,
    request: &CgiRequest<B>,
) -> CgiEnvironment
where
    B: AsyncRead + Unpin,
{
    let script_name = request.path();
    let script_filename = normalize_path(&format!("{}{}", document_root, script_name));
    let (server_name, server_port) = split_host(request.headers());

    let mut env = CgiEnvironment::new();

    env.insert("PATH", path);
    env.insert("GATEWAY_INTERFACE", "CGI/1.1");
    env.insert("SERVER_PROTOCOL", "HTTP/1.1");
    env.insert("SERVER_ROOT", document_root);
    env.insert("DOCUMENT_ROOT", document_root);
    env.insert("REDIRECT_STATUS", 200);
    env.insert("SERVER_NAME", server_name);
    env.insert("SERVER_PORT", server_port);
    env.insert("SCRIPT_NAME", script_name);
    env.insert("REQUEST_URI", script_name);
    env.insert("SCRIPT_FILENAME", script_filename);
    env.insert("REQUEST_METHOD", request.method().as_str());
    env.insert("QUERY_STRING", request.query().unwrap_or(""));

    for name in request.headers().keys() {
        let separator = if *name == http::header::COOKIE { "; " } else { ", " };

        let value = request
            .headers()
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
            .collect::<Vec<_>>()
            .join(separator);

        env.insert(cgi_variable_name(name.as_str()), value);
    }

    env
}

/// Splits the `Host` header into server name and port.
///
/// Anything after a second `:` is ignored and a missing or empty port falls
/// back to 80.
fn split_host(headers: &http::HeaderMap) -> (String, String) {
    let host = headers
        .get(http::header::HOST)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default();

    let mut parts = host.split(':');

    let server_name = parts.next().unwrap_or_default().to_string();
    let server_port = match parts.next() {
        Some(port) if !port.is_empty() => port.to_string(),
        _ => DEFAULT_SERVER_PORT.to_string(),
    };

    (server_name, server_port)
}

/// Lexically normalizes a `/` separated path.
///
/// Repeated separators and `.` segments are removed and `..` segments are
/// folded into their parent. `..` never climbs above the root of an absolute
/// path. A trailing separator is kept.
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let absolute = path.starts_with('/');
    let trailing_separator = path.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            segment => segments.push(segment),
        }
    }

    let mut normalized = segments.join("/");
    if absolute {
        normalized.insert(0, '/');
    }
    if normalized.is_empty() {
        normalized.push('.');
    }
    if trailing_separator && !normalized.ends_with('/') {
        normalized.push('/');
    }

    normalized
}
