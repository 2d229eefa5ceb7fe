/// Header names that are forwarded with the `HTTP_` prefix.
///
/// Matched against the uppercased header name before dashes are replaced,
/// so the `ACCEPT_LANGUAGE` entry only matches a header literally spelled
/// with an underscore. Every other header is forwarded without a prefix.
const HTTP_PREFIXED_HEADERS: [&str; 8] = [
    "COOKIE",
    "HOST",
    "REFERER",
    "USER-AGENT",
    "CONNECTION",
    "ACCEPT",
    "ACCEPT-ENCODING",
    "ACCEPT_LANGUAGE",
];

fn needs_http_prefix(header_name: &str) -> bool {
    HTTP_PREFIXED_HEADERS
        .iter()
        .any(|prefixed| prefixed.eq_ignore_ascii_case(header_name))
}

/// Maps a request header name to the CGI environment variable carrying it.
pub fn cgi_variable_name(header_name: &str) -> String {
    let name = header_name.to_ascii_uppercase().replace('-', "_");

    if needs_http_prefix(header_name) {
        format!("HTTP_{}", name)
    } else {
        name
    }
}
