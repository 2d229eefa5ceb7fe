use std::collections::BTreeMap;

use getset::{CopyGetters, Getters};

/// Status reported when the handler does not send a `Status` header.
const DEFAULT_STATUS: &str = "200 OK";

const STATUS_HEADER: &str = "Status";
const DEFAULT_STATUS_CODE: u16 = 200;
const CRLF: &[u8] = b"\r\n";

/// A handler's output split into headers, status and body.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ParsedResponse {
    #[getset(get = "pub")]
    headers: BTreeMap<String, String>,
    #[getset(get_copy = "pub")]
    status_code: u16,
    #[getset(get = "pub")]
    body: Vec<u8>,
}

impl ParsedResponse {
    pub fn into_parts(self) -> (u16, BTreeMap<String, String>, Vec<u8>) {
        (self.status_code, self.headers, self.body)
    }
}

/// Parses the complete output of a CGI handler.
///
/// Parsing is lenient and never fails. Header lines are split on `:` and
/// only the text between the first and second colon becomes the value, with
/// leading whitespace removed. A line without a colon is kept with an empty
/// value. The header block ends at the first empty line; without one, every
/// line is a header and the body is empty. The body bytes are returned
/// untouched.
pub fn parse_response(output: &[u8]) -> ParsedResponse {
    let mut headers = BTreeMap::new();
    let mut rest = output;

    let body = loop {
        let (line, remainder) = match find_crlf(rest) {
            Some(index) => (&rest[..index], Some(&rest[index + CRLF.len()..])),
            None => (rest, None),
        };

        if line.is_empty() {
            break remainder.unwrap_or_default();
        }

        let (name, value) = split_header_line(line);
        headers.insert(name, value);

        match remainder {
            Some(remainder) => rest = remainder,
            None => break &[][..],
        }
    };

    let status = headers
        .entry(STATUS_HEADER.to_string())
        .or_insert_with(|| DEFAULT_STATUS.to_string());
    let status_code = parse_status_code(status).unwrap_or(DEFAULT_STATUS_CODE);

    ParsedResponse {
        headers,
        status_code,
        body: body.to_vec(),
    }
}

fn find_crlf(input: &[u8]) -> Option<usize> {
    input.windows(CRLF.len()).position(|window| window == CRLF)
}

fn split_header_line(line: &[u8]) -> (String, String) {
    let line = String::from_utf8_lossy(line);
    let mut parts = line.split(':');

    let name = parts.next().unwrap_or_default().to_string();
    let value = parts
        .next()
        .map(|value| value.trim_start_matches([' ', '\t']).to_string())
        .unwrap_or_default();

    (name, value)
}

/// Reads the leading decimal integer of a `Status` value.
///
/// A single leading `+` is allowed. Codes outside of 100..=999 are rejected.
fn parse_status_code(status: &str) -> Option<u16> {
    let status = status.trim_start();
    let status = status.strip_prefix('+').unwrap_or(status);
    let digits_end = status
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(status.len());

    status[..digits_end]
        .parse::<u16>()
        .ok()
        .filter(|code| (100..=999).contains(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(response: &'a ParsedResponse, name: &str) -> Option<&'a str> {
        response.headers().get(name).map(String::as_str)
    }

    #[test]
    fn parses_status_headers_and_body() {
        let response =
            parse_response(b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\nHello");

        assert_eq!(response.headers().len(), 2);
        assert_eq!(header(&response, "Status"), Some("404 Not Found"));
        assert_eq!(header(&response, "Content-Type"), Some("text/plain"));
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.body(), b"Hello");
    }

    #[test]
    fn empty_output_defaults_status() {
        let response = parse_response(b"");

        assert_eq!(response.headers().len(), 1);
        assert_eq!(header(&response, "Status"), Some(DEFAULT_STATUS));
        assert_eq!(response.status_code(), 200);
        assert!(response.body().is_empty());
    }

    #[test]
    fn missing_separator_treats_everything_as_headers() {
        let response = parse_response(b"X: 1\r\nY: 2");

        assert_eq!(header(&response, "X"), Some("1"));
        assert_eq!(header(&response, "Y"), Some("2"));
        assert_eq!(header(&response, "Status"), Some(DEFAULT_STATUS));
        assert!(response.body().is_empty());
    }

    #[test]
    fn trailing_crlf_without_body() {
        let response = parse_response(b"Content-Type: text/html\r\n");

        assert_eq!(header(&response, "Content-Type"), Some("text/html"));
        assert!(response.body().is_empty());
    }

    #[test]
    fn leading_separator_means_no_headers() {
        let response = parse_response(b"\r\nbody only");

        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body(), b"body only");
    }

    #[test]
    fn body_is_kept_verbatim() {
        let response = parse_response(b"A: b\r\n\r\nline1\r\n\r\nline2\n\x00\xff");

        assert_eq!(response.body(), b"line1\r\n\r\nline2\n\x00\xff");
    }

    #[test]
    fn value_after_second_colon_is_dropped() {
        let response = parse_response(b"Location: http://example.com/\r\n\r\n");

        assert_eq!(header(&response, "Location"), Some("http"));
    }

    #[test]
    fn line_without_colon_has_empty_value() {
        let response = parse_response(b"NoColon\r\nA: b\r\n\r\n");

        assert_eq!(header(&response, "NoColon"), Some(""));
        assert_eq!(header(&response, "A"), Some("b"));
    }

    #[test]
    fn later_duplicate_header_wins() {
        let response = parse_response(b"Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n");

        assert_eq!(header(&response, "Set-Cookie"), Some("b=2"));
    }

    #[test]
    fn status_lookup_is_case_sensitive() {
        let response = parse_response(b"status: 500 Oops\r\n\r\n");

        assert_eq!(header(&response, "status"), Some("500 Oops"));
        assert_eq!(header(&response, "Status"), Some(DEFAULT_STATUS));
        assert_eq!(response.status_code(), 200);
    }

    #[test]
    fn status_code_ignores_trailing_text() {
        assert_eq!(parse_response(b"Status: 302\r\n\r\n").status_code(), 302);
        assert_eq!(parse_response(b"Status:201Created\r\n\r\n").status_code(), 201);
        assert_eq!(parse_response(b"Status: \t503 Busy\r\n\r\n").status_code(), 503);
        assert_eq!(parse_response(b"Status: +301 Moved\r\n\r\n").status_code(), 301);
    }

    #[test]
    fn unusable_status_code_falls_back_to_default() {
        let response = parse_response(b"Status: teapot\r\n\r\n");
        assert_eq!(header(&response, "Status"), Some("teapot"));
        assert_eq!(response.status_code(), 200);

        assert_eq!(parse_response(b"Status: 42\r\n\r\n").status_code(), 200);
        assert_eq!(parse_response(b"Status: 99999\r\n\r\n").status_code(), 200);
        assert_eq!(parse_response(b"Status: ++301\r\n\r\n").status_code(), 200);
        assert_eq!(parse_response(b"Status: -301\r\n\r\n").status_code(), 200);
    }

    #[test]
    fn reparsing_reconstructed_output_is_stable() {
        let original: &[u8] = b"Content-Type: text/plain\r\nX-Powered-By: test\r\n\r\nHello\r\nWorld";
        let first = parse_response(original);

        let mut rebuilt = Vec::new();
        for (name, value) in first.headers() {
            if name == "Status" {
                continue;
            }
            rebuilt.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        rebuilt.extend_from_slice(b"\r\n");
        rebuilt.extend_from_slice(first.body());

        assert_eq!(parse_response(&rebuilt), first);
    }
}
