use crate::response::HttpResponse;

pub fn build_status_code_response(status_code: http::StatusCode) -> HttpResponse {
    let mut response = http::Response::new(None);
    *response.status_mut() = status_code;
    response
}
