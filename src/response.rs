use std::{fmt::Write, sync::Arc};

use log::{debug, warn};

use tokio::io::AsyncWrite;

use tokio_fastcgi::{Request, RequestResult};

pub type HttpResponse = http::Response<Option<Vec<u8>>>;

#[derive(thiserror::Error, Debug)]
enum SendResponseError {
    #[error("build header string error: {0}")]
    BuildHeaderStringError(#[from] std::fmt::Error),

    #[error("tokio_fastcgi write error: {0}")]
    TokioFastCGIWriteError(#[from] tokio_fastcgi::Error),
}

fn build_header_string(response: &HttpResponse) -> Result<String, std::fmt::Error> {
    let mut header_string = String::new();

    write!(
        header_string,
        "Status: {} {}\n",
        response.status().as_u16(),
        response.status().canonical_reason().unwrap_or("[Unknown]")
    )?;

    for (key, value) in response.headers() {
        write!(
            header_string,
            "{}: {}\n",
            key.as_str(),
            String::from_utf8_lossy(value.as_bytes())
        )?;
    }

    header_string.push('\n');

    Ok(header_string)
}

pub struct Responder<W>
where
    W: AsyncWrite + Unpin,
{
    request: Arc<Request<W>>,
    response: HttpResponse,
}

impl<W> Responder<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(request: Arc<Request<W>>, response: HttpResponse) -> Self {
        Self { request, response }
    }

    async fn internal_send_response(self) -> Result<(), SendResponseError> {
        let mut stdout = self.request.get_stdout();

        let header_string = build_header_string(&self.response)?;

        stdout.write(header_string.as_bytes()).await?;

        if let Some(body) = self.response.into_body() {
            if !body.is_empty() {
                stdout.write(&body).await?;
            }
        }

        Ok(())
    }

    pub async fn respond(self) -> RequestResult {
        debug!(
            "respond status = {} headers = {:?}",
            self.response.status(),
            self.response.headers()
        );

        match self.internal_send_response().await {
            Ok(_) => RequestResult::Complete(0),
            Err(err) => {
                warn!("send response failed: {}", err);
                RequestResult::Complete(1)
            }
        }
    }
}
