use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use getset::{CopyGetters, Getters};

use log::{debug, warn};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::{ChildStderr, ChildStdin, ChildStdout, Command},
};

use crate::cgi::{parse_response, CgiEnvironment, ParsedResponse};

/// Handler executable used when none is configured.
pub const DEFAULT_HANDLER: &str = "php-cgi";

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum InvokeError {
    #[error("required CGI variable {0} is missing")]
    MissingVariable(&'static str),

    #[error("error spawning handler '{handler}': {source}")]
    Spawn {
        handler: String,
        #[source]
        source: io::Error,
    },

    #[error("handler output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    #[error("handler did not finish within {0:?}")]
    Timeout(Duration),

    #[error("handler i/o error: {0}")]
    Io(#[from] io::Error),
}

/// The result of one finished handler process.
#[derive(Debug, Getters, CopyGetters)]
pub struct CgiCompletion {
    /// `None` if the handler was terminated by a signal.
    #[getset(get_copy = "pub")]
    exit_code: Option<i32>,
    #[getset(get = "pub")]
    response: ParsedResponse,
}

impl CgiCompletion {
    pub fn into_response(self) -> ParsedResponse {
        self.response
    }
}

/// Handler stdout, collected chunk by chunk up to a byte limit.
struct RawOutput {
    chunks: Vec<Vec<u8>>,
    len: usize,
    limit: usize,
}

impl RawOutput {
    fn new(limit: usize) -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
            limit,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Result<(), InvokeError> {
        if self.len + chunk.len() > self.limit {
            return Err(InvokeError::OutputTooLarge { limit: self.limit });
        }

        self.len += chunk.len();
        self.chunks.push(chunk.to_vec());

        Ok(())
    }

    fn concat(self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// Runs one handler process per request.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct CgiInvoker {
    #[getset(get = "pub")]
    handler: String,
    #[getset(get_copy = "pub")]
    max_output_bytes: usize,
    #[getset(get_copy = "pub")]
    timeout: Option<Duration>,
}

impl CgiInvoker {
    /// An empty `handler` selects [`DEFAULT_HANDLER`].
    pub fn new(handler: impl Into<String>) -> Self {
        let mut handler = handler.into();
        if handler.is_empty() {
            handler = DEFAULT_HANDLER.to_string();
        }

        Self {
            handler,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timeout: None,
        }
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawns the handler with exactly `env` as its environment, streams
    /// `body` into its stdin and parses its stdout once it exits.
    ///
    /// The exit code is reported as-is; a non-zero code still yields a parsed
    /// response.
    pub async fn invoke<B>(
        &self,
        env: &CgiEnvironment,
        body: B,
    ) -> Result<CgiCompletion, InvokeError>
    where
        B: AsyncRead + Unpin,
    {
        env.validate().map_err(InvokeError::MissingVariable)?;

        let mut child = Command::new(&self.handler)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvokeError::Spawn {
                handler: self.handler.clone(),
                source,
            })?;

        debug!(
            "spawned handler '{}' pid {:?} script_name = {:?}",
            self.handler,
            child.id(),
            env.get("SCRIPT_NAME"),
        );

        let (stdin, stdout, stderr) = match (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                return Err(InvokeError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "handler pipes were not captured",
                )))
            }
        };

        let run = async {
            let (_, output, _) = tokio::try_join!(
                write_body(stdin, body),
                read_output(stdout, self.max_output_bytes),
                log_stderr(&self.handler, stderr),
            )?;

            // stdout is at EOF here, so no output can arrive after the exit.
            let status = child.wait().await?;

            Ok::<_, InvokeError>((status, output))
        };

        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, run).await {
                Ok(result) => result,
                Err(_) => Err(InvokeError::Timeout(timeout)),
            },
            None => run.await,
        };

        let (status, output) = match result {
            Ok(result) => result,
            Err(err) => {
                if let Err(kill_err) = child.kill().await {
                    debug!("kill handler '{}' error: {}", self.handler, kill_err);
                }
                return Err(err);
            }
        };

        log_exit_status(&self.handler, status);

        Ok(CgiCompletion {
            exit_code: status.code(),
            response: parse_response(&output),
        })
    }
}

async fn write_body<B>(mut stdin: ChildStdin, mut body: B) -> Result<(), InvokeError>
where
    B: AsyncRead + Unpin,
{
    match tokio::io::copy(&mut body, &mut stdin).await {
        Ok(bytes) => debug!("wrote {} request body bytes to handler", bytes),
        // The handler may exit without reading its input.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("handler closed stdin before the request body was written")
        }
        Err(err) => return Err(err.into()),
    }

    // closes the handler's stdin
    drop(stdin);

    Ok(())
}

async fn read_output(mut stdout: ChildStdout, limit: usize) -> Result<Vec<u8>, InvokeError> {
    let mut output = RawOutput::new(limit);
    let mut chunk = vec![0; READ_CHUNK_SIZE];

    loop {
        let bytes_read = stdout.read(&mut chunk).await?;
        if bytes_read == 0 {
            break;
        }
        output.push(&chunk[..bytes_read])?;
    }

    Ok(output.concat())
}

async fn log_stderr(handler: &str, stderr: ChildStderr) -> Result<(), InvokeError> {
    let mut lines = BufReader::new(stderr).split(b'\n');

    while let Some(line) = lines.next_segment().await? {
        warn!(
            "handler '{}' stderr: {}",
            handler,
            String::from_utf8_lossy(&line).trim_end()
        );
    }

    Ok(())
}

fn log_exit_status(handler: &str, status: ExitStatus) {
    if status.success() {
        debug!("handler '{}' exited successfully", handler);
        return;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            warn!("handler '{}' terminated by signal {}", handler, signal);
            return;
        }
    }

    warn!("handler '{}' exited with {:?}", handler, status.code());
}
