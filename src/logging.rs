use std::io::Write;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

pub(crate) const LOG_ENV: &str = "PORTAL_LOG";
const LOG_BUFFER: usize = 500;

/// Writes each formatted log line to stdout and to a broadcast channel
/// that backs the admin log stream.
#[derive(Clone)]
pub(crate) struct LogTee {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for LogTee {
    type Writer = LogTeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogTeeWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct LogTeeWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl Write for LogTeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).trim_end().to_string();
        // no subscribers is fine
        let _ = self.sender.send(line);
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Install the global subscriber. Returns the sender the log stream
/// subscribes to. Safe to call more than once; later calls keep the first
/// subscriber.
pub(crate) fn init_logging(suppress_stdout: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel::<String>(LOG_BUFFER);
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(LogTee {
            sender: log_tx.clone(),
            suppress_stdout,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_tx
}
