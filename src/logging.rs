use std::io::Write;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Tees every formatted log line onto a broadcast channel so the web
/// interface can stream it over SSE, while still writing to stdout.
#[derive(Clone)]
pub(crate) struct LogTee {
    sender: tokio::sync::broadcast::Sender<String>,
    stdout: bool,
}

impl<'a> MakeWriter<'a> for LogTee {
    type Writer = LogTee;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        let _ = self.sender.send(line.into_owned()); // Ignored if no receivers
        if self.stdout {
            std::io::stdout().lock().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.stdout {
            std::io::stdout().lock().flush()?;
        }
        Ok(())
    }
}

/// `RUST_LOG` controls verbosity, defaulting to info.
pub(crate) fn init(log_tx: tokio::sync::broadcast::Sender<String>, suppress_stdout: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(LogTee {
            sender: log_tx,
            stdout: !suppress_stdout,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // Ignore err on re-init
}
