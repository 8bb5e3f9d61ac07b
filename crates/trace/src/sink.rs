use std::{
    fs::{File, OpenOptions},
    io::{self, LineWriter, Write},
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

/// Console stream a [`SinkWriter`] mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

type SharedFile = Arc<Mutex<LineWriter<File>>>;

/// Duplicates every write to a console stream and an append-only log file.
///
/// Writes never fail: console or file errors are swallowed so a broken log
/// file cannot take the process down.
#[derive(Clone, Default)]
pub struct DualSink {
    file: Option<SharedFile>,
}

impl DualSink {
    /// Open (or create) `path` in append mode, creating missing parent
    /// directories.
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be created.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(LineWriter::new(file)))),
        })
    }

    /// A sink that only writes to the console.
    #[must_use]
    pub fn console() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stdout(&self) -> SinkWriter {
        self.writer(Stream::Stdout)
    }

    #[must_use]
    pub fn stderr(&self) -> SinkWriter {
        self.writer(Stream::Stderr)
    }

    fn writer(&self, stream: Stream) -> SinkWriter {
        SinkWriter {
            stream,
            file: self.file.clone(),
        }
    }
}

impl<'a> MakeWriter<'a> for DualSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.stdout()
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        if *meta.level() <= Level::WARN {
            self.stderr()
        } else {
            self.stdout()
        }
    }
}

pub struct SinkWriter {
    stream: Stream,
    file: Option<SharedFile>,
}

impl SinkWriter {
    /// Write `line` followed by a newline as a single unit.
    pub fn write_line(&mut self, line: &str) {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        let _ = self.write_all(buf.as_bytes());
        let _ = self.flush();
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = match self.stream {
            Stream::Stdout => io::stdout().lock().write_all(buf),
            Stream::Stderr => io::stderr().lock().write_all(buf),
        };
        if let Some(file) = &self.file {
            let _ = file.lock().write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = match self.stream {
            Stream::Stdout => io::stdout().flush(),
            Stream::Stderr => io::stderr().flush(),
        };
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
        Ok(())
    }
}
