//! Test utilities (available with `test-utils` feature).

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use crate::capture::StackFrame;
use crate::inspect::QueryInfo;

/// A normalized query without call sites
pub fn query(sql: &str, elapsed: f64) -> QueryInfo {
    QueryInfo {
        sql: sql.to_string(),
        elapsed,
        stack: vec![],
    }
}

/// A normalized query issued from `file:line`
pub fn query_at(sql: &str, elapsed: f64, file: &str, line: u32) -> QueryInfo {
    QueryInfo {
        sql: sql.to_string(),
        elapsed,
        stack: vec![StackFrame::new(file, line)],
    }
}

/// In-memory log sink for asserting on emitted log lines.
///
/// ```ignore
/// let logs = CapturedLogs::default();
/// let _guard = tracing::subscriber::set_default(logs.subscriber());
/// ```
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(Level::TRACE)
            .finish()
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
