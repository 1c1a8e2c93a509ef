//! Change-log emission.

use donutdb_core::ChangeRecord;
use parking_lot::Mutex;
use std::io::Write;
use tracing::warn;

/// Writes [`ChangeRecord`]s as JSON lines to a configured sink.
///
/// The stream is audit-only; a failed write is logged and dropped so it can
/// never affect file semantics.
pub struct ChangeLogger {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl ChangeLogger {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub fn record(&self, record: &ChangeRecord) {
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to encode change-log record");
                return;
            }
        };
        line.push(b'\n');

        let mut sink = self.sink.lock();
        if let Err(err) = sink.write_all(&line) {
            warn!(error = %err, "failed to write change-log record");
        }
    }

    pub fn start(&self, action: &str, name: &str, flags: u32, off: i64) {
        self.record(&ChangeRecord::start(action, name, flags, off));
    }

    pub fn complete(&self, action: &str, name: &str, ret_count: i64, ret_error: Option<String>) {
        self.record(&ChangeRecord::complete(action, name, ret_count, ret_error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<PlMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_emits_one_line_per_record() {
        let buf = SharedBuf::default();
        let logger = ChangeLogger::new(Box::new(buf.clone()));

        logger.start("WriteAt", "test.db", 0, 1024);
        logger.complete("WriteAt", "test.db", 14, None);

        let captured = buf.0.lock();
        let text = String::from_utf8(captured.clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WriteAtStart"));
        assert!(lines[1].contains("WriteAtComplete"));
    }
}
