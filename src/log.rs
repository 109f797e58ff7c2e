//! Device logging
//!
//! Mirrors the teacher's `serial_print!`/`serial_println!` idiom: a
//! process-wide sink behind a lock, written to via macros so call sites
//! read like `device_log!("[MODEL] loaded {} layers", n)`. In tests the
//! sink can be swapped for an in-memory buffer so assertions can inspect
//! what was logged without scraping stdout.

use spin::Mutex;
use std::io::Write;

/// Where log lines go.
pub enum LogSink {
    Stderr,
    Buffer(Vec<String>),
}

impl LogSink {
    fn write_line(&mut self, line: &str) {
        match self {
            LogSink::Stderr => {
                let _ = writeln!(std::io::stderr(), "{}", line);
            }
            LogSink::Buffer(buf) => buf.push(line.to_string()),
        }
    }
}

lazy_static::lazy_static! {
    pub static ref SINK: Mutex<LogSink> = Mutex::new(LogSink::Stderr);
}

/// Switch to an in-memory sink, returning whatever was captured so far
/// (used by tests that want a clean buffer).
pub fn capture() {
    *SINK.lock() = LogSink::Buffer(Vec::new());
}

/// Drain the current buffer (empty if the sink is `Stderr`).
pub fn drain() -> Vec<String> {
    let mut sink = SINK.lock();
    match &mut *sink {
        LogSink::Buffer(buf) => std::mem::take(buf),
        LogSink::Stderr => Vec::new(),
    }
}

#[doc(hidden)]
pub fn _emit(args: std::fmt::Arguments) {
    SINK.lock().write_line(&args.to_string());
}

/// Informational line, e.g. `device_log!("[QUEUE] pushed cmd={:#x}", cmd)`.
#[macro_export]
macro_rules! device_log {
    ($($arg:tt)*) => {
        $crate::log::_emit(format_args!($($arg)*))
    };
}

/// Warning line — same sink, just a visual `[WARN]` tag convention at call sites.
#[macro_export]
macro_rules! device_warn {
    ($($arg:tt)*) => {
        $crate::log::_emit(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_collects_lines() {
        capture();
        device_log!("[TEST] hello {}", 42);
        let lines = drain();
        assert_eq!(lines, vec!["[TEST] hello 42".to_string()]);
        // draining again yields nothing new
        assert!(drain().is_empty());
    }
}
