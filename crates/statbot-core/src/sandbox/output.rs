//! Bounded capture of a candidate program's stdout and stderr.

use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    stdout: String,
    stderr: String,
    stdout_chars: usize,
    stderr_chars: usize,
    max_chars: usize,
    stdout_truncated: bool,
}

/// Shared sink the interpreter's replacement stdout/stderr write into.
///
/// Stdout is capped at exactly `max_chars` characters; further writes are
/// dropped, and the truncation flag is set once a dropped character is not
/// whitespace. Losing only trailing whitespace, such as the newline `print`
/// appends after a payload of exactly `max_chars` characters, does not count
/// as truncation. Stderr gets the same cap so a pathological program cannot
/// grow the buffer without bound.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Inner>>,
}

impl OutputBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                max_chars,
                ..Default::default()
            })),
        }
    }

    pub fn write_stdout(&self, text: &str) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let max = inner.max_chars;
        for ch in text.chars() {
            if inner.stdout_chars >= max {
                if !ch.is_whitespace() {
                    inner.stdout_truncated = true;
                }
                continue;
            }
            inner.stdout.push(ch);
            inner.stdout_chars += 1;
        }
    }

    pub fn write_stderr(&self, text: &str) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let max = inner.max_chars;
        for ch in text.chars() {
            if inner.stderr_chars >= max {
                break;
            }
            inner.stderr.push(ch);
            inner.stderr_chars += 1;
        }
    }

    /// Returns `(stdout, stderr, stdout_truncated)`.
    pub fn snapshot(&self) -> (String, String, bool) {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        (
            inner.stdout.clone(),
            inner.stderr.clone(),
            inner.stdout_truncated,
        )
    }
}
