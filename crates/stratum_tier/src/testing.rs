// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test utilities for asserting on cache log output.

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use tracing_subscriber::fmt::MakeWriter;

/// Captures formatted log output into a shared buffer.
///
/// Install the subscriber with [`tracing::subscriber::set_default`] to capture
/// events emitted on the current thread.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Creates an empty capture buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the captured log output as a string.
    #[must_use]
    pub fn output(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Asserts that the captured log output contains the given string.
    ///
    /// # Panics
    ///
    /// Panics if `expected` was not logged.
    #[expect(clippy::panic, reason = "test helper")]
    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        if !output.contains(expected) {
            panic!("log output does not contain '{expected}', got:\n{output}");
        }
    }

    /// Asserts that the captured log output does not contain the given string.
    ///
    /// # Panics
    ///
    /// Panics if `unexpected` was logged.
    #[expect(clippy::panic, reason = "test helper")]
    pub fn assert_not_contains(&self, unexpected: &str) {
        let output = self.output();
        if output.contains(unexpected) {
            panic!("log output unexpectedly contains '{unexpected}', got:\n{output}");
        }
    }

    /// Creates a `tracing` subscriber that writes every level to this buffer.
    #[must_use]
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        use tracing_subscriber::layer::SubscriberExt;

        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// Writer that appends to a [`LogCapture`] buffer.
#[derive(Debug)]
pub struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
