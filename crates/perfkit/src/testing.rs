// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test doubles for code that depends on this crate.

use crate::metrics::{SystemProbe, SystemStats};

/// A [`SystemProbe`] that always reports the same readings.
///
/// # Examples
///
/// ```
/// use perfkit::metrics::{SystemProbe, SystemStats};
/// use perfkit::testing::FixedProbe;
///
/// let probe = FixedProbe::new(SystemStats {
///     cpu_percent: 5.0,
///     memory_percent: 40.0,
///     disk_percent: 70.0,
/// });
///
/// assert_eq!(probe.sample().memory_percent, 40.0);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FixedProbe {
    stats: SystemStats,
}

impl FixedProbe {
    /// Creates a probe reporting `stats`.
    #[must_use]
    pub fn new(stats: SystemStats) -> Self {
        Self { stats }
    }
}

impl SystemProbe for FixedProbe {
    fn sample(&self) -> SystemStats {
        self.stats
    }
}

#[cfg(test)]
pub(crate) use log_capture::LogCapture;

#[cfg(test)]
mod log_capture {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    /// Captures formatted log output for assertions.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct LogCapture {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl LogCapture {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn output(&self) -> String {
            String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
        }

        pub fn assert_contains(&self, expected: &str) {
            let output = self.output();
            assert!(
                output.contains(expected),
                "log output does not contain '{expected}', got:\n{output}"
            );
        }

        /// A subscriber writing into this capture. Use with `set_default()`.
        #[must_use]
        pub fn subscriber(&self) -> impl tracing::Subscriber {
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

    pub(crate) struct LogCaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for LogCaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
