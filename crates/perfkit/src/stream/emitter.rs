// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::pin;
use std::time::Duration;

use futures::future::{self, Either};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use ohno::ErrorExt;
use tick::{Clock, Stopwatch};

use super::PREALLOCATED_UNITS;
use super::source::{UnitSource, UnitStream};
use crate::config::StreamingConfig;
use crate::error::{ConfigurationError, SourceUnavailableError};

/// One emitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    sequence: usize,
    units: Vec<String>,
    error: bool,
}

impl StreamChunk {
    fn batch(sequence: usize, units: Vec<String>) -> Self {
        Self {
            sequence,
            units,
            error: false,
        }
    }

    fn failure(sequence: usize, error: &SourceUnavailableError) -> Self {
        Self {
            sequence,
            units: vec![error.message()],
            error: true,
        }
    }

    /// Zero-based position of the chunk in its stream.
    #[must_use]
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// The units of the chunk, in source order.
    #[must_use]
    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Consumes the chunk, returning its units.
    #[must_use]
    pub fn into_units(self) -> Vec<String> {
        self.units
    }

    /// Number of units in the chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the chunk has no units. Emitted chunks always carry at least one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Whether this chunk is the single descriptive error unit that ends a failed stream.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// The chunk as text, with a newline after every unit, including the last.
    ///
    /// Sources drop the original terminators, so `\r\n` input renders with `\n`.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = String::with_capacity(self.units.iter().map(|unit| unit.len() + 1).sum());
        for unit in &self.units {
            text.push_str(unit);
            text.push('\n');
        }
        text
    }
}

/// Batch size and pacing of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterOptions {
    batch_size: usize,
    delay: Duration,
    max_duration: Duration,
}

impl EmitterOptions {
    /// Options emitting `batch_size` units per chunk with the default pacing.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when `batch_size` is zero.
    pub fn new(batch_size: usize) -> Result<Self, ConfigurationError> {
        if batch_size == 0 {
            return Err(ConfigurationError::must_be_positive("streaming.batch_size"));
        }

        let defaults = StreamingConfig::default();
        Ok(Self {
            batch_size,
            delay: defaults.streaming_delay,
            max_duration: defaults.max_streaming_time,
        })
    }

    /// Options for log tails, taken from the streaming configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the log batch size is zero.
    pub fn for_logs(config: &StreamingConfig) -> Result<Self, ConfigurationError> {
        if config.log_batch_size == 0 {
            return Err(ConfigurationError::must_be_positive("streaming.log_batch_size"));
        }
        Ok(Self::from_config(config.log_batch_size, config))
    }

    /// Options for command output, taken from the streaming configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the command batch size is zero.
    pub fn for_commands(config: &StreamingConfig) -> Result<Self, ConfigurationError> {
        if config.command_batch_size == 0 {
            return Err(ConfigurationError::must_be_positive("streaming.command_batch_size"));
        }
        Ok(Self::from_config(config.command_batch_size, config))
    }

    fn from_config(batch_size: usize, config: &StreamingConfig) -> Self {
        Self {
            batch_size,
            delay: config.streaming_delay,
            max_duration: config.max_streaming_time,
        }
    }

    /// Sets the pause between consecutive chunks.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the ceiling on the total duration of a stream.
    #[must_use]
    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Units per chunk.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Pause between consecutive chunks.
    #[must_use]
    pub fn pacing(&self) -> Duration {
        self.delay
    }

    /// Ceiling on the total duration of a stream.
    #[must_use]
    pub fn max_streaming_time(&self) -> Duration {
        self.max_duration
    }
}

/// Turns a [`UnitSource`] into a paced stream of [`StreamChunk`]s.
///
/// Every chunk except the last holds exactly `batch_size` units. The emitter pauses for the
/// configured delay before every chunk but the first. The stream ends when:
///
/// - the source is exhausted,
/// - the source fails, after one final chunk holding a single descriptive error unit, or
/// - the maximum streaming duration elapses; units collected so far are emitted first.
///
/// Dropping the stream closes the source.
///
/// # Examples
///
/// ```
/// use futures::StreamExt;
/// use perfkit::stream::{BatchEmitter, EmitterOptions, UnitSource};
/// use tick::Clock;
///
/// # async fn example(clock: Clock) -> Result<(), perfkit::error::ConfigurationError> {
/// let emitter = BatchEmitter::new(EmitterOptions::new(2)?, clock);
/// let chunks: Vec<_> = emitter.emit(UnitSource::text("a\nb\nc\n")).collect().await;
///
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].render(), "a\nb\n");
/// assert_eq!(chunks[1].render(), "c\n");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BatchEmitter {
    options: EmitterOptions,
    clock: Clock,
}

impl BatchEmitter {
    /// Creates an emitter.
    #[must_use]
    pub fn new(options: EmitterOptions, clock: Clock) -> Self {
        Self { options, clock }
    }

    /// Creates an emitter for log tails.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the log batch size is zero.
    pub fn for_logs(config: &StreamingConfig, clock: Clock) -> Result<Self, ConfigurationError> {
        Ok(Self::new(EmitterOptions::for_logs(config)?, clock))
    }

    /// Creates an emitter for command output.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the command batch size is zero.
    pub fn for_commands(config: &StreamingConfig, clock: Clock) -> Result<Self, ConfigurationError> {
        Ok(Self::new(EmitterOptions::for_commands(config)?, clock))
    }

    /// The emitter options.
    #[must_use]
    pub fn options(&self) -> &EmitterOptions {
        &self.options
    }

    /// Streams `source` in paced batches.
    pub fn emit(&self, source: UnitSource) -> BoxStream<'static, StreamChunk> {
        let state = EmitState {
            units: source.into_units(),
            options: self.options,
            stopwatch: self.clock.stopwatch(),
            clock: self.clock.clone(),
            sequence: 0,
            pending_error: None,
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            let chunk = state.next_chunk().await?;
            Some((chunk, state))
        })
        .boxed()
    }
}

struct EmitState {
    units: UnitStream,
    options: EmitterOptions,
    stopwatch: Stopwatch,
    clock: Clock,
    sequence: usize,
    pending_error: Option<SourceUnavailableError>,
    done: bool,
}

enum Next {
    Unit(String),
    Failed(SourceUnavailableError),
    Exhausted,
    Expired,
}

impl EmitState {
    #[cfg_attr(test, mutants::skip)] // some mutations never finish
    async fn next_chunk(&mut self) -> Option<StreamChunk> {
        if self.done {
            return None;
        }

        if self.sequence > 0 {
            self.clock.delay(self.options.delay).await;
        }

        // A failure already read from the source is reported even past the deadline.
        if let Some(error) = self.pending_error.take() {
            return Some(self.fail(&error));
        }

        if self.expired() {
            return None;
        }

        let mut batch = Vec::with_capacity(self.options.batch_size.min(PREALLOCATED_UNITS));
        while batch.len() < self.options.batch_size {
            match self.next_unit().await {
                Next::Unit(unit) => batch.push(unit),
                Next::Failed(error) if batch.is_empty() => return Some(self.fail(&error)),
                Next::Failed(error) => {
                    self.pending_error = Some(error);
                    break;
                }
                Next::Exhausted => {
                    self.done = true;
                    tracing::debug!(chunks = self.sequence + usize::from(!batch.is_empty()), "stream completed");
                    break;
                }
                Next::Expired => {
                    self.abort();
                    break;
                }
            }
        }

        if batch.is_empty() {
            return None;
        }

        let chunk = StreamChunk::batch(self.sequence, batch);
        self.sequence += 1;
        Some(chunk)
    }

    async fn next_unit(&mut self) -> Next {
        let remaining = self.options.max_duration.saturating_sub(self.stopwatch.elapsed());
        let deadline = pin!(self.clock.delay(remaining));

        match future::select(self.units.next(), deadline).await {
            Either::Left((Some(Ok(unit)), _)) => Next::Unit(unit),
            Either::Left((Some(Err(error)), _)) => Next::Failed(error),
            Either::Left((None, _)) => Next::Exhausted,
            Either::Right(((), _)) => Next::Expired,
        }
    }

    fn expired(&mut self) -> bool {
        if self.stopwatch.elapsed() >= self.options.max_duration {
            self.abort();
            true
        } else {
            false
        }
    }

    fn abort(&mut self) {
        self.done = true;
        tracing::warn!(
            max_streaming_time = ?self.options.max_duration,
            chunks = self.sequence,
            "maximum streaming time exceeded, stream aborted"
        );
    }

    fn fail(&mut self, error: &SourceUnavailableError) -> StreamChunk {
        self.done = true;
        tracing::warn!(source = %error.source_name, error = %error.message(), "stream source unavailable");
        let chunk = StreamChunk::failure(self.sequence, error);
        self.sequence += 1;
        chunk
    }
}
