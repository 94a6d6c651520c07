// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;

use super::PREALLOCATED_UNITS;
use crate::error::SourceUnavailableError;

pub(crate) type UnitStream = BoxStream<'static, Result<String, SourceUnavailableError>>;

/// An ordered sequence of text units (lines) to be streamed in batches.
///
/// Units never contain line terminators. Sources are opened lazily, when the emitter first
/// polls them, and are closed when the emitted stream is dropped.
pub struct UnitSource {
    kind: SourceKind,
}

enum SourceKind {
    Lines(Vec<String>),
    LogTail { path: PathBuf, lines: usize },
    Command(Command),
    Stream(BoxStream<'static, String>),
}

impl UnitSource {
    /// Already complete text, split into lines.
    ///
    /// Both `\n` and `\r\n` end a line and are dropped, as is a final terminator, so
    /// rendered chunks always use `\n`.
    #[must_use]
    pub fn text(text: impl AsRef<str>) -> Self {
        Self::lines(text.as_ref().lines())
    }

    /// Pre-split lines.
    #[must_use]
    pub fn lines<I>(lines: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            kind: SourceKind::Lines(lines.into_iter().map(Into::into).collect()),
        }
    }

    /// The last `lines` lines of a log file.
    #[must_use]
    pub fn log_tail(path: impl Into<PathBuf>, lines: usize) -> Self {
        Self {
            kind: SourceKind::LogTail { path: path.into(), lines },
        }
    }

    /// The output of a subprocess.
    ///
    /// The process is spawned when the stream is first polled. Standard output and standard
    /// error lines are merged in the order they arrive. The process is killed if the stream
    /// is dropped before it exits.
    #[must_use]
    pub fn command(command: Command) -> Self {
        Self {
            kind: SourceKind::Command(command),
        }
    }

    /// Any stream of lines.
    #[must_use]
    pub fn stream<S>(lines: S) -> Self
    where
        S: Stream<Item = String> + Send + 'static,
    {
        Self {
            kind: SourceKind::Stream(lines.boxed()),
        }
    }

    pub(crate) fn into_units(self) -> UnitStream {
        match self.kind {
            SourceKind::Lines(lines) => stream::iter(lines.into_iter().map(Ok)).boxed(),
            SourceKind::Stream(lines) => lines.map(Ok).boxed(),
            SourceKind::LogTail { path, lines } => stream::once(read_tail(path, lines))
                .flat_map(|result| match result {
                    Ok(tail) => stream::iter(tail.into_iter().map(Ok)).left_stream(),
                    Err(error) => stream::iter([Err(error)]).right_stream(),
                })
                .boxed(),
            SourceKind::Command(command) => stream::once(async move { spawn_lines(command) }).flatten().boxed(),
        }
    }
}

impl Debug for UnitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SourceKind::Lines(lines) => f.debug_struct("UnitSource::Lines").field("len", &lines.len()).finish(),
            SourceKind::LogTail { path, lines } => f
                .debug_struct("UnitSource::LogTail")
                .field("path", path)
                .field("lines", lines)
                .finish(),
            SourceKind::Command(command) => f.debug_tuple("UnitSource::Command").field(command.as_std()).finish(),
            SourceKind::Stream(_) => f.debug_struct("UnitSource::Stream").finish_non_exhaustive(),
        }
    }
}

async fn read_tail(path: PathBuf, lines: usize) -> Result<Vec<String>, SourceUnavailableError> {
    let display = path.display().to_string();

    let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SourceUnavailableError::log_not_found(&display),
        _ => SourceUnavailableError::read_failed(&display, &e),
    })?;

    let mut reader = BufReader::new(file).lines();
    let mut tail = VecDeque::with_capacity(lines.min(PREALLOCATED_UNITS));

    while let Some(line) = reader
        .next_line()
        .await
        .map_err(|e| SourceUnavailableError::read_failed(&display, &e))?
    {
        if tail.len() == lines {
            tail.pop_front();
        }
        if lines > 0 {
            tail.push_back(line);
        }
    }

    Ok(tail.into())
}

fn spawn_lines(mut command: Command) -> UnitStream {
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return failed(SourceUnavailableError::command_failed(program, &e)),
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let e = io::Error::other("output pipes were not captured");
        return failed(SourceUnavailableError::command_failed(program, &e));
    };

    let merged = tokio_stream::StreamExt::merge(
        LinesStream::new(BufReader::new(stdout).lines()),
        LinesStream::new(BufReader::new(stderr).lines()),
    );

    let source_name = program.clone();
    let lines = merged.map(move |line| line.map_err(|e| SourceUnavailableError::read_failed(&source_name, &e)));

    // The child lives in the trailing future so dropping the stream early kills it.
    let exit = stream::once(async move {
        match child.wait().await {
            Ok(status) => tracing::debug!(program = %program, %status, "command exited"),
            Err(e) => tracing::warn!(program = %program, error = %e, "failed to wait for command"),
        }
        None
    })
    .filter_map(futures::future::ready);

    lines.chain(exit).boxed()
}

fn failed(error: SourceUnavailableError) -> UnitStream {
    stream::iter([Err(error)]).boxed()
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use futures::executor::block_on;
    use ohno::ErrorExt;

    use super::*;

    fn collect(source: UnitSource) -> Vec<Result<String, String>> {
        block_on(source.into_units().map(|unit| unit.map_err(|e| e.message())).collect())
    }

    #[test]
    fn text_splits_lines_without_terminators() {
        let units = collect(UnitSource::text("one\r\ntwo\nthree\n"));

        assert_eq!(units, vec![Ok("one".into()), Ok("two".into()), Ok("three".into())]);
    }

    #[test]
    fn stream_source_passes_through() {
        let units = collect(UnitSource::stream(stream::iter(["a".to_string(), "b".to_string()])));

        assert_eq!(units, vec![Ok("a".into()), Ok("b".into())]);
    }

    #[tokio::test]
    async fn log_tail_keeps_last_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 1..=20 {
            writeln!(file, "line {i}").unwrap();
        }

        let units: Vec<_> = UnitSource::log_tail(file.path(), 3).into_units().collect().await;
        let units: Vec<String> = units.into_iter().map(Result::unwrap).collect();

        assert_eq!(units, vec!["line 18", "line 19", "line 20"]);
    }

    #[tokio::test]
    async fn log_tail_of_short_file_returns_everything() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "only").unwrap();

        let units: Vec<_> = UnitSource::log_tail(file.path(), 100).into_units().collect().await;

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].as_deref().unwrap(), "only");
    }

    #[tokio::test]
    async fn unbounded_log_tail_reads_whole_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file, "second").unwrap();

        let units: Vec<_> = UnitSource::log_tail(file.path(), usize::MAX).into_units().collect().await;
        let units: Vec<String> = units.into_iter().map(Result::unwrap).collect();

        assert_eq!(units, ["first", "second"]);
    }

    #[tokio::test]
    async fn missing_log_yields_single_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.log");

        let units: Vec<_> = UnitSource::log_tail(&path, 10).into_units().collect().await;

        assert_eq!(units.len(), 1);
        let message = units[0].as_ref().unwrap_err().message();
        assert_eq!(message, format!("log file not found: {}", path.display()));
    }

    #[tokio::test]
    async fn unknown_program_yields_single_error() {
        let command = Command::new("perfkit-test-program-that-does-not-exist");

        let units: Vec<_> = UnitSource::command(command).into_units().collect().await;

        assert_eq!(units.len(), 1);
        let message = units[0].as_ref().unwrap_err().message();
        assert!(message.starts_with("command failed: "), "got: {message}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_merges_stdout_and_stderr() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out; echo err 1>&2");

        let units: Vec<_> = UnitSource::command(command).into_units().collect().await;
        let mut units: Vec<String> = units.into_iter().map(Result::unwrap).collect();
        units.sort();

        assert_eq!(units, vec!["err", "out"]);
    }

    #[test]
    fn debug_describes_source() {
        let debug = format!("{:?}", UnitSource::log_tail("service.log", 5));

        assert!(debug.contains("LogTail"), "got: {debug}");
        assert!(debug.contains("service.log"), "got: {debug}");
    }
}
