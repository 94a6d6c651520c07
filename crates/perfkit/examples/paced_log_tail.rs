// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tailing a log file and relaying command output in paced batches.

use std::error::Error;
use std::io::Write;

use futures::StreamExt;
use perfkit::config::StreamingConfig;
use perfkit::stream::{BatchEmitter, UnitSource};
use tick::Clock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();

    let clock = Clock::new_tokio();
    let config = StreamingConfig::default();

    let mut log = tempfile::NamedTempFile::new()?;
    for i in 1..=42 {
        writeln!(log, "request {i} served")?;
    }

    // The last 25 lines, 10 per chunk.
    let mut chunks = BatchEmitter::for_logs(&config, clock.clone())?.emit(UnitSource::log_tail(log.path(), 25));
    while let Some(chunk) = chunks.next().await {
        print!("-- chunk {} --\n{}", chunk.sequence(), chunk.render());
    }

    let mut command = tokio::process::Command::new("rustc");
    command.arg("--version");

    let mut chunks = BatchEmitter::for_commands(&config, clock)?.emit(UnitSource::command(command));
    while let Some(chunk) = chunks.next().await {
        if chunk.is_error() {
            eprint!("{}", chunk.render());
        } else {
            print!("{}", chunk.render());
        }
    }

    Ok(())
}
