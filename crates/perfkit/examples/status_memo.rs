// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serving a status endpoint through the performance core.
//!
//! The status snapshot is computed at most once per time-to-live, every request is timed,
//! and the pool caps how many requests run at once.

use std::convert::Infallible;
use std::error::Error;

use perfkit::config::PerfConfig;
use perfkit::core::PerfCore;
use serde_json::{Value, json};
use tick::Clock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let config = PerfConfig::from_json_str(r#"{ "cache": { "status_cache_ttl": 5.0 }, "pool": { "max_connections": 2 } }"#)?;
    let core = PerfCore::init(config, Clock::new_tokio())?;

    let recorder = core.recorder().clone();
    let status = core.memoize_status("get_status").wrap(move |(): ()| {
        let system = recorder.system();
        Ok::<Value, Infallible>(json!({
            "status": "running",
            "cpu_percent": system.cpu_percent,
            "memory_percent": system.memory_percent,
        }))
    });

    for request in 0..3 {
        let response = core
            .pool()
            .run(core.recorder().time_async("get_status", async { status.call(()) }))
            .await??;
        println!("request {request}: {response}");
    }

    println!("{}", serde_json::to_string_pretty(&core.stats())?);
    core.shutdown();
    Ok(())
}
