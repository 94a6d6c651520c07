// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Paced, batched streaming of line-oriented output.
//!
//! A [`UnitSource`] describes where lines come from: complete text, the tail of a log file,
//! a running subprocess, or any stream of lines. A [`BatchEmitter`] turns it into a stream
//! of [`StreamChunk`]s of fixed size with a pause between consecutive chunks, so a slow
//! transport is not flooded and other tasks get a chance to run.
//!
//! Source failures never surface as errors on the stream. The emitter instead produces one
//! final chunk holding a single descriptive line (see [`StreamChunk::is_error`]) and ends,
//! which keeps the transport intact once a response has started.

mod emitter;
mod source;

pub use emitter::{BatchEmitter, EmitterOptions, StreamChunk};
pub use source::UnitSource;

/// Most units buffered up front for one chunk or tail; larger requests grow as units arrive.
const PREALLOCATED_UNITS: usize = 1024;
