//! Worker pool: bounded-concurrency job execution.

mod pool;

pub use pool::{WorkerContext, WorkerPool};
