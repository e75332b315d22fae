// src/build/mod.rs
// Background index build pipeline: worker + supervising service

pub mod protocol;
pub mod service;
pub mod worker;

pub use protocol::{WorkerCommand, WorkerEvent};
pub use service::{IndexService, IndexServiceConfig};
pub use worker::IndexBuildWorker;
