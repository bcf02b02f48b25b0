#![forbid(unsafe_code)]

pub mod classify;
pub mod cli;
pub mod dataset;
pub mod fetch;
pub mod formats;
pub mod gemini;
pub mod logging;
pub mod organize;
pub mod pipeline;
pub mod retry;
pub mod storage;
pub mod taxonomy;
pub mod workspace;
