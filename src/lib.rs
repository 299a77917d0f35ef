// protomon library crate
// Exposes modules for the binary and integration tests

pub mod alerts;
pub mod cli;
pub mod commands;
pub mod config;
pub mod ingest;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod storage;
pub mod utils;
