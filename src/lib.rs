#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod provision;
pub mod readiness;
pub mod registry;
pub mod server;

#[cfg(test)]
mod test_support;
