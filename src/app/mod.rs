pub mod adb;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod state;

#[cfg(test)]
mod test_support;
