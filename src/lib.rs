pub mod cli;
pub mod config;
pub mod observer;
pub mod orchestrator;
#[cfg(test)]
mod orchestrator_test;
pub mod peer;
pub mod sync;
pub mod watch;
