pub mod config;
pub mod gc;
pub mod ingest;
pub mod init;
pub mod next;
pub mod queue;
pub mod respond;
pub mod retune;
pub mod status;
pub mod threshold;
pub mod venture;
pub mod watch;

use crate::channel::ConsoleChannel;
use anyhow::Context;
use greenlight_core::engine::Engine;
use std::path::Path;

/// Open the project every command operates on, wired to the console
/// notification transport.
pub fn open_engine(root: &Path) -> anyhow::Result<Engine> {
    Engine::open(root, Box::new(ConsoleChannel)).context("failed to open greenlight project")
}
