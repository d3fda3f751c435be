//! Infrastructure adapters for launching agent sessions.

pub mod launcher;

pub use launcher::{InMemoryLauncher, ProcessLauncher, ProcessLauncherConfig, PromptFormat};
