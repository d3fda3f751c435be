//! Session launcher backends.

pub mod memory;
pub mod process;

pub use memory::{InMemoryLauncher, InMemorySession};
pub use process::{ProcessLauncher, ProcessLauncherConfig, PromptFormat};
