//! Launcher seam for external agent sessions.
//!
//! The pool never talks to processes directly: it asks a [`SessionLauncher`]
//! for a new session and drives it through the [`AgentSession`] handle.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::LaunchError;

/// A live external agent session.
///
/// Handles are shared (`Arc`) between the pool and the caller that claimed
/// them, so every method takes `&self`.
#[async_trait]
pub trait AgentSession: Send + Sync + 'static {
    /// Session id reported by the agent itself, if any.
    fn external_id(&self) -> Option<String>;

    /// OS process id, if the session is backed by a local process.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Send a prompt to the agent.
    async fn send(&self, prompt: &str) -> Result<(), LaunchError>;

    /// Read streamed output until the current turn completes.
    async fn read_output(&self) -> Result<String, LaunchError>;

    /// Bring a released session back to a clean, ready state.
    async fn reset(&self) -> Result<(), LaunchError> {
        Ok(())
    }

    /// Interrupt the turn in progress. Only meaningful when the launcher
    /// reports [`SessionLauncher::cancellable`].
    async fn cancel(&self) -> Result<(), LaunchError> {
        Err(LaunchError::Unsupported("cancel"))
    }

    /// Tear the session down. Must be idempotent.
    async fn terminate(&self);
}

/// Starts new agent sessions.
#[async_trait]
pub trait SessionLauncher: Send + Sync + 'static {
    /// Whether in-flight work on a session can be interrupted.
    fn cancellable(&self) -> bool {
        false
    }

    /// Start a session and wait until it is usable.
    async fn launch(&self) -> Result<Arc<dyn AgentSession>, LaunchError>;
}
