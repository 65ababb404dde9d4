// SPDX-License-Identifier: Apache-2.0

//! Process lifecycle: how the agent is hosted and told to stop.
//!
//! Run from a terminal, the process stops on SIGINT/SIGTERM (Ctrl-C on
//! Windows). Run by the Windows service manager, Stop and Shutdown requests
//! do the same. Either way the agent only ever sees a cancelled token.

mod interactive;
#[cfg(windows)]
mod windows;

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::init::BoxError;

pub use interactive::Interactive;
#[cfg(windows)]
pub use windows::WindowsService;

/// Name the agent is registered under with the service manager
pub const SERVICE_NAME: &str = "logharvest";
pub const SERVICE_DESCRIPTION: &str = "Tails log files and ships their lines as events";

pub type AgentFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// Entry point of the hosted agent; it must return once the token is cancelled.
pub type AgentMain = Box<dyn FnOnce(CancellationToken) -> AgentFuture + Send>;

pub trait ProcessLifecycle {
    fn name(&self) -> &'static str;

    /// Run `agent` to completion, cancelling its token when the platform asks
    /// the process to stop.
    fn run(self: Box<Self>, agent: AgentMain) -> Result<(), BoxError>;
}

/// Pick the lifecycle for this process.
pub fn select_lifecycle() -> Box<dyn ProcessLifecycle> {
    #[cfg(windows)]
    {
        Box::new(WindowsService::new(SERVICE_NAME))
    }
    #[cfg(not(windows))]
    {
        Box::new(Interactive)
    }
}

/// Register the current executable as an OS service. No-op outside Windows.
pub fn install_service(name: &str, description: &str) -> Result<(), BoxError> {
    #[cfg(windows)]
    {
        windows::install(name, description)
    }
    #[cfg(not(windows))]
    {
        tracing::debug!(name, description, "Service installation is only supported on Windows");
        Ok(())
    }
}

/// Remove a service registered by `install_service`. No-op outside Windows.
pub fn uninstall_service(name: &str) -> Result<(), BoxError> {
    #[cfg(windows)]
    {
        windows::uninstall(name)
    }
    #[cfg(not(windows))]
    {
        tracing::debug!(name, "Service removal is only supported on Windows");
        Ok(())
    }
}

/// Runtime shared by both lifecycles.
fn build_runtime() -> Result<tokio::runtime::Runtime, BoxError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(windows))]
    #[test]
    fn test_service_commands_are_noops() {
        assert!(install_service(SERVICE_NAME, SERVICE_DESCRIPTION).is_ok());
        assert!(uninstall_service(SERVICE_NAME).is_ok());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_selects_interactive() {
        assert_eq!(select_lifecycle().name(), "interactive");
    }

    #[test]
    fn test_agent_result_is_returned() {
        let agent: AgentMain = Box::new(|_stop: CancellationToken| -> AgentFuture {
            Box::pin(async { Err::<(), BoxError>("agent failed".into()) })
        });
        let err = Box::new(Interactive).run(agent).unwrap_err();
        assert_eq!(err.to_string(), "agent failed");
    }
}
