//! Shell selection and fallback.
//!
//! The client may request any shell; only allow-listed ones are run
//! directly. With no usable request, the allow-list is probed in order
//! against a container whose installed shells are unknown ahead of
//! time. Only a start failure advances the probe; once a shell has
//! started, its fate is the session's fate.

use std::sync::Arc;

use term_relay_core::{ExecError, RemoteExecutor, TerminalIo};

/// Ordered allow-list of shells the launcher may execute.
#[derive(Debug, Clone)]
pub struct ShellPolicy {
    allowed: Vec<String>,
}

impl Default for ShellPolicy {
    fn default() -> Self {
        Self::new(["bash", "sh"])
    }
}

impl ShellPolicy {
    /// Build a policy from an ordered list of shell names.
    pub fn new<I>(allowed: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `shell` may be executed directly.
    #[must_use]
    pub fn permits(&self, shell: &str) -> bool {
        self.allowed.iter().any(|allowed| allowed == shell)
    }

    /// The fallback candidates, in probe order.
    #[must_use]
    pub fn candidates(&self) -> &[String] {
        &self.allowed
    }
}

/// Run the requested shell against the terminal stream, falling back
/// across the allow-list when no usable shell was requested.
///
/// # Errors
/// The terminal error of the shell that ran, or the last start failure
/// if none could be started.
pub async fn launch(
    executor: &dyn RemoteExecutor,
    policy: &ShellPolicy,
    requested: Option<&str>,
    io: Arc<dyn TerminalIo>,
) -> Result<(), ExecError> {
    if let Some(shell) = requested.filter(|shell| policy.permits(shell)) {
        return executor.stream(&[shell.to_owned()], io).await;
    }

    if let Some(shell) = requested {
        tracing::debug!(shell, "Requested shell not in the allow-list, probing fallbacks");
    }

    let mut last_failure = None;
    for shell in policy.candidates() {
        match executor.stream(&[shell.clone()], Arc::clone(&io)).await {
            Err(err @ ExecError::StartFailed { .. }) => {
                tracing::debug!(shell, error = %err, "Shell failed to start, trying next");
                last_failure = Some(err);
            }
            outcome => return outcome,
        }
    }

    Err(last_failure.unwrap_or_else(|| ExecError::StartFailed {
        program: "shell".to_owned(),
        reason: "no shells configured in the allow-list".to_owned(),
    }))
}
