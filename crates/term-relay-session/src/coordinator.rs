//! Per-session lifecycle orchestration.
//!
//! One lifecycle task per session: register unbound, wait (bounded)
//! for the binder to attach the client's connection, hand the stream
//! to the launcher, then deliver the close code and drop the session
//! from the registry. A session that is never bound is removed when
//! the wait expires; nothing leaks across repeated sessions.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use term_relay_core::{ExecError, RemoteExecutor, TerminalIo};
use term_relay_exec::{launch, ShellPolicy};

use crate::{
    registry::{RegistryError, SessionRegistry},
    terminal::{SessionState, TerminalSession},
};

/// Close status delivered on normal process exit.
pub const STATUS_NORMAL: u16 = 1;
/// Close status delivered when the session ends in an error.
pub const STATUS_ERROR: u16 = 2;

const REASON_EXITED: &str = "Process exited";

/// Lifecycle error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session already started: {0}")]
    AlreadyStarted(String),
    #[error("Client did not bind within {0:?}")]
    BindTimeout(Duration),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Shell allow-list, probe order significant.
    pub shells: ShellPolicy,
    /// How long to wait for the client to bind before the session is
    /// abandoned and removed.
    pub bind_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shells: ShellPolicy::default(),
            bind_timeout: Duration::from_secs(60),
        }
    }
}

/// Orchestrates session lifecycles over a shared registry and executor.
pub struct Coordinator {
    registry: Arc<SessionRegistry>,
    executor: Arc<dyn RemoteExecutor>,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Create a coordinator with the default configuration.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self::with_config(registry, executor, CoordinatorConfig::default())
    }

    /// Create a coordinator with an explicit configuration.
    #[must_use]
    pub fn with_config(
        registry: Arc<SessionRegistry>,
        executor: Arc<dyn RemoteExecutor>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            config,
        }
    }

    /// The shared registry (for wiring the binder endpoint).
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Allocate an id and register an empty, unbound session under it.
    ///
    /// This is the synchronous half of the request-handler contract:
    /// the id goes back to the caller, who separately spawns
    /// [`Coordinator::run`] for the same id.
    ///
    /// # Errors
    /// Fails only on an id collision, which callers may treat as
    /// unreachable in practice.
    pub fn create_session(&self) -> Result<String, RegistryError> {
        let id = self.registry.allocate();
        let session = TerminalSession::new(id.clone());
        self.registry.register(Arc::clone(&session))?;
        session.set_state(SessionState::WaitingForBind);
        tracing::debug!(session = %id, "Registered unbound session");
        Ok(id)
    }

    /// Drive one session to completion.
    ///
    /// Waits for the binder to attach the client's connection, runs the
    /// launcher against the bound stream, closes the connection with
    /// status `1`/"Process exited" on success or `2`/error text on
    /// failure, and removes the session from the registry.
    ///
    /// # Errors
    /// Returns the terminal error of the session, after cleanup.
    pub async fn run(
        &self,
        session_id: &str,
        requested_shell: Option<&str>,
    ) -> Result<(), SessionError> {
        let session = self
            .registry
            .lookup(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_owned()))?;
        let Some(bound) = session.take_bound_signal() else {
            return Err(SessionError::AlreadyStarted(session_id.to_owned()));
        };

        match tokio::time::timeout(self.config.bind_timeout, bound).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(session = %session_id, "Client never bound; removing session");
                self.registry.remove(session_id);
                session.set_state(SessionState::Closed);
                return Err(SessionError::BindTimeout(self.config.bind_timeout));
            }
        }
        debug_assert!(session.is_bound());
        session.set_state(SessionState::Bound);

        session.set_state(SessionState::Running);
        let io: Arc<dyn TerminalIo> = session.clone();
        let result = launch(
            self.executor.as_ref(),
            &self.config.shells,
            requested_shell,
            io,
        )
        .await;

        match &result {
            Ok(()) => session.close(STATUS_NORMAL, REASON_EXITED).await,
            Err(err) => session.close(STATUS_ERROR, &err.to_string()).await,
        }
        session.set_state(SessionState::Closed);
        self.registry.remove(session_id);
        tracing::debug!(session = %session_id, ok = result.is_ok(), "Session closed");

        result.map_err(SessionError::from)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use term_relay_core::{memory, Connection, StreamError, TerminalMessage};

    use super::*;

    /// Echo-style executor: reads one stdin chunk, writes a canned
    /// reply, exits. Records the commands it was asked to run.
    #[derive(Default)]
    struct OneShotExecutor {
        commands: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl RemoteExecutor for OneShotExecutor {
        async fn stream(
            &self,
            command: &[String],
            io: Arc<dyn TerminalIo>,
        ) -> Result<(), ExecError> {
            self.commands.lock().unwrap().push(command.to_vec());
            let mut buf = [0u8; 64];
            loop {
                let n = io.read(&mut buf).await.map_err(ExecError::from)?;
                if n > 0 {
                    io.write(b"file.txt\n").await.map_err(ExecError::from)?;
                    return Ok(());
                }
            }
        }
    }

    fn coordinator_with(
        executor: Arc<dyn RemoteExecutor>,
        bind_timeout: Duration,
    ) -> Coordinator {
        Coordinator::with_config(
            Arc::new(SessionRegistry::new()),
            executor,
            CoordinatorConfig {
                bind_timeout,
                ..CoordinatorConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn session_runs_to_normal_close() {
        let executor = Arc::new(OneShotExecutor::default());
        let coordinator = Arc::new(coordinator_with(
            executor.clone(),
            Duration::from_secs(5),
        ));
        let id = coordinator.create_session().unwrap();

        let session = coordinator.registry().lookup(&id).unwrap();
        assert_eq!(session.state(), SessionState::WaitingForBind);

        let runner = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            async move { coordinator.run(&id, Some("sh")).await }
        });

        let (client, server) = memory::pair();
        session.attach(Arc::new(server)).unwrap();

        client
            .send(TerminalMessage::stdin("ls\n").encode().unwrap())
            .await
            .unwrap();

        let frame = TerminalMessage::decode(&client.recv().await.unwrap()).unwrap();
        assert_eq!(frame.data, "file.txt\n");

        runner.await.unwrap().unwrap();
        assert_eq!(client.peer_close(), Some((STATUS_NORMAL, "Process exited".to_owned())));
        assert!(coordinator.registry().lookup(&id).is_none());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(*executor.commands.lock().unwrap(), vec![vec!["sh".to_owned()]]);
    }

    #[tokio::test]
    async fn executor_error_closes_with_error_status() {
        struct FailingExecutor;

        #[async_trait]
        impl RemoteExecutor for FailingExecutor {
            async fn stream(
                &self,
                _command: &[String],
                _io: Arc<dyn TerminalIo>,
            ) -> Result<(), ExecError> {
                Err(ExecError::Io(std::io::Error::other("container went away")))
            }
        }

        let coordinator = Arc::new(coordinator_with(
            Arc::new(FailingExecutor),
            Duration::from_secs(5),
        ));
        let id = coordinator.create_session().unwrap();
        let session = coordinator.registry().lookup(&id).unwrap();

        let runner = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            async move { coordinator.run(&id, Some("sh")).await }
        });

        let (client, server) = memory::pair();
        session.attach(Arc::new(server)).unwrap();

        assert!(runner.await.unwrap().is_err());
        let (code, reason) = client.peer_close().unwrap();
        assert_eq!(code, STATUS_ERROR);
        assert!(reason.contains("container went away"));
        assert!(coordinator.registry().lookup(&id).is_none());
    }

    #[tokio::test]
    async fn bind_timeout_removes_the_orphaned_session() {
        let coordinator = coordinator_with(
            Arc::new(OneShotExecutor::default()),
            Duration::from_millis(20),
        );
        let id = coordinator.create_session().unwrap();

        let err = coordinator.run(&id, None).await.unwrap_err();
        assert!(matches!(err, SessionError::BindTimeout(_)));
        assert!(coordinator.registry().lookup(&id).is_none());
    }

    #[tokio::test]
    async fn run_rejects_unknown_and_restarted_sessions() {
        let coordinator = coordinator_with(
            Arc::new(OneShotExecutor::default()),
            Duration::from_millis(20),
        );
        assert!(matches!(
            coordinator.run("doesnotexist", None).await,
            Err(SessionError::NotFound(_))
        ));

        let id = coordinator.create_session().unwrap();
        let session = coordinator.registry().lookup(&id).unwrap();
        let _signal = session.take_bound_signal().unwrap();
        assert!(matches!(
            coordinator.run(&id, None).await,
            Err(SessionError::AlreadyStarted(_))
        ));
    }

    // Streaming never starts without a live connection: the bound
    // signal only fires from attach, which stores the connection first.
    #[tokio::test]
    async fn running_implies_bound() {
        struct StateProbe;

        #[async_trait]
        impl RemoteExecutor for StateProbe {
            async fn stream(
                &self,
                _command: &[String],
                io: Arc<dyn TerminalIo>,
            ) -> Result<(), ExecError> {
                // The stream is usable immediately; a write on an
                // unbound session would fail with a closed transport.
                io.write(b"ready").await.map_err(ExecError::from)?;
                Ok(())
            }
        }

        let coordinator = Arc::new(coordinator_with(Arc::new(StateProbe), Duration::from_secs(5)));
        let id = coordinator.create_session().unwrap();
        let session = coordinator.registry().lookup(&id).unwrap();

        let runner = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            let id = id.clone();
            async move { coordinator.run(&id, Some("sh")).await }
        });

        let (client, server) = memory::pair();
        session.attach(Arc::new(server)).unwrap();

        let frame = TerminalMessage::decode(&client.recv().await.unwrap()).unwrap();
        assert_eq!(frame.data, "ready");
        runner.await.unwrap().unwrap();
    }
}
