//! PTY-backed executor.
//!
//! `PtyExecutor` runs the command on a local pseudo-terminal and pumps
//! its stdin/stdout and resize events against the terminal capability
//! set. It stands in for whatever remote runtime actually hosts the
//! process; the relay only sees the `RemoteExecutor` seam.

use std::{
    fmt,
    io::{Read, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize, SlavePty};
use tokio::sync::mpsc;

use term_relay_core::{
    ExecError, RemoteExecutor, SizeSource, TermSize, TerminalIo, TerminalRead, TerminalWrite,
};

/// How long to wait for buffered output after the child exits.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Executes commands on a local PTY.
#[derive(Debug, Clone)]
pub struct PtyExecutor {
    cwd: Option<PathBuf>,
    initial_size: TermSize,
}

impl Default for PtyExecutor {
    fn default() -> Self {
        Self {
            cwd: None,
            initial_size: TermSize { rows: 24, cols: 80 },
        }
    }
}

impl PtyExecutor {
    /// Create an executor with the default 80x24 terminal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory for spawned processes.
    #[must_use]
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    /// Set the PTY size used before the first resize event arrives.
    #[must_use]
    pub const fn with_initial_size(mut self, size: TermSize) -> Self {
        self.initial_size = size;
        self
    }
}

fn start_failed(program: &str, err: &impl fmt::Display) -> ExecError {
    ExecError::StartFailed {
        program: program.to_owned(),
        reason: err.to_string(),
    }
}

/// Resolve the program on PATH so that a missing shell surfaces as a
/// start failure instead of a fork/exec ambiguity.
async fn resolve(program: &str) -> Result<PathBuf, ExecError> {
    let name = program.to_owned();
    tokio::task::spawn_blocking(move || which::which(&name))
        .await
        .map_err(std::io::Error::other)?
        .map_err(|err| start_failed(program, &err))
}

#[async_trait]
impl RemoteExecutor for PtyExecutor {
    async fn stream(&self, command: &[String], io: Arc<dyn TerminalIo>) -> Result<(), ExecError> {
        let (program, args) = command.split_first().ok_or_else(|| ExecError::StartFailed {
            program: String::new(),
            reason: "empty command".to_owned(),
        })?;
        let program_path = resolve(program).await?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.initial_size.rows,
                cols: self.initial_size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| start_failed(program, &err))?;

        let mut cmd = CommandBuilder::new(&program_path);
        cmd.args(args);
        if let Some(cwd) = &self.cwd {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| start_failed(program, &err))?;
        // The child holds the only remaining slave handle; the reader
        // sees EOF once it exits.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| start_failed(program, &err))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|err| start_failed(program, &err))?;
        let master = pair.master;

        tracing::info!(program = %program_path.display(), "Process started on PTY");

        // Process output -> terminal stream. The PTY reader is blocking,
        // so it lives on its own thread and hands chunks to an async
        // forwarder.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let reader_thread = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if out_tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        let mut output_killer = child.clone_killer();
        let io_out = Arc::clone(&io);
        let output_task = tokio::spawn(async move {
            while let Some(chunk) = out_rx.recv().await {
                if let Err(err) = io_out.write(&chunk).await {
                    tracing::debug!(error = %err, "Output stream ended, stopping process");
                    let _ = output_killer.kill();
                    break;
                }
            }
        });

        // Terminal stream -> process stdin.
        let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Bytes>();
        let writer_thread = tokio::task::spawn_blocking(move || {
            while let Some(data) = in_rx.blocking_recv() {
                if writer.write_all(&data).is_err() || writer.flush().is_err() {
                    break;
                }
            }
        });
        let mut input_killer = child.clone_killer();
        let io_in = Arc::clone(&io);
        let input_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match io_in.read(&mut buf).await {
                    // A resize frame carries no stdin bytes.
                    Ok(0) => {}
                    Ok(n) => {
                        if in_tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "Input stream ended, stopping process");
                        let _ = input_killer.kill();
                        break;
                    }
                }
            }
        });

        // Resize events -> PTY.
        let io_size = Arc::clone(&io);
        let resize_task = tokio::spawn(async move {
            while let Some(size) = io_size.next_size().await {
                let result = master.resize(PtySize {
                    rows: size.rows,
                    cols: size.cols,
                    pixel_width: 0,
                    pixel_height: 0,
                });
                if let Err(err) = result {
                    tracing::warn!(error = %err, "PTY resize failed");
                }
            }
        });

        let status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .map_err(std::io::Error::other)??;
        tracing::info!(exit = status.exit_code(), "Process exited");

        // Drain buffered output, then stop the pumps. Dropping the
        // master (owned by the aborted resize task) unblocks a reader
        // that never saw EOF.
        let _ = tokio::time::timeout(OUTPUT_DRAIN, reader_thread).await;
        let _ = tokio::time::timeout(OUTPUT_DRAIN, output_task).await;
        input_task.abort();
        resize_task.abort();
        drop(writer_thread);

        Ok(())
    }
}
