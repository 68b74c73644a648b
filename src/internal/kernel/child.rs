use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use zeromq::{DealerSocket, Socket, SocketSend, SubSocket, ZmqMessage};

use crate::internal::connect::{self, ConnectError, ConnectionInfo};
use crate::internal::kernel::relay;
use crate::internal::launch::spec::{LaunchSpecResolver, SpecError};
use crate::internal::wire::codec::Session;

/// How long to wait for a freshly spawned kernel to start answering on its
/// request socket.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_POLL: Duration = Duration::from_millis(100);

/// Grace period between asking a child to shut down and killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const RELAY_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ChildError {
    #[error("launch configuration error: {0}")]
    Spec(#[from] SpecError),
    #[error("connection file error: {0}")]
    Connect(#[from] ConnectError),
    #[error("failed to spawn kernel process: {0}")]
    Spawn(std::io::Error),
    #[error("kernel process exited during startup with {0}")]
    EarlyExit(ExitStatus),
    #[error("timed out waiting for kernel sockets to become connectable")]
    ConnectTimeout,
    #[error("transport error: {0}")]
    Zmq(#[from] zeromq::ZmqError),
    #[error("kernel relay channel closed")]
    RelayClosed,
}

/// Owns one live kernel process and the relay loops bound to its sockets.
/// Exactly one of these exists at a time; replacing the child means dropping
/// the handle through [`ChildKernelHandle::shutdown`] and starting a new one.
pub struct ChildKernelHandle {
    connection: ConnectionInfo,
    process: Option<tokio::process::Child>,
    pid: Option<u32>,
    to_child: mpsc::Sender<ZmqMessage>,
    shell_task: JoinHandle<()>,
    iopub_task: JoinHandle<()>,
}

impl ChildKernelHandle {
    /// Start the real kernel: derive a private connection file, resolve the
    /// original launch vector, spawn, and wait for the request socket to
    /// accept connections. Replies and broadcasts flow into the two provided
    /// queues for the lifetime of this child.
    pub async fn start(
        resolver: &LaunchSpecResolver,
        parent_connection_file: &Path,
        parent: &ConnectionInfo,
        replies: mpsc::Sender<ZmqMessage>,
        broadcasts: mpsc::Sender<ZmqMessage>,
    ) -> Result<Self, ChildError> {
        let connection_file = connect::derive_child_file(parent_connection_file);
        let argv = resolver.resolve(&connection_file)?;

        let connection = parent.with_fresh_ports()?;
        connection.save(&connection_file)?;
        tracing::debug!(path = %connection_file.display(), "wrote child connection file");
        tracing::info!(?argv, "starting kernel");

        let mut process = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .kill_on_drop(true)
            .spawn()
            .map_err(ChildError::Spawn)?;
        let pid = process.id();

        wait_until_connectable(&connection, &mut process).await?;

        let mut shell = DealerSocket::new();
        shell.connect(&connection.shell_endpoint()).await?;
        let mut iopub = SubSocket::new();
        iopub.connect(&connection.iopub_endpoint()).await?;
        iopub.subscribe("").await?;

        let (to_child, from_front) = mpsc::channel(RELAY_QUEUE);
        let shell_task = tokio::spawn(relay::shell_pump(shell, from_front, replies));
        let iopub_task = tokio::spawn(relay::iopub_relay(iopub, broadcasts));

        Ok(Self {
            connection,
            process: Some(process),
            pid,
            to_child,
            shell_task,
            iopub_task,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// Hand a request to the child's request socket, frames untouched.
    pub async fn relay(&self, message: ZmqMessage) -> Result<(), ChildError> {
        self.to_child
            .send(message)
            .await
            .map_err(|_| ChildError::RelayClosed)
    }

    /// Ask the child to shut down and hand it to a background reaper. The
    /// caller gets control back immediately; the reaper enforces the grace
    /// period, kills a child that ignores the request, and tears down the
    /// relay loops once the process is gone. The returned handle resolves
    /// when the reaper is done.
    pub fn shutdown(mut self, session: &Session, restart: bool) -> JoinHandle<()> {
        let request = session
            .build(
                "shutdown_request",
                serde_json::json!({ "restart": restart }),
                None,
                Vec::new(),
            )
            .map(ZmqMessage::from);
        let control_endpoint = self.connection.control_endpoint();
        let process = self.process.take();
        let pid = self.pid;
        let shell_task = self.shell_task;
        let iopub_task = self.iopub_task;

        tokio::spawn(async move {
            match request {
                Ok(message) => {
                    let mut control = DealerSocket::new();
                    match control.connect(&control_endpoint).await {
                        Ok(()) => {
                            if let Err(e) = control.send(message).await {
                                tracing::debug!(error = %e, "shutdown request not delivered");
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "shutdown connect failed"),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to build shutdown request"),
            }

            if let Some(mut process) = process {
                match tokio::time::timeout(SHUTDOWN_GRACE, process.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!(?pid, %status, restart, "kernel exited")
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "failed to reap kernel"),
                    Err(_) => {
                        tracing::warn!(?pid, "kernel ignored shutdown request, killing");
                        let _ = process.kill().await;
                    }
                }
            }

            // Old relay loops are abandoned with their child; dropping the
            // tasks closes the sockets.
            shell_task.abort();
            iopub_task.abort();
        })
    }
}

/// Poll the child's request endpoint until it accepts a TCP connection,
/// bailing out early if the process dies first.
async fn wait_until_connectable(
    connection: &ConnectionInfo,
    process: &mut tokio::process::Child,
) -> Result<(), ChildError> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    let address = (connection.ip.clone(), connection.shell_port);
    loop {
        if TcpStream::connect(address.clone()).await.is_ok() {
            return Ok(());
        }
        if let Ok(Some(status)) = process.try_wait() {
            return Err(ChildError::EarlyExit(status));
        }
        if Instant::now() >= deadline {
            return Err(ChildError::ConnectTimeout);
        }
        tokio::time::sleep(CONNECT_POLL).await;
    }
}
