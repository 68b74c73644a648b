use std::path::PathBuf;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;
use zeromq::{PubSocket, RepSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::internal::connect::{ConnectError, ConnectionInfo};
use crate::internal::kernel::child::{ChildError, ChildKernelHandle};
use crate::internal::kernel::relay;
use crate::internal::launch::spec::LaunchSpecResolver;
use crate::internal::wire::codec::{reply_type, Header, Session, WireMessage, PROTOCOL_VERSION};

/// The in-band sentinel that triggers a kernel replacement. Exact match
/// only; no prefix, suffix, or pattern form is recognized.
pub const RESTART_DIRECTIVE: &str = "%restart";

const BROADCAST_QUEUE: usize = 256;
const REPLY_QUEUE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("connection file error: {0}")]
    Connect(#[from] ConnectError),
    #[error("transport error: {0}")]
    Zmq(#[from] zeromq::ZmqError),
}

/// Closed set of request kinds the dispatcher distinguishes. The first three
/// are relayed to the child; everything else the proxy answers or drops
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Execute,
    Inspect,
    Complete,
    Other,
}

impl RequestKind {
    pub fn of(msg_type: &str) -> Self {
        match msg_type {
            "execute_request" => Self::Execute,
            "inspect_request" => Self::Inspect,
            "complete_request" => Self::Complete,
            _ => Self::Other,
        }
    }
}

/// Exact-match check for the restart directive.
pub fn is_restart_directive(code: &str) -> bool {
    code == RESTART_DIRECTIVE
}

/// Whether the proxy's own busy/idle broadcasts are withheld while a request
/// of this type is the recorded parent. For relayed kinds the authoritative
/// status arrives from the child over the broadcast relay, and a second pair
/// from the proxy would reach the client out of order.
pub fn suppresses_status(msg_type: &str) -> bool {
    matches!(
        RequestKind::of(msg_type),
        RequestKind::Execute | RequestKind::Inspect | RequestKind::Complete
    )
}

#[derive(Debug, Deserialize)]
struct ShutdownPayload {
    #[serde(default)]
    restart: bool,
}

/// The most recently recorded inbound request. Never cleared once set: the
/// raw bytes parent later broadcasts, the decoded header gates status
/// suppression.
struct PendingParent {
    header: Header,
    raw: Bytes,
}

/// The frontend-facing endpoint. Binds the full socket set an ordinary
/// kernel would, dispatches inbound requests, and owns the single live
/// child kernel across restarts.
pub struct ProxyFront {
    session: Session,
    resolver: LaunchSpecResolver,
    connection_file: PathBuf,
    connection: ConnectionInfo,
    shell: RouterSocket,
    control: RouterSocket,
    // Bound so the socket set matches a real kernel; input requests are not
    // relayed.
    _stdin: RouterSocket,
    child: Option<ChildKernelHandle>,
    // Reaper of a child torn down by the proxy's own shutdown; awaited
    // before the serve loop exits so the graceful request gets out.
    reaper: Option<tokio::task::JoinHandle<()>>,
    pending: Option<PendingParent>,
    iopub_tx: mpsc::Sender<ZmqMessage>,
    shell_reply_tx: mpsc::Sender<ZmqMessage>,
    shell_reply_rx: mpsc::Receiver<ZmqMessage>,
}

impl ProxyFront {
    /// Bind the five frontend-facing sockets described by the connection
    /// file and start the proxy-lifetime service tasks (heartbeat echo and
    /// the broadcast writer). No child is started yet; that happens lazily
    /// on the first relayed request.
    pub async fn bind(
        connection_file: PathBuf,
        resolver: LaunchSpecResolver,
    ) -> Result<Self, ProxyError> {
        let connection = ConnectionInfo::load(&connection_file)?;

        let mut shell = RouterSocket::new();
        shell.bind(&connection.shell_endpoint()).await?;
        let mut control = RouterSocket::new();
        control.bind(&connection.control_endpoint()).await?;
        let mut stdin = RouterSocket::new();
        stdin.bind(&connection.stdin_endpoint()).await?;
        let mut iopub = PubSocket::new();
        iopub.bind(&connection.iopub_endpoint()).await?;
        let mut heartbeat = RepSocket::new();
        heartbeat.bind(&connection.hb_endpoint()).await?;

        tokio::spawn(relay::heartbeat(heartbeat));
        let (iopub_tx, iopub_rx) = mpsc::channel(BROADCAST_QUEUE);
        tokio::spawn(relay::iopub_writer(iopub, iopub_rx));
        let (shell_reply_tx, shell_reply_rx) = mpsc::channel(REPLY_QUEUE);

        let session = Session::new(connection.key.clone());

        Ok(Self {
            session,
            resolver,
            connection_file,
            connection,
            shell,
            control,
            _stdin: stdin,
            child: None,
            reaper: None,
            pending: None,
            iopub_tx,
            shell_reply_tx,
            shell_reply_rx,
        })
    }

    /// Serve until the frontend asks the proxy itself to shut down. All
    /// state mutation happens on this one loop; the relay tasks only ever
    /// feed the queues read here.
    pub async fn run(&mut self) -> Result<(), ProxyError> {
        tracing::info!(
            shell = %self.connection.shell_endpoint(),
            "proxy serving"
        );
        loop {
            tokio::select! {
                incoming = self.shell.recv() => {
                    self.dispatch_shell(incoming?).await;
                }
                incoming = self.control.recv() => {
                    if self.dispatch_control(incoming?).await {
                        break;
                    }
                }
                Some(reply) = self.shell_reply_rx.recv() => {
                    if let Err(e) = self.shell.send(reply).await {
                        tracing::warn!(error = %e, "failed to deliver kernel reply");
                    }
                }
            }
        }
        if let Some(reaper) = self.reaper.take() {
            let _ = reaper.await;
        }
        tracing::info!("proxy shut down");
        Ok(())
    }

    async fn dispatch_shell(&mut self, message: ZmqMessage) {
        let Some((wire, header)) = self.decode(message, "shell") else {
            return;
        };

        // The busy edge is gated on the parent recorded for the prior
        // request; the idle edge sees this request's own parent.
        self.publish_status("busy").await;
        self.pending = Some(PendingParent {
            raw: wire.header.clone(),
            header: header.clone(),
        });

        match RequestKind::of(&header.msg_type) {
            RequestKind::Execute => self.handle_execute(wire, header).await,
            RequestKind::Inspect | RequestKind::Complete => {
                self.relay_to_kernel(wire, &header).await
            }
            RequestKind::Other => self.handle_local(wire, header).await,
        }

        self.publish_status("idle").await;
    }

    /// Returns true when the serve loop should exit.
    async fn dispatch_control(&mut self, message: ZmqMessage) -> bool {
        let Some((wire, header)) = self.decode(message, "control") else {
            return false;
        };

        self.publish_status("busy").await;
        self.pending = Some(PendingParent {
            raw: wire.header.clone(),
            header: header.clone(),
        });

        let exit = match header.msg_type.as_str() {
            "shutdown_request" => {
                self.handle_shutdown(wire).await;
                true
            }
            other => {
                tracing::debug!(msg_type = other, "ignoring unhandled control message");
                false
            }
        };

        self.publish_status("idle").await;
        exit
    }

    /// Decode and authenticate an inbound message, dropping anything
    /// malformed. A message that cannot be decoded is never relayed.
    fn decode(&self, message: ZmqMessage, channel: &str) -> Option<(WireMessage, Header)> {
        let wire = match WireMessage::from_zmq(message) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(channel, error = %e, "discarding malformed message");
                return None;
            }
        };
        if let Err(e) = self.session.verify(&wire) {
            tracing::warn!(channel, error = %e, "discarding message with bad signature");
            return None;
        }
        match wire.header() {
            Ok(header) => Some((wire, header)),
            Err(e) => {
                tracing::warn!(channel, error = %e, "discarding message with undecodable header");
                None
            }
        }
    }

    async fn handle_execute(&mut self, mut wire: WireMessage, header: Header) {
        let code = match wire.execute_code() {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(error = %e, "dropping execute request with undecodable content");
                return;
            }
        };

        let restart = is_restart_directive(&code);
        if restart {
            tracing::debug!("restart directive intercepted");
            // The kernel executes nothing but still emits the reply the
            // client is synchronously waiting on.
            if let Err(e) = wire.rewrite_execution(&self.session, "", true) {
                tracing::warn!(error = %e, "failed to rewrite restart directive");
                return;
            }
        }

        self.relay_to_kernel(wire, &header).await;

        if restart {
            self.replace_child();
        }
    }

    /// Relay a request to the child, starting one first if none is live.
    /// Start failures are surfaced to the waiting client as an error reply
    /// and are not retried; the child reference stays absent.
    async fn relay_to_kernel(&mut self, wire: WireMessage, header: &Header) {
        if self.child.is_none() {
            match ChildKernelHandle::start(
                &self.resolver,
                &self.connection_file,
                &self.connection,
                self.shell_reply_tx.clone(),
                self.iopub_tx.clone(),
            )
            .await
            {
                Ok(child) => {
                    tracing::info!(pid = ?child.pid(), "kernel started");
                    self.child = Some(child);
                }
                Err(e) => {
                    tracing::error!(error = %e, "kernel start failed");
                    self.send_error_reply(wire, header, &e).await;
                    return;
                }
            }
        }

        tracing::debug!(msg_type = %header.msg_type, "relaying request to kernel");
        if let Some(child) = &self.child {
            if let Err(e) = child.relay(wire.into_zmq()).await {
                tracing::error!(error = %e, "failed to relay request to kernel");
            }
        }
    }

    /// Tear down the current child; the next request of any type starts a
    /// fresh one.
    fn replace_child(&mut self) {
        if let Some(child) = self.child.take() {
            tracing::info!(pid = ?child.pid(), "replacing kernel");
            let _ = child.shutdown(&self.session, true);
        }
    }

    async fn handle_local(&mut self, wire: WireMessage, header: Header) {
        match header.msg_type.as_str() {
            "kernel_info_request" => {
                let reply = self.session.build(
                    "kernel_info_reply",
                    kernel_info_content(),
                    Some(&wire.header),
                    wire.idents.clone(),
                );
                match reply {
                    Ok(reply) => {
                        if let Err(e) = self.shell.send(reply.into_zmq()).await {
                            tracing::warn!(error = %e, "failed to send kernel_info reply");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to build kernel_info reply"),
                }
            }
            other => tracing::debug!(msg_type = other, "ignoring unhandled request type"),
        }
    }

    async fn handle_shutdown(&mut self, wire: WireMessage) {
        let restart = serde_json::from_slice::<ShutdownPayload>(&wire.content)
            .map(|payload| payload.restart)
            .unwrap_or(false);
        tracing::info!(restart, "shutdown requested");

        // The proxy process is going away either way, so the child never
        // restarts from here.
        if let Some(child) = self.child.take() {
            self.reaper = Some(child.shutdown(&self.session, false));
        }

        let reply = self.session.build(
            "shutdown_reply",
            serde_json::json!({ "status": "ok", "restart": restart }),
            Some(&wire.header),
            wire.idents.clone(),
        );
        match reply {
            Ok(reply) => {
                if let Err(e) = self.control.send(reply.into_zmq()).await {
                    tracing::warn!(error = %e, "failed to send shutdown reply");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to build shutdown reply"),
        }
    }

    /// Publish a busy/idle broadcast for a locally handled request, unless
    /// the recorded parent is of a kind whose status comes from the child.
    async fn publish_status(&mut self, state: &str) {
        if let Some(pending) = &self.pending {
            if suppresses_status(&pending.header.msg_type) {
                tracing::debug!(state, "suppressing status message");
                return;
            }
        }

        let parent = self.pending.as_ref().map(|pending| pending.raw.clone());
        let topic = format!("kernel.{}.status", self.session.session_id);
        let message = self.session.build(
            "status",
            serde_json::json!({ "execution_state": state }),
            parent.as_ref(),
            vec![Bytes::from(topic.into_bytes())],
        );
        match message {
            Ok(message) => {
                if self.iopub_tx.send(message.into_zmq()).await.is_err() {
                    tracing::warn!("broadcast writer is gone");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to build status message"),
        }
    }

    async fn send_error_reply(&mut self, wire: WireMessage, header: &Header, error: &ChildError) {
        let content = serde_json::json!({
            "status": "error",
            "ename": "KernelStartupError",
            "evalue": error.to_string(),
            "traceback": [],
        });
        let reply = self.session.build(
            &reply_type(&header.msg_type),
            content,
            Some(&wire.header),
            wire.idents.clone(),
        );
        match reply {
            Ok(reply) => {
                if let Err(e) = self.shell.send(reply.into_zmq()).await {
                    tracing::warn!(error = %e, "failed to send error reply");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to build error reply"),
        }
    }
}

fn kernel_info_content() -> serde_json::Value {
    serde_json::json!({
        "status": "ok",
        "protocol_version": PROTOCOL_VERSION,
        "implementation": "respawn",
        "implementation_version": env!("CARGO_PKG_VERSION"),
        "language_info": {
            "name": "python",
            "mimetype": "text/x-python",
            "file_extension": ".py",
        },
        "banner": "respawn: in-place kernel restart proxy",
        "help_links": [],
    })
}

