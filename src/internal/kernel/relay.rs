use tokio::sync::mpsc;
use zeromq::{DealerSocket, PubSocket, RepSocket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

/// Bidirectional pump for one child's request-reply channel. Client requests
/// arrive over `requests` and go to the child; whatever the child sends back
/// is forwarded verbatim toward the client. Frames are never inspected here.
///
/// The loop runs for the lifetime of one child. It is torn down by task
/// abort when the child is replaced; an error from the socket outside that
/// path means the child died under us.
pub async fn shell_pump(
    mut socket: DealerSocket,
    mut requests: mpsc::Receiver<ZmqMessage>,
    replies: mpsc::Sender<ZmqMessage>,
) {
    let mut requests_open = true;
    loop {
        if requests_open {
            tokio::select! {
                incoming = socket.recv() => match incoming {
                    Ok(message) => {
                        if replies.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "kernel request channel closed unexpectedly");
                        break;
                    }
                },
                outgoing = requests.recv() => match outgoing {
                    Some(message) => {
                        if let Err(e) = socket.send(message).await {
                            tracing::warn!(error = %e, "failed to relay request to kernel");
                            break;
                        }
                    }
                    // The front dropped this child. In-flight replies still
                    // relay until the reaper tears the task down.
                    None => requests_open = false,
                },
            }
        } else {
            match socket.recv().await {
                Ok(message) => {
                    if replies.send(message).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }
}

/// Forward every broadcast message from one child, unfiltered, toward the
/// proxy's outward broadcast socket.
pub async fn iopub_relay(mut socket: SubSocket, out: mpsc::Sender<ZmqMessage>) {
    loop {
        match socket.recv().await {
            Ok(message) => {
                if out.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "kernel broadcast channel closed unexpectedly");
                break;
            }
        }
    }
}

/// Single writer for the proxy's outward broadcast socket. Serializes
/// messages from the child relay and from the proxy's own status publisher
/// for the whole proxy lifetime, across child restarts.
pub async fn iopub_writer(mut socket: PubSocket, mut queue: mpsc::Receiver<ZmqMessage>) {
    while let Some(message) = queue.recv().await {
        if let Err(e) = socket.send(message).await {
            tracing::warn!(error = %e, "failed to publish broadcast message");
        }
    }
}

/// Heartbeat echo. The frontend pings this channel to decide whether the
/// kernel is alive; the proxy always answers for itself, child or no child.
pub async fn heartbeat(mut socket: RepSocket) {
    loop {
        match socket.recv().await {
            Ok(ping) => {
                if let Err(e) = socket.send(ping).await {
                    tracing::debug!(error = %e, "heartbeat reply failed");
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "heartbeat channel closed");
                break;
            }
        }
    }
}
