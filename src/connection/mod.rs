/// Pooled node connections and command buffering
///
/// A `NodeConnection` wraps one live transport to a specific node address.
/// Commands are dispatched in issuance order; while auto-flush is disabled
/// they accumulate in a send queue until `flush_commands` runs, which is how
/// callers pipeline many operations into few network writes. Commands that
/// have been transmitted but not yet completed sit in an in-flight FIFO that
/// the reply decoder drains via [`NodeConnection::complete_next`].
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{RumboError, RumboResult};
use crate::topology::NodeAddress;
use crate::transport::Transport;
use crate::utils::generate_id;

type ReplySender = oneshot::Sender<RumboResult<Bytes>>;

struct QueuedCommand {
    payload: Bytes,
    tx: ReplySender,
}

struct ConnState {
    /// None once the connection is closed
    transport: Option<Box<dyn Transport>>,
    /// Issued but not yet transmitted (auto-flush off)
    buffered: VecDeque<QueuedCommand>,
    /// Transmitted, awaiting completion by the reply decoder
    in_flight: VecDeque<ReplySender>,
    read_only: bool,
}

/// One pooled connection to a node, owned by the connection pool
///
/// The auto-flush flag is shared with the pool that created the connection,
/// so toggling it reaches every connection at dispatch time, including ones
/// whose creation straddled the toggle.
pub struct NodeConnection {
    id: String,
    address: NodeAddress,
    auto_flush: Arc<AtomicBool>,
    state: Mutex<ConnState>,
    closed: AtomicBool,
}

impl NodeConnection {
    pub fn new(
        address: NodeAddress,
        transport: Box<dyn Transport>,
        auto_flush: Arc<AtomicBool>,
    ) -> Self {
        let id = generate_id("conn");
        debug!(%address, id, "pooled connection established");
        Self {
            id,
            address,
            auto_flush,
            state: Mutex::new(ConnState {
                transport: Some(transport),
                buffered: VecDeque::new(),
                in_flight: VecDeque::new(),
                read_only: false,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Issue a command
    ///
    /// With auto-flush on, the payload hits the transport before this
    /// returns; otherwise it joins the send queue. The returned future
    /// resolves when the reply decoder completes the command, or with a
    /// canceled/closed condition if the connection is reset or closed first.
    pub async fn dispatch(&self, payload: Bytes) -> CommandFuture {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().await;

        if state.transport.is_none() {
            let _ = tx.send(Err(RumboError::Closed));
            return CommandFuture { rx };
        }

        if self.auto_flush.load(Ordering::SeqCst) {
            if let Err(e) = transmit(&mut state, &payload, true).await {
                let _ = tx.send(Err(RumboError::Transport(e)));
                return CommandFuture { rx };
            }
            state.in_flight.push_back(tx);
        } else {
            state.buffered.push_back(QueuedCommand { payload, tx });
        }
        CommandFuture { rx }
    }

    /// Number of issued commands not yet transmitted
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.buffered.len()
    }

    /// Number of transmitted commands awaiting completion
    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Toggle auto-flush; enabling it transmits the backlog so no command is
    /// left pending indefinitely
    pub async fn set_auto_flush(&self, auto_flush: bool) -> RumboResult<()> {
        self.auto_flush.store(auto_flush, Ordering::SeqCst);
        if auto_flush {
            self.flush_commands().await?;
        }
        Ok(())
    }

    /// Transmit all buffered commands in issuance order
    ///
    /// No-op when nothing is buffered or the connection is closed.
    pub async fn flush_commands(&self) -> RumboResult<()> {
        let mut state = self.state.lock().await;
        if state.buffered.is_empty() || state.transport.is_none() {
            return Ok(());
        }

        while let Some(command) = state.buffered.pop_front() {
            if let Err(e) = transmit(&mut state, &command.payload, false).await {
                let kind = e.kind();
                let message = e.to_string();
                let _ = command.tx.send(Err(RumboError::Transport(e)));
                return Err(RumboError::Transport(io::Error::new(kind, message)));
            }
            state.in_flight.push_back(command.tx);
        }

        if let Some(transport) = state.transport.as_mut() {
            transport.flush().await.map_err(RumboError::Transport)?;
        }
        Ok(())
    }

    /// Complete the oldest in-flight command with a decoded reply
    ///
    /// Returns false when nothing was in flight, which indicates the
    /// request/response bookkeeping has desynchronized and the caller
    /// should `reset()`.
    pub async fn complete_next(&self, reply: Bytes) -> bool {
        let mut state = self.state.lock().await;
        match state.in_flight.pop_front() {
            Some(tx) => {
                let _ = tx.send(Ok(reply));
                true
            }
            None => {
                warn!(address = %self.address, id = self.id, "reply with no in-flight command");
                false
            }
        }
    }

    /// Fail the oldest in-flight command with a transport-reported error
    pub async fn fail_next(&self, error: io::Error) -> bool {
        let mut state = self.state.lock().await;
        match state.in_flight.pop_front() {
            Some(tx) => {
                let _ = tx.send(Err(RumboError::Transport(error)));
                true
            }
            None => false,
        }
    }

    /// Cancel every buffered and in-flight command and reinitialize the
    /// write/read bookkeeping, keeping the transport alive
    ///
    /// Recovery path for a connection whose command/response framing has
    /// desynchronized.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let canceled = state.buffered.len() + state.in_flight.len();
        for command in state.buffered.drain(..) {
            let _ = command.tx.send(Err(RumboError::Canceled));
        }
        for tx in state.in_flight.drain(..) {
            let _ = tx.send(Err(RumboError::Canceled));
        }
        if canceled > 0 {
            debug!(address = %self.address, id = self.id, canceled, "connection reset");
        }
    }

    /// Close the transport; everything outstanding fails as closed
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut state = self.state.lock().await;
        for command in state.buffered.drain(..) {
            let _ = command.tx.send(Err(RumboError::Closed));
        }
        for tx in state.in_flight.drain(..) {
            let _ = tx.send(Err(RumboError::Closed));
        }
        if let Some(mut transport) = state.transport.take() {
            if let Err(e) = transport.close().await {
                warn!(address = %self.address, id = self.id, error = %e, "close failed");
            }
        }
        debug!(address = %self.address, id = self.id, "pooled connection closed");
    }

    /// Put the connection into replica-read mode, issuing the protocol-mode
    /// primitive at most once
    pub async fn ensure_read_only(&self) -> RumboResult<()> {
        let mut state = self.state.lock().await;
        if state.read_only {
            return Ok(());
        }
        match state.transport.as_mut() {
            Some(transport) => {
                transport
                    .set_read_only(true)
                    .await
                    .map_err(RumboError::Transport)?;
                state.read_only = true;
                Ok(())
            }
            None => Err(RumboError::Closed),
        }
    }

    pub async fn is_read_only(&self) -> bool {
        self.state.lock().await.read_only
    }
}

async fn transmit(state: &mut ConnState, payload: &Bytes, flush: bool) -> io::Result<()> {
    let transport = state
        .transport
        .as_mut()
        .expect("transmit on closed connection");
    transport.write_all(payload).await?;
    if flush {
        transport.flush().await?;
    }
    Ok(())
}

/// Future resolving with the command's reply once the decoder completes it
pub struct CommandFuture {
    rx: oneshot::Receiver<RumboResult<Bytes>>,
}

impl Future for CommandFuture {
    type Output = RumboResult<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without resolution: the connection went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(RumboError::Canceled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
