//! Per-WebSocket tunnel session.
//!
//! A session owns a map from stream id to an open TCP write half plus its
//! background read pump. The WebSocket reader calls [`TunnelSession::handle_frame`]
//! for every binary message; outbound frames are funneled through a single
//! mpsc channel so they reach the socket atomically and in order.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::policy::{INITIAL_STREAM_CREDIT, admit_connect};
use crate::wisp::{
    CLOSE_INVALID, CLOSE_NETWORK_ERROR, CLOSE_VOLUNTARY, FRAME_CLOSE, FRAME_CONNECT,
    FRAME_CONTINUE, FRAME_DATA, make_close, make_continue, make_data, parse_connect, parse_frame,
};

const PUMP_BUFFER: usize = 16 * 1024;

/// Boxed read half of a relayed connection.
pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a relayed connection.
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Dialer abstraction so sessions can be exercised without real sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a TCP connection to `hostname:port` and return its halves.
    async fn connect(&self, hostname: &str, port: u16) -> io::Result<(BoxedRead, BoxedWrite)>;
}

/// Production connector dialing plain TCP. The payload is opaque TLS; the
/// tunnel must never wrap the socket itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, hostname: &str, port: u16) -> io::Result<(BoxedRead, BoxedWrite)> {
        let stream = TcpStream::connect((hostname, port)).await?;
        let (read, write) = stream.into_split();
        Ok((Box::new(read), Box::new(write)))
    }
}

struct StreamEntry {
    writer: BoxedWrite,
    pump: JoinHandle<()>,
}

/// One tunnel session; create one per accepted WebSocket and drop it on
/// disconnect.
pub struct TunnelSession {
    outbound: mpsc::Sender<Vec<u8>>,
    connector: Arc<dyn Connector>,
    streams: Arc<Mutex<HashMap<u32, StreamEntry>>>,
}

impl TunnelSession {
    /// Create a session whose outbound frames are sent through `outbound`.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self::with_connector(outbound, Arc::new(TcpConnector))
    }

    /// Create a session with a custom dialer.
    #[must_use]
    pub fn with_connector(outbound: mpsc::Sender<Vec<u8>>, connector: Arc<dyn Connector>) -> Self {
        Self {
            outbound,
            connector,
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Announce the fixed flow-control credit; call once right after the
    /// WebSocket is accepted.
    pub async fn open(&self) {
        self.send(make_continue(0, INITIAL_STREAM_CREDIT)).await;
    }

    /// Handle one inbound frame. Malformed frames are dropped silently.
    pub async fn handle_frame(&self, data: &[u8]) {
        let Some(frame) = parse_frame(data) else {
            trace!(len = data.len(), "dropping undersized frame");
            return;
        };
        match frame.frame_type {
            FRAME_CONNECT => self.handle_connect(frame.stream_id, frame.payload).await,
            FRAME_DATA => self.handle_data(frame.stream_id, frame.payload).await,
            FRAME_CLOSE => self.remove_stream(frame.stream_id).await,
            // Client credit is not metered; anything else is ignored.
            FRAME_CONTINUE => {}
            other => trace!(frame_type = other, "dropping unknown frame type"),
        }
    }

    /// Tear down every stream; called when the WebSocket closes or errors.
    pub async fn shutdown(&self) {
        let mut streams = self.streams.lock().await;
        for (_, entry) in streams.drain() {
            entry.pump.abort();
            drop(entry.writer);
        }
    }

    async fn handle_connect(&self, stream_id: u32, payload: &[u8]) {
        // A CONNECT on a live id replaces the old stream.
        self.remove_stream(stream_id).await;

        let Some(connect) = parse_connect(payload) else {
            self.send(make_close(stream_id, CLOSE_INVALID)).await;
            return;
        };
        if let Err(err) = admit_connect(&connect) {
            warn!(stream_id, hostname = %connect.hostname, port = connect.port, error = %err, "connect refused");
            self.send(make_close(stream_id, CLOSE_INVALID)).await;
            return;
        }

        let (reader, writer) = match self
            .connector
            .connect(&connect.hostname, connect.port)
            .await
        {
            Ok(halves) => halves,
            Err(err) => {
                warn!(stream_id, hostname = %connect.hostname, error = %err, "upstream dial failed");
                self.send(make_close(stream_id, CLOSE_NETWORK_ERROR)).await;
                return;
            }
        };
        debug!(stream_id, hostname = %connect.hostname, "stream opened");

        // The pump waits for the gate so it cannot observe the map before
        // its own entry is inserted.
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let pump = spawn_pump(
            stream_id,
            reader,
            gate_rx,
            self.outbound.clone(),
            Arc::clone(&self.streams),
        );
        self.streams
            .lock()
            .await
            .insert(stream_id, StreamEntry { writer, pump });
        let _ = gate_tx.send(());

        self.send(make_continue(stream_id, INITIAL_STREAM_CREDIT))
            .await;
    }

    async fn handle_data(&self, stream_id: u32, payload: &[u8]) {
        let mut streams = self.streams.lock().await;
        let Some(entry) = streams.get_mut(&stream_id) else {
            trace!(stream_id, "dropping data for unknown stream");
            return;
        };
        if let Err(err) = entry.writer.write_all(payload).await {
            warn!(stream_id, error = %err, "relay write failed");
            if let Some(entry) = streams.remove(&stream_id) {
                entry.pump.abort();
            }
            drop(streams);
            self.send(make_close(stream_id, CLOSE_NETWORK_ERROR)).await;
        }
    }

    async fn remove_stream(&self, stream_id: u32) {
        if let Some(mut entry) = self.streams.lock().await.remove(&stream_id) {
            entry.pump.abort();
            let _ = entry.writer.shutdown().await;
        }
    }

    async fn send(&self, frame: Vec<u8>) {
        if self.outbound.send(frame).await.is_err() {
            trace!("outbound channel closed; dropping frame");
        }
    }
}

fn spawn_pump(
    stream_id: u32,
    mut reader: BoxedRead,
    gate: oneshot::Receiver<()>,
    outbound: mpsc::Sender<Vec<u8>>,
    streams: Arc<Mutex<HashMap<u32, StreamEntry>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if gate.await.is_err() {
            return;
        }
        let mut buf = vec![0u8; PUMP_BUFFER];
        let reason = loop {
            match reader.read(&mut buf).await {
                Ok(0) => break CLOSE_VOLUNTARY,
                Ok(n) => {
                    if outbound.send(make_data(stream_id, &buf[..n])).await.is_err() {
                        // WebSocket is gone; the session will be torn down.
                        return;
                    }
                }
                Err(err) => {
                    warn!(stream_id, error = %err, "relay read failed");
                    break CLOSE_NETWORK_ERROR;
                }
            }
        };
        streams.lock().await.remove(&stream_id);
        let _ = outbound.send(make_close(stream_id, reason)).await;
        debug!(stream_id, reason, "stream closed");
    })
}
