//! Connection handles.
//!
//! A [`Connection`] is a cheap-to-clone handle onto the driver task.
//! Sends and RPCs go through the command channel; message streams
//! subscribe to the driver's broadcast fan-out and decode lazily on the
//! consumer's task.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use girder_bridge::{BridgeError, Policy};
use girder_etf::{tags, EtfBuffer, Pid, Term};

use crate::control::Dest;
use crate::driver::{Command, Driver, Handler, RpcTicket, SubscriberItem};
use crate::node::Node;
use crate::transport::Transport;
use crate::{NodeError, RpcError};

const COMMAND_BUFFER: usize = 64;

impl Node {
    /// Open a connection to `remote_name` over an authenticated
    /// transport, optionally registering this endpoint under a public
    /// name with the remote `:global` registry.
    pub async fn connect<T: Transport>(
        &self,
        transport: T,
        remote_name: &str,
        register_as: Option<&str>,
    ) -> Result<Connection, NodeError> {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let driver = Driver::new(transport, self.clone(), command_rx, commands.clone());
        tokio::spawn(driver.run());

        let connection = Connection {
            node: self.clone(),
            remote: remote_name.to_string(),
            commands,
        };

        if let Some(name) = register_as {
            connection.register_global(name).await?;
        }
        Ok(connection)
    }

    /// Connect over TCP. Fails fast with `ConnectionFailed` when the
    /// remote endpoint is down.
    pub async fn connect_tcp(
        &self,
        addr: &str,
        remote_name: &str,
        register_as: Option<&str>,
    ) -> Result<Connection, NodeError> {
        let transport = crate::transport::TcpTransport::connect(addr)
            .await
            .map_err(|error| NodeError::ConnectionFailed(error.to_string()))?;
        self.connect(transport, remote_name, register_as).await
    }
}

/// A handle onto one node-to-node connection.
#[derive(Clone)]
pub struct Connection {
    node: Node,
    remote: String,
    commands: mpsc::Sender<Command>,
}

impl Connection {
    /// The local identity this connection sends as.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// The remote node name given at connect time.
    pub fn remote_name(&self) -> &str {
        &self.remote
    }

    /// The pid the remote sees as this connection's sender.
    pub fn self_pid(&self) -> Pid {
        self.node.self_pid()
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Send a raw term. The payload reaches the remote wrapped as
    /// `{self_pid, payload}`.
    pub async fn send_term(&self, dest: impl Into<Dest>, term: &Term) -> Result<(), NodeError> {
        let mut payload = EtfBuffer::versioned();
        girder_etf::encode(term, &mut payload)
            .map_err(|error| NodeError::SendFailed(error.to_string()))?;
        self.send_payload(dest.into(), payload).await
    }

    /// Send a typed value, encoded under the caller's policy.
    pub async fn send<T: Serialize>(
        &self,
        dest: impl Into<Dest>,
        value: &T,
        policy: Policy,
    ) -> Result<(), NodeError> {
        let payload = girder_bridge::to_buffer(value, policy)
            .map_err(|error| NodeError::SendFailed(error.to_string()))?;
        self.send_payload(dest.into(), payload).await
    }

    async fn send_payload(&self, dest: Dest, message: EtfBuffer) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                dest,
                message,
                reply: tx,
            })
            .await
            .map_err(|_| NodeError::NotConnected)?;
        rx.await.map_err(|_| NodeError::NotConnected)?
    }

    // ------------------------------------------------------------------
    // RPC
    // ------------------------------------------------------------------

    /// Call `module:function(args)` on the remote node and return the
    /// result term.
    pub async fn rpc(
        &self,
        module: &str,
        function: &str,
        args: Vec<Term>,
    ) -> Result<Term, RpcError> {
        let bytes = self.rpc_raw(module, function, args, None).await?;
        extract_result(&bytes)
    }

    /// [`Connection::rpc`] with a deadline. Expiry answers
    /// `NoResponse`; the remote computation is not cancelled.
    pub async fn rpc_with_timeout(
        &self,
        module: &str,
        function: &str,
        args: Vec<Term>,
        deadline: Duration,
    ) -> Result<Term, RpcError> {
        let bytes = self.rpc_raw(module, function, args, Some(deadline)).await?;
        extract_result(&bytes)
    }

    /// Call and decode the result into a typed value through the
    /// bridge. Multi-value returns decode as Rust tuples.
    pub async fn rpc_decoded<T: DeserializeOwned>(
        &self,
        module: &str,
        function: &str,
        args: Vec<Term>,
    ) -> Result<T, RpcError> {
        let bytes = self.rpc_raw(module, function, args, None).await?;

        let mut buf = EtfBuffer::from_vec(bytes.to_vec());
        buf.consume_version();
        seek_past_reply_tag(&mut buf)?;
        if let Some(reason) = probe_badrpc(&mut buf)? {
            return Err(RpcError::BadRpc(reason));
        }
        girder_bridge::from_buffer(&mut buf).map_err(RpcError::Decode)
    }

    async fn rpc_raw(
        &self,
        module: &str,
        function: &str,
        args: Vec<Term>,
        deadline: Option<Duration>,
    ) -> Result<Arc<Vec<u8>>, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Rpc {
                module: module.to_string(),
                function: function.to_string(),
                args,
                reply: tx,
            })
            .await
            .map_err(|_| NodeError::NotConnected)?;
        let ticket = rx.await.map_err(|_| NodeError::NotConnected)??;

        let RpcTicket { call_id, reply } = ticket;
        let guard = CancelGuard {
            commands: self.commands.clone(),
            call_id,
            armed: true,
        };

        let outcome = match deadline {
            None => reply.await,
            Some(deadline) => match tokio::time::timeout(deadline, reply).await {
                Ok(outcome) => outcome,
                // The guard deregisters the waiter on drop.
                Err(_elapsed) => return Err(RpcError::NoResponse),
            },
        };
        guard.disarm();

        match outcome {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(error)) => Err(error.into()),
            // Driver dropped the waiter: stream ended first.
            Err(_) => Err(RpcError::NoResponse),
        }
    }

    async fn register_global(&self, name: &str) -> Result<(), NodeError> {
        let reply = self
            .rpc(
                "global",
                "register_name",
                vec![Term::atom(name), Term::Pid(self.self_pid())],
            )
            .await
            .map_err(|error| NodeError::RegisterFailed(error.to_string()))?;
        if reply != Term::atom("yes") {
            return Err(NodeError::RegisterFailed(format!(
                "global registry answered {reply:?}"
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Streams and handlers
    // ------------------------------------------------------------------

    /// Subscribe to inbound messages as raw terms.
    pub async fn messages(&self) -> Result<Messages, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { reply: tx })
            .await
            .map_err(|_| NodeError::NotConnected)?;
        let receiver = rx.await.map_err(|_| NodeError::NotConnected)?;
        Ok(Messages { receiver })
    }

    /// Subscribe to inbound messages decoded into `T` through the
    /// bridge.
    pub async fn messages_as<T: DeserializeOwned>(&self) -> Result<TypedMessages<T>, NodeError> {
        Ok(TypedMessages {
            inner: self.messages().await?,
            _marker: PhantomData,
        })
    }

    /// Register the handler invoked for `{:call, id, sender, args...}`
    /// messages addressed to `pid`. The handler's result (or
    /// `{:error, message}`) is sent back to the caller as
    /// `{id, result}`.
    pub async fn register_handler<F, Fut>(&self, pid: Pid, handler: F) -> Result<(), NodeError>
    where
        F: Fn(Vec<Term>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Term, String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| Box::pin(handler(args)));
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::RegisterHandler {
                pid,
                handler,
                reply: tx,
            })
            .await
            .map_err(|_| NodeError::NotConnected)?;
        rx.await.map_err(|_| NodeError::NotConnected)
    }

    /// Close the connection. Idempotent; everything after answers
    /// `NotConnected`.
    pub async fn close(&self) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Close { reply: tx })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("node", &self.node.name())
            .field("remote", &self.remote)
            .finish()
    }
}

/// Deregisters an in-flight RPC when its caller is dropped mid-wait.
struct CancelGuard {
    commands: mpsc::Sender<Command>,
    call_id: u64,
    armed: bool,
}

impl CancelGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self
                .commands
                .try_send(Command::CancelRpc {
                    call_id: self.call_id,
                });
        }
    }
}

/// Inbound messages as raw terms, in wire order. A slow consumer skips
/// the oldest frames rather than stalling the reader.
pub struct Messages {
    receiver: broadcast::Receiver<SubscriberItem>,
}

impl Messages {
    async fn next_bytes(&mut self) -> Option<Result<Arc<Vec<u8>>, NodeError>> {
        loop {
            match self.receiver.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged; oldest frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The next message, or `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<Result<Term, NodeError>> {
        let item = self.next_bytes().await?;
        Some(item.and_then(|bytes| {
            let mut buf = EtfBuffer::from_vec(bytes.to_vec());
            girder_etf::decode(&mut buf)
                .map_err(|error| NodeError::ReceiveFailed(error.to_string()))
        }))
    }

    /// [`Messages::next`] with an optional deadline: `None` blocks,
    /// `Some(Duration::ZERO)` polls. Deadline expiry returns `None`.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Option<Result<Term, NodeError>> {
        match timeout {
            None => self.next().await,
            Some(deadline) => tokio::time::timeout(deadline, self.next())
                .await
                .unwrap_or(None),
        }
    }
}

/// Inbound messages decoded into `T`; decoding happens here, on the
/// consumer's task, not in the reader.
pub struct TypedMessages<T> {
    inner: Messages,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedMessages<T> {
    pub async fn next(&mut self) -> Option<Result<T, NodeError>> {
        let item = self.inner.next_bytes().await?;
        Some(item.and_then(|bytes| {
            let mut buf = EtfBuffer::from_vec(bytes.to_vec());
            girder_bridge::from_buffer(&mut buf)
                .map_err(|error| NodeError::ReceiveFailed(error.to_string()))
        }))
    }

    pub async fn recv(&mut self, timeout: Option<Duration>) -> Option<Result<T, NodeError>> {
        match timeout {
            None => self.next().await,
            Some(deadline) => tokio::time::timeout(deadline, self.next())
                .await
                .unwrap_or(None),
        }
    }
}

/// Decode an RPC reply `{tag, result}` and unwrap `{:badrpc, reason}`.
fn extract_result(bytes: &[u8]) -> Result<Term, RpcError> {
    let mut buf = EtfBuffer::from_vec(bytes.to_vec());
    let term = girder_etf::decode(&mut buf)
        .map_err(|error| RpcError::Decode(BridgeError::Codec(error)))?;
    let Term::Tuple(mut elements) = term else {
        return Err(RpcError::Decode(BridgeError::InvalidArgument(
            "rpc reply is not a tuple".into(),
        )));
    };
    if elements.len() != 2 {
        return Err(RpcError::Decode(BridgeError::InvalidArgument(format!(
            "rpc reply tuple has arity {}",
            elements.len()
        ))));
    }
    let result = match elements.pop() {
        Some(result) => result,
        None => return Err(RpcError::NoResponse),
    };

    if let Some([tag, reason]) = result.as_tuple().map(|t| <&[Term; 2]>::try_from(t).ok()).flatten()
    {
        if tag.as_atom() == Some("badrpc") {
            return Err(RpcError::BadRpc(reason.clone()));
        }
    }
    Ok(result)
}

/// Advance past the `{tag, ...}` header and the tag term of a reply.
fn seek_past_reply_tag(buf: &mut EtfBuffer) -> Result<(), RpcError> {
    let decode_err =
        |error: girder_etf::DecodeError| RpcError::Decode(BridgeError::Codec(error));
    let tag = buf.read_u8().map_err(decode_err)?;
    let arity = match tag {
        tags::SMALL_TUPLE_EXT => buf.read_u8().map_err(decode_err)? as usize,
        tags::LARGE_TUPLE_EXT => buf.read_u32().map_err(decode_err)? as usize,
        _ => {
            return Err(RpcError::Decode(BridgeError::TypeMismatch {
                expected: "rpc reply tuple",
                actual_tag: tag,
            }))
        }
    };
    if arity != 2 {
        return Err(RpcError::Decode(BridgeError::InvalidArgument(format!(
            "rpc reply tuple has arity {arity}"
        ))));
    }
    buf.skip_term().map_err(decode_err)
}

/// Detect a `{:badrpc, reason}` result at the cursor without moving it
/// (offsets are stable while the buffer is not mutated).
fn probe_badrpc(buf: &mut EtfBuffer) -> Result<Option<Term>, RpcError> {
    let at = buf.position();
    let looks_like_badrpc = (|| {
        if buf.read_u8().ok()? != tags::SMALL_TUPLE_EXT {
            return None;
        }
        if buf.read_u8().ok()? != 2 {
            return None;
        }
        let name = girder_etf::decode_atom(buf).ok()?;
        (name == "badrpc").then_some(())
    })()
    .is_some();

    if looks_like_badrpc {
        let reason = girder_etf::decode(buf)
            .map_err(|error| RpcError::Decode(BridgeError::Codec(error)))?;
        buf.seek(at);
        return Ok(Some(reason));
    }
    buf.seek(at);
    Ok(None)
}
