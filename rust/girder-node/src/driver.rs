//! The connection driver task.
//!
//! One task owns the transport and every piece of mutable connection
//! state; handles talk to it over a command channel and get answers on
//! oneshot channels. The loop selects between commands and inbound
//! frames, so all writes and all reads are serialised here and the
//! state needs no locks.
//!
//! Inbound classification: ticks are observed and dropped; RPC replies
//! route to their correlation waiter (by the call id embedded in the
//! reply reference, or oldest-waiter-first for legacy `{:rex, _}`
//! replies); `{:call, ...}` messages dispatch to a registered handler;
//! everything else multicasts to subscribers. Subscriber fan-out is a
//! bounded broadcast channel, so a slow subscriber skips the oldest
//! frames instead of stalling the reader.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};

use girder_etf::{EtfBuffer, Pid, Term};

use crate::control::{self, classify_frame, peek_kind, Dest, DeliveryTarget, Inbound, MessageKind};
use crate::node::Node;
use crate::transport::{Frame, Transport};
use crate::NodeError;

/// Frames delivered to raw subscribers: message bytes, or the error
/// that ended (or interrupted) the stream.
pub(crate) type SubscriberItem = Result<Arc<Vec<u8>>, NodeError>;

pub(crate) type HandlerFuture =
    Pin<Box<dyn std::future::Future<Output = Result<Term, String>> + Send>>;
pub(crate) type Handler = Arc<dyn Fn(Vec<Term>) -> HandlerFuture + Send + Sync>;

/// Outcome channel for one in-flight RPC.
type WaiterSender = oneshot::Sender<Result<Arc<Vec<u8>>, NodeError>>;

/// Returned to the RPC caller once the request is on the wire.
pub(crate) struct RpcTicket {
    pub call_id: u64,
    pub reply: oneshot::Receiver<Result<Arc<Vec<u8>>, NodeError>>,
}

pub(crate) enum Command {
    /// Encode-complete payload to wrap as `{self_pid, payload}` and
    /// SEND/REG_SEND out.
    Send {
        dest: Dest,
        message: EtfBuffer,
        reply: oneshot::Sender<Result<(), NodeError>>,
    },
    /// Register a waiter, put an rpc request on the wire, hand back the
    /// ticket.
    Rpc {
        module: String,
        function: String,
        args: Vec<Term>,
        reply: oneshot::Sender<Result<RpcTicket, NodeError>>,
    },
    /// Forget an in-flight RPC (the waiter dropped).
    CancelRpc { call_id: u64 },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<SubscriberItem>>,
    },
    RegisterHandler {
        pid: Pid,
        handler: Handler,
        reply: oneshot::Sender<()>,
    },
    Close { reply: oneshot::Sender<()> },
}

pub(crate) const SUBSCRIBER_BUFFER: usize = 1024;

pub(crate) struct Driver<T> {
    transport: T,
    node: Node,
    commands: mpsc::Receiver<Command>,
    /// Clone of the command sender for tasks the driver spawns (inbound
    /// call replies come back through the normal send path).
    loopback: mpsc::Sender<Command>,
    subscribers: broadcast::Sender<SubscriberItem>,
    waiters: HashMap<u64, WaiterSender>,
    /// Registration order, for legacy `{:rex, _}` replies that carry no
    /// reference: the oldest live waiter wins.
    rex_order: VecDeque<u64>,
    handlers: HashMap<Pid, Handler>,
    next_call_id: u64,
}

impl<T: Transport> Driver<T> {
    pub(crate) fn new(
        transport: T,
        node: Node,
        commands: mpsc::Receiver<Command>,
        loopback: mpsc::Sender<Command>,
    ) -> Driver<T> {
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Driver {
            transport,
            node,
            commands,
            loopback,
            subscribers,
            waiters: HashMap::new(),
            rex_order: VecDeque::new(),
            handlers: HashMap::new(),
            next_call_id: 1,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(node = self.node.name(), "connection driver started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        // Every handle dropped: the connection is done.
                        None => break,
                    }
                }

                result = self.transport.recv_frame() => {
                    match result {
                        Ok(Some(Frame::Tick)) => {
                            trace!("tick observed");
                        }
                        Ok(Some(Frame::Data(payload))) => {
                            if !self.handle_frame(payload) {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!("transport closed");
                            self.fail_in_flight(NodeError::ReceiveFailed(
                                "connection closed by peer".into(),
                            ));
                            break;
                        }
                        Err(error) => {
                            warn!(%error, "transport error");
                            self.fail_in_flight(NodeError::ReceiveFailed(error.to_string()));
                            break;
                        }
                    }
                }
            }
        }
        debug!(node = self.node.name(), "connection driver stopped");
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send {
                dest,
                message,
                reply,
            } => {
                let result = self.send_message(&dest, &message).await;
                let _ = reply.send(result);
            }
            Command::Rpc {
                module,
                function,
                args,
                reply,
            } => {
                let result = self.start_rpc(&module, &function, args).await;
                let _ = reply.send(result);
            }
            Command::CancelRpc { call_id } => {
                self.waiters.remove(&call_id);
                self.rex_order.retain(|&id| id != call_id);
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(self.subscribers.subscribe());
            }
            Command::RegisterHandler {
                pid,
                handler,
                reply,
            } => {
                self.handlers.insert(pid, handler);
                let _ = reply.send(());
            }
            Command::Close { reply } => {
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn send_message(&mut self, dest: &Dest, payload: &EtfBuffer) -> Result<(), NodeError> {
        let self_pid = self.node.self_pid();
        let message = control::wrap_message(&self_pid, payload)?;
        let frame = control::build_frame(&self_pid, dest, &message)?;
        self.transport
            .send_frame(&frame)
            .await
            .map_err(|error| NodeError::SendFailed(error.to_string()))
    }

    async fn start_rpc(
        &mut self,
        module: &str,
        function: &str,
        args: Vec<Term>,
    ) -> Result<RpcTicket, NodeError> {
        let call_id = self.next_call_id;
        self.next_call_id += 1;

        let self_pid = self.node.self_pid();
        let reference = self.node.call_ref(call_id);
        let message = control::rpc_request(&self_pid, &reference, module, function, args)?;
        let frame = control::build_frame(&self_pid, &Dest::Name("rex".into()), &message)?;

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(call_id, tx);
        self.rex_order.push_back(call_id);

        match self.transport.send_frame(&frame).await {
            Ok(()) => Ok(RpcTicket {
                call_id,
                reply: rx,
            }),
            Err(error) => {
                self.waiters.remove(&call_id);
                self.rex_order.retain(|&id| id != call_id);
                Err(NodeError::SendFailed(error.to_string()))
            }
        }
    }

    /// Returns false when the driver must terminate.
    fn handle_frame(&mut self, payload: Vec<u8>) -> bool {
        enum Routed {
            Ignored,
            Delivery {
                to: DeliveryTarget,
                kind: MessageKind,
                message: Vec<u8>,
            },
        }

        let routed = catch_unwind(AssertUnwindSafe(|| {
            classify_frame(&payload).map(|inbound| match inbound {
                Inbound::Ignored => Routed::Ignored,
                Inbound::Delivery { to, message } => {
                    let kind = peek_kind(&message);
                    Routed::Delivery { to, kind, message }
                }
            })
        }));

        let routed = match routed {
            Ok(Ok(routed)) => routed,
            Ok(Err(error)) => {
                // Malformed frame: every subscriber learns, the
                // connection keeps going.
                warn!(%error, "dropping malformed inbound frame");
                self.fan_subscribers(Err(error));
                return true;
            }
            Err(_) => {
                self.fail_in_flight(NodeError::ReceiveFailed(
                    "inbound frame handling panicked".into(),
                ));
                return false;
            }
        };

        match routed {
            Routed::Ignored => {
                debug!("ignoring out-of-surface control message");
            }
            Routed::Delivery { to, kind, message } => match kind {
                MessageKind::RpcReply { call_id } => {
                    let bytes = Arc::new(message);
                    if !self.deliver_to_waiter(call_id, bytes.clone()) {
                        // Not ours (or already cancelled): treat as a
                        // plain message.
                        self.fan_subscribers(Ok(bytes));
                    }
                }
                MessageKind::RexReply => {
                    let bytes = Arc::new(message);
                    if !self.deliver_to_oldest_waiter(bytes.clone()) {
                        self.fan_subscribers(Ok(bytes));
                    }
                }
                MessageKind::InboundCall => self.dispatch_inbound_call(to, message),
                MessageKind::Plain => self.fan_subscribers(Ok(Arc::new(message))),
            },
        }
        true
    }

    fn deliver_to_waiter(&mut self, call_id: u64, bytes: Arc<Vec<u8>>) -> bool {
        let Some(tx) = self.waiters.remove(&call_id) else {
            return false;
        };
        self.rex_order.retain(|&id| id != call_id);
        if tx.send(Ok(bytes)).is_err() {
            trace!(call_id, "rpc waiter dropped before its reply");
        }
        true
    }

    fn deliver_to_oldest_waiter(&mut self, bytes: Arc<Vec<u8>>) -> bool {
        let mut bytes = bytes;
        while let Some(call_id) = self.rex_order.pop_front() {
            let Some(tx) = self.waiters.remove(&call_id) else {
                continue;
            };
            match tx.send(Ok(bytes)) {
                Ok(()) => return true,
                // Waiter cancelled without telling us; next in line.
                Err(Ok(returned)) => bytes = returned,
                Err(Err(_)) => return true,
            }
        }
        false
    }

    /// `{:call, id, sender, args...}`: run the handler for the target
    /// pid off-task and SEND `{id, result}` back to the sender.
    fn dispatch_inbound_call(&mut self, to: DeliveryTarget, message: Vec<u8>) {
        let mut buf = EtfBuffer::from_vec(message);
        let term = match girder_etf::decode(&mut buf) {
            Ok(term) => term,
            Err(error) => {
                warn!(%error, "undecodable inbound call");
                self.fan_subscribers(Err(NodeError::ReceiveFailed(error.to_string())));
                return;
            }
        };
        let Term::Tuple(elements) = term else {
            return;
        };
        let mut elements = elements.into_iter();
        let _call_atom = elements.next();
        let id = elements.next().and_then(|t| t.as_int());
        let sender = match elements.next() {
            Some(Term::Pid(pid)) => Some(pid),
            _ => None,
        };
        let (Some(id), Some(sender)) = (id, sender) else {
            warn!("inbound call without id or sender pid");
            return;
        };
        let args: Vec<Term> = elements.collect();

        let handler = match &to {
            DeliveryTarget::Pid(pid) => self.handlers.get(pid).cloned(),
            DeliveryTarget::Name(_) => None,
        };
        let loopback = self.loopback.clone();

        tokio::spawn(async move {
            let result = match handler {
                Some(handler) => match tokio::spawn(handler(args)).await {
                    Ok(result) => result,
                    Err(_) => Err("handler panicked".to_string()),
                },
                None => Err("no handler registered for target pid".to_string()),
            };

            let reply = match result {
                Ok(value) => Term::tuple(vec![Term::Int(id), value]),
                Err(message) => Term::tuple(vec![
                    Term::Int(id),
                    Term::tuple(vec![
                        Term::atom("error"),
                        Term::Binary(message.into_bytes()),
                    ]),
                ]),
            };

            let mut payload = EtfBuffer::versioned();
            if let Err(error) = girder_etf::encode(&reply, &mut payload) {
                warn!(%error, "inbound call reply failed to encode");
                return;
            }
            let (tx, _rx) = oneshot::channel();
            let _ = loopback
                .send(Command::Send {
                    dest: Dest::Pid(sender),
                    message: payload,
                    reply: tx,
                })
                .await;
        });
    }

    fn fan_subscribers(&self, item: SubscriberItem) {
        // A send error only means nobody is subscribed right now.
        let _ = self.subscribers.send(item);
    }

    /// Terminal failure: every subscriber and every in-flight RPC hears
    /// about it before the driver exits.
    fn fail_in_flight(&mut self, error: NodeError) {
        self.fan_subscribers(Err(error.clone()));
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(error.clone()));
        }
        self.rex_order.clear();
    }
}

impl<T> std::fmt::Debug for Driver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("node", &self.node.name())
            .field("in_flight", &self.waiters.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    impl Transport for NullTransport {
        async fn send_frame(&mut self, _payload: &[u8]) -> std::io::Result<()> {
            Ok(())
        }

        async fn recv_frame(&mut self) -> std::io::Result<Option<Frame>> {
            Ok(None)
        }
    }

    fn test_driver() -> Driver<NullTransport> {
        let node = Node::new("client@box", "cookie").expect("node");
        let (tx, rx) = mpsc::channel(8);
        Driver::new(NullTransport, node, rx, tx)
    }

    #[tokio::test]
    async fn rex_replies_go_to_the_oldest_live_waiter() {
        let mut driver = test_driver();

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        driver.waiters.insert(1, tx1);
        driver.rex_order.push_back(1);
        driver.waiters.insert(2, tx2);
        driver.rex_order.push_back(2);

        // The oldest waiter cancelled without a CancelRpc; the reply
        // falls through to the next in line.
        drop(rx1);
        assert!(driver.deliver_to_oldest_waiter(Arc::new(vec![9])));
        assert_eq!(rx2.await.unwrap().unwrap().as_slice(), &[9]);
        assert!(driver.waiters.is_empty());
    }

    #[tokio::test]
    async fn correlated_replies_skip_other_waiters() {
        let mut driver = test_driver();

        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        driver.waiters.insert(1, tx1);
        driver.rex_order.push_back(1);
        driver.waiters.insert(2, tx2);
        driver.rex_order.push_back(2);

        assert!(driver.deliver_to_waiter(2, Arc::new(vec![7])));
        assert_eq!(rx2.await.unwrap().unwrap().as_slice(), &[7]);
        // The uninvolved waiter is untouched.
        assert!(rx1.try_recv().is_err());
        assert_eq!(driver.rex_order, VecDeque::from([1]));
    }

    #[tokio::test]
    async fn terminal_errors_fan_to_every_waiter() {
        let mut driver = test_driver();

        let (tx1, rx1) = oneshot::channel();
        driver.waiters.insert(1, tx1);
        driver.rex_order.push_back(1);

        driver.fail_in_flight(NodeError::ReceiveFailed("boom".into()));
        assert!(matches!(
            rx1.await.unwrap(),
            Err(NodeError::ReceiveFailed(_))
        ));
        assert!(driver.waiters.is_empty());
        assert!(driver.rex_order.is_empty());
    }
}
