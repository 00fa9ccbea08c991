//! Node and RPC error surfaces.

use girder_etf::Term;

use girder_bridge::BridgeError;

/// Error from node lifecycle, sends, and receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Local identity could not be initialised (bad node name).
    InitFailed(String),
    /// The transport could not reach or keep the remote node.
    ConnectionFailed(String),
    /// The remote registry refused the public name.
    RegisterFailed(String),
    /// The connection is closed; all operations are rejected.
    NotConnected,
    /// An outbound frame could not be written.
    SendFailed(String),
    /// An inbound frame could not be read or decoded; fans out to every
    /// subscriber and terminates in-flight RPCs.
    ReceiveFailed(String),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::InitFailed(message) => write!(f, "node init failed: {message}"),
            NodeError::ConnectionFailed(message) => write!(f, "connection failed: {message}"),
            NodeError::RegisterFailed(message) => write!(f, "name registration failed: {message}"),
            NodeError::NotConnected => write!(f, "not connected"),
            NodeError::SendFailed(message) => write!(f, "send failed: {message}"),
            NodeError::ReceiveFailed(message) => write!(f, "receive failed: {message}"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Error from a remote procedure call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    /// Node-level failure (send, receive, connection state).
    Node(NodeError),
    /// The remote answered `{:badrpc, reason}`.
    BadRpc(Term),
    /// The reply stream ended (or the deadline passed) before a reply.
    NoResponse,
    /// The reply arrived but did not decode into the requested type.
    Decode(BridgeError),
    /// A call was built without a connection to run on.
    MissingConnection,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Node(error) => write!(f, "{error}"),
            RpcError::BadRpc(reason) => write!(f, "badrpc: {reason:?}"),
            RpcError::NoResponse => write!(f, "no rpc response"),
            RpcError::Decode(error) => write!(f, "rpc reply decode failed: {error}"),
            RpcError::MissingConnection => write!(f, "rpc call has no connection"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<NodeError> for RpcError {
    fn from(error: NodeError) -> Self {
        RpcError::Node(error)
    }
}

impl From<BridgeError> for RpcError {
    fn from(error: BridgeError) -> Self {
        RpcError::Decode(error)
    }
}
