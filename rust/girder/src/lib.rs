//! girder - native client for distributed Erlang
//!
//! This crate provides a unified API over the girder component crates.
//! Users should depend on this crate rather than the individual pieces.
//!
//! - term model, buffer, and codec: [`etf`]
//! - serde data format with encode policies: [`bridge`]
//! - node identity, transports, connections, RPC: re-exported at the
//!   top level

#![deny(unsafe_code)]

// Re-export the wire layer under a short name.
pub use girder_etf as etf;

// Re-export the bridge under a short name.
pub use girder_bridge as bridge;

// The node client is the user-facing surface; flatten it.
pub use girder_node::{
    typed, typed_with, Connection, Dest, Frame, FramedTransport, IntoTerm, Messages, ModulePath,
    Node, NodeError, RpcCall, RpcError, TcpTransport, Transport, TypedMessages,
};

// Wire vocabulary used in nearly every signature.
pub use girder_etf::{EtfBuffer, Pid, Port, Reference, Term};

// Policy types show up at every typed send/encode call site.
pub use girder_bridge::{KeyedPolicy, Policy, StringPolicy, UnkeyedPolicy};

// The rpc! macro lands at the crate root via #[macro_export]; re-export
// it so `girder::rpc!` works.
pub use girder_node::rpc;

// Re-export serde for derives on types that cross the bridge.
pub use serde;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use girder::prelude::*;
/// ```
pub mod prelude {
    pub use crate::rpc;
    pub use crate::{Connection, Node, Policy, Term};
    pub use girder_bridge::wrap::{
        AsAtom, AsBinary, AsCharlist, AsKeywordList, AsList, AsMap, AsTuple,
    };
    pub use serde::{Deserialize, Serialize};
}
