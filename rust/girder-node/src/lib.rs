#![deny(unsafe_code)]

//! Distributed-node client.
//!
//! A [`Node`] is a local identity (`name@host` + cookie); connecting it
//! to a remote BEAM node over a [`Transport`] yields a [`Connection`]
//! driven by a single actor task that owns the socket, classifies
//! inbound frames, and fans them out to message subscribers, RPC
//! waiters, and inbound-call handlers.
//!
//! ```ignore
//! let node = Node::new("client@host", "secret")?;
//! let conn = node.connect_tcp("127.0.0.1:9000", "server@host", None).await?;
//!
//! let truth = rpc!(conn, Elixir.Kernel.is_atom(Term::atom("foo"))).await?;
//! conn.send_term("logger", &Term::binary(*b"hello")).await?;
//! ```

pub mod dsl;

mod connection;
mod control;
mod driver;
mod errors;
mod node;
mod transport;

pub use connection::{Connection, Messages, TypedMessages};
pub use control::Dest;
pub use dsl::{typed, typed_with, IntoTerm, ModulePath, RpcCall};
pub use errors::{NodeError, RpcError};
pub use node::Node;
pub use transport::{Frame, FramedTransport, TcpTransport, Transport};

// The wire vocabulary callers need alongside the client.
pub use girder_etf::{Pid, Port, Reference, Term};
