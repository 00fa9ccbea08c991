//! Remote-call DSL.
//!
//! The [`rpc!`] macro spells a remote call the way the remote side
//! reads it:
//!
//! ```ignore
//! let count = rpc!(conn, Elixir.Enum.count(Term::list(items))).await?;
//! let node  = rpc!(conn, erlang.node()).await?;
//! ```
//!
//! Path segments before the last join into the module name (`Elixir.`
//! first reaches Elixir modules, a bare segment reaches Erlang
//! modules); the last segment is the function. Arguments are anything
//! `Into<Term>`; typed values go through [`typed`] first.
//!
//! [`RpcCall`] is the dynamic twin for paths built at runtime.

use serde::Serialize;

use girder_bridge::Policy;
use girder_etf::Term;

use crate::connection::Connection;
use crate::RpcError;

/// Argument conversion for [`rpc!`]. Blanket-covers every
/// `Into<Term>`, so raw terms and plain scalars pass as they are.
pub trait IntoTerm {
    fn into_term(self) -> Term;
}

impl<T: Into<Term>> IntoTerm for T {
    fn into_term(self) -> Term {
        self.into()
    }
}

/// Encode a typed value into a [`Term`] for use as an RPC argument
/// (the mixed-argument path of the DSL), under the default policy.
pub fn typed<T: Serialize>(value: &T) -> Result<Term, RpcError> {
    girder_bridge::to_term(value, Policy::new()).map_err(RpcError::Decode)
}

/// Encode a typed value into a [`Term`] under an explicit policy.
pub fn typed_with<T: Serialize>(value: &T, policy: Policy) -> Result<Term, RpcError> {
    girder_bridge::to_term(value, policy).map_err(RpcError::Decode)
}

/// A module path built at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePath {
    segments: Vec<String>,
}

impl ModulePath {
    /// An Elixir module: `ModulePath::elixir("Enum")` names
    /// `Elixir.Enum`.
    pub fn elixir(root: impl Into<String>) -> ModulePath {
        ModulePath {
            segments: vec!["Elixir".to_string(), root.into()],
        }
    }

    /// An Erlang module: plain name, no prefix.
    pub fn erlang(name: impl Into<String>) -> ModulePath {
        ModulePath {
            segments: vec![name.into()],
        }
    }

    /// Append a nested path segment (`Elixir.Phoenix` →
    /// `Elixir.Phoenix.PubSub`).
    pub fn join(mut self, segment: impl Into<String>) -> ModulePath {
        self.segments.push(segment.into());
        self
    }

    /// The full module name as the remote resolves it.
    pub fn name(&self) -> String {
        self.segments.join(".")
    }

    /// Start building a call to `function` on this module.
    pub fn call(self, function: impl Into<String>) -> RpcCall {
        RpcCall {
            path: self,
            function: function.into(),
            args: Vec::new(),
            connection: None,
        }
    }
}

/// A dynamically-built remote call.
#[derive(Debug, Clone)]
pub struct RpcCall {
    path: ModulePath,
    function: String,
    args: Vec<Term>,
    connection: Option<Connection>,
}

impl RpcCall {
    /// Append an argument.
    pub fn arg(mut self, value: impl IntoTerm) -> RpcCall {
        self.args.push(value.into_term());
        self
    }

    /// Bind the connection the call runs on.
    pub fn over(mut self, connection: &Connection) -> RpcCall {
        self.connection = Some(connection.clone());
        self
    }

    /// Run the call. A call built without [`RpcCall::over`] answers
    /// `MissingConnection`.
    pub async fn invoke(self) -> Result<Term, RpcError> {
        let connection = self.connection.ok_or(RpcError::MissingConnection)?;
        connection
            .rpc(&self.path.name(), &self.function, self.args)
            .await
    }
}

/// Call a remote function with module/function spelled as a path.
///
/// Expands to `connection.rpc("Module.Path", "function", args)`; the
/// result is a future to await.
#[macro_export]
macro_rules! rpc {
    ($conn:expr, $root:ident $(. $seg:ident)+ ( $($arg:expr),* $(,)? )) => {{
        // The pattern guarantees at least two segments.
        let segments = [stringify!($root) $(, stringify!($seg))+];
        let module = segments[..segments.len() - 1].join(".");
        let function = segments[segments.len() - 1].to_string();
        let args = vec![$($crate::dsl::IntoTerm::into_term($arg)),*];
        let conn = $conn;
        async move { conn.rpc(&module, &function, args).await }
    }};
}
