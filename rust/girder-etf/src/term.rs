//! The term sum type.
//!
//! One variant per ETF tag family after canonicalisation. Equality and
//! hashing are structural over every carried field; floats compare by
//! IEEE-754 bit pattern so `Term` can be `Eq + Hash` (identical NaN
//! payloads are equal, `0.0 != -0.0`).

use std::hash::{Hash, Hasher};

/// A process identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pid {
    pub node: String,
    pub num: u32,
    pub serial: u32,
    pub creation: u32,
}

/// A port identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Port {
    pub node: String,
    pub id: u64,
    pub creation: u32,
}

/// A reference. `ids` is kept in wire order (at most 5 words).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub node: String,
    pub creation: u32,
    pub ids: Vec<u32>,
}

/// A closure fun (NEW_FUN_EXT). All fields are carried verbatim so a
/// decoded fun re-encodes byte-for-byte; the crate never mints funs of
/// its own.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Closure {
    pub arity: u8,
    pub uniq: [u8; 16],
    pub index: u32,
    pub module: String,
    pub old_index: i64,
    pub old_uniq: i64,
    pub pid: Pid,
    pub free: Vec<Term>,
}

/// An old-style closure fun (FUN_EXT).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LegacyClosure {
    pub pid: Pid,
    pub module: String,
    pub index: i64,
    pub uniq: i64,
    pub free: Vec<Term>,
}

/// An exported or closure fun, opaque to callers.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Fun {
    Export {
        module: String,
        function: String,
        arity: u8,
    },
    Closure(Box<Closure>),
    Legacy(Box<LegacyClosure>),
}

/// An External Term Format value.
#[derive(Clone)]
pub enum Term {
    Int(i64),
    Float(f64),
    Atom(String),
    /// The charlist shorthand (STRING_EXT): a compact list of small
    /// integers. Distinct from `Binary`.
    String(String),
    Binary(Vec<u8>),
    /// Byte-aligned bits; the second field is the number of significant
    /// bits in the final byte (`1..=8`, or `0` for an empty payload).
    Bitstring(Vec<u8>, u8),
    Tuple(Vec<Term>),
    /// Proper lists only; improper lists are rejected at decode.
    List(Vec<Term>),
    /// Key/value pairs in wire order. Re-encoding preserves the order.
    Map(Vec<(Term, Term)>),
    Pid(Pid),
    Port(Port),
    Reference(Reference),
    Fun(Fun),
}

impl Term {
    /// An atom from anything string-like.
    pub fn atom(name: impl Into<String>) -> Term {
        Term::Atom(name.into())
    }

    /// A binary from anything byte-like.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Term {
        Term::Binary(bytes.into())
    }

    /// A tuple from its elements.
    pub fn tuple(elements: impl Into<Vec<Term>>) -> Term {
        Term::Tuple(elements.into())
    }

    /// A proper list from its elements.
    pub fn list(elements: impl Into<Vec<Term>>) -> Term {
        Term::List(elements.into())
    }

    /// A map from key/value pairs, preserving the given order.
    pub fn map(pairs: impl Into<Vec<(Term, Term)>>) -> Term {
        Term::Map(pairs.into())
    }

    /// The empty list, Erlang's nil.
    pub fn nil() -> Term {
        Term::List(Vec::new())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Term::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Term::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Term, Term)]> {
        match self {
            Term::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    pub fn as_pid(&self) -> Option<&Pid> {
        match self {
            Term::Pid(pid) => Some(pid),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Term::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// True for the empty list.
    pub fn is_nil(&self) -> bool {
        matches!(self, Term::List(elements) if elements.is_empty())
    }

    /// Look up a map value by key, in wire order.
    pub fn get(&self, key: &Term) -> Option<&Term> {
        match self {
            Term::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Int(a), Term::Int(b)) => a == b,
            (Term::Float(a), Term::Float(b)) => a.to_bits() == b.to_bits(),
            (Term::Atom(a), Term::Atom(b)) => a == b,
            (Term::String(a), Term::String(b)) => a == b,
            (Term::Binary(a), Term::Binary(b)) => a == b,
            (Term::Bitstring(a, abits), Term::Bitstring(b, bbits)) => a == b && abits == bbits,
            (Term::Tuple(a), Term::Tuple(b)) => a == b,
            (Term::List(a), Term::List(b)) => a == b,
            (Term::Map(a), Term::Map(b)) => a == b,
            (Term::Pid(a), Term::Pid(b)) => a == b,
            (Term::Port(a), Term::Port(b)) => a == b,
            (Term::Reference(a), Term::Reference(b)) => a == b,
            (Term::Fun(a), Term::Fun(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Term::Int(n) => n.hash(state),
            Term::Float(x) => x.to_bits().hash(state),
            Term::Atom(name) => name.hash(state),
            Term::String(s) => s.hash(state),
            Term::Binary(bytes) => bytes.hash(state),
            Term::Bitstring(bytes, bits) => {
                bytes.hash(state);
                bits.hash(state);
            }
            Term::Tuple(elements) => elements.hash(state),
            Term::List(elements) => elements.hash(state),
            Term::Map(pairs) => pairs.hash(state),
            Term::Pid(pid) => pid.hash(state),
            Term::Port(port) => port.hash(state),
            Term::Reference(reference) => reference.hash(state),
            Term::Fun(fun) => fun.hash(state),
        }
    }
}

impl From<i64> for Term {
    fn from(n: i64) -> Term {
        Term::Int(n)
    }
}

impl From<i32> for Term {
    fn from(n: i32) -> Term {
        Term::Int(n as i64)
    }
}

impl From<u32> for Term {
    fn from(n: u32) -> Term {
        Term::Int(n as i64)
    }
}

impl From<f64> for Term {
    fn from(x: f64) -> Term {
        Term::Float(x)
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Term {
        Term::Atom(if b { "true" } else { "false" }.to_string())
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Term {
        Term::Binary(s.as_bytes().to_vec())
    }
}

impl From<String> for Term {
    fn from(s: String) -> Term {
        Term::Binary(s.into_bytes())
    }
}

impl From<Vec<u8>> for Term {
    fn from(bytes: Vec<u8>) -> Term {
        Term::Binary(bytes)
    }
}

impl From<Vec<Term>> for Term {
    fn from(elements: Vec<Term>) -> Term {
        Term::List(elements)
    }
}

impl From<Pid> for Term {
    fn from(pid: Pid) -> Term {
        Term::Pid(pid)
    }
}

impl From<Reference> for Term {
    fn from(reference: Reference) -> Term {
        Term::Reference(reference)
    }
}

// Debug output follows Elixir inspect conventions. Not a stable
// interface.

impl std::fmt::Debug for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Int(n) => write!(f, "{n}"),
            Term::Float(x) => write!(f, "{x:?}"),
            Term::Atom(name) => write!(f, ":{name}"),
            Term::String(s) => write!(f, "~c{s:?}"),
            Term::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => write!(f, "{s:?}"),
                Err(_) => {
                    write!(f, "<<")?;
                    for (i, b) in bytes.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{b}")?;
                    }
                    write!(f, ">>")
                }
            },
            Term::Bitstring(bytes, bits) => {
                write!(f, "<<")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if i + 1 == bytes.len() && *bits < 8 {
                        write!(f, "{b}::size({bits})")?;
                    } else {
                        write!(f, "{b}")?;
                    }
                }
                write!(f, ">>")
            }
            Term::Tuple(elements) => {
                write!(f, "{{")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element:?}")?;
                }
                write!(f, "}}")
            }
            Term::List(elements) => f.debug_list().entries(elements).finish(),
            Term::Map(pairs) => {
                write!(f, "%{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?} => {v:?}")?;
                }
                write!(f, "}}")
            }
            Term::Pid(pid) => write!(f, "#PID<{}.{}.{}>", pid.node, pid.num, pid.serial),
            Term::Port(port) => write!(f, "#Port<{}.{}>", port.node, port.id),
            Term::Reference(reference) => {
                write!(f, "#Reference<{}", reference.node)?;
                for id in &reference.ids {
                    write!(f, ".{id}")?;
                }
                write!(f, ">")
            }
            Term::Fun(fun) => fun.fmt(f),
        }
    }
}

impl std::fmt::Debug for Fun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fun::Export {
                module,
                function,
                arity,
            } => write!(f, "&{module}.{function}/{arity}"),
            Fun::Closure(closure) => {
                write!(f, "#Function<{}.{} in {}>", closure.index, closure.old_uniq, closure.module)
            }
            Fun::Legacy(closure) => {
                write!(f, "#Function<{}.{} in {}>", closure.index, closure.uniq, closure.module)
            }
        }
    }
}
