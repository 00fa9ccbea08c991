//! Encode policies.
//!
//! Policy is ambient state on the serializer, scoped to the subtree it
//! was set for: the wrapper types in [`crate::wrap`] save the active
//! policy on entry and restore it on every exit path, including errors.

/// How text becomes ETF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringPolicy {
    /// UTF-8 bytes in a BINARY. The Elixir string convention.
    #[default]
    Binary,
    /// An interned atom (SMALL_ATOM_UTF8 / ATOM_UTF8).
    Atom,
    /// The charlist form: STRING when compact, a list of code points
    /// otherwise. The Erlang string convention.
    Charlist,
}

/// How ordered groups (sequences, tuples) become ETF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnkeyedPolicy {
    /// Shape-natural: serde sequences become lists, serde tuples stay
    /// tuples.
    #[default]
    Natural,
    /// Everything ordered becomes a proper list.
    List,
    /// Everything ordered becomes a tuple.
    Tuple,
}

/// How keyed groups (structs, maps) become ETF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedPolicy {
    /// A MAP; string keys encoded per the inner [`StringPolicy`].
    Map { keys: StringPolicy },
    /// A proper list of `{atom, value}` 2-tuples, preserving insertion
    /// order.
    KeywordList,
}

impl Default for KeyedPolicy {
    fn default() -> Self {
        KeyedPolicy::Map {
            keys: StringPolicy::Atom,
        }
    }
}

/// The active policy triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    pub string: StringPolicy,
    pub unkeyed: UnkeyedPolicy,
    pub keyed: KeyedPolicy,
}

impl Policy {
    pub fn new() -> Policy {
        Policy::default()
    }

    pub fn with_string(mut self, string: StringPolicy) -> Policy {
        self.string = string;
        self
    }

    pub fn with_unkeyed(mut self, unkeyed: UnkeyedPolicy) -> Policy {
        self.unkeyed = unkeyed;
        self
    }

    pub fn with_keyed(mut self, keyed: KeyedPolicy) -> Policy {
        self.keyed = keyed;
        self
    }
}
