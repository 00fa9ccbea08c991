//! Per-subtree policy override wrappers.
//!
//! Wrapping a field routes its whole subtree through a different
//! policy: `AsAtom<String>` sends the text as an atom regardless of the
//! ambient string policy, `AsKeywordList<Config>` turns a struct into a
//! keyword list, and so on. The serializer recognises the marker
//! newtype names below; on decode the wrappers are transparent (the
//! decoder already accepts every shape a policy can produce).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub(crate) const MARKER_ATOM: &str = "$girder::atom";
pub(crate) const MARKER_BINARY: &str = "$girder::binary";
pub(crate) const MARKER_CHARLIST: &str = "$girder::charlist";
pub(crate) const MARKER_TUPLE: &str = "$girder::tuple";
pub(crate) const MARKER_LIST: &str = "$girder::list";
pub(crate) const MARKER_KEYWORD_LIST: &str = "$girder::keyword_list";
pub(crate) const MARKER_MAP: &str = "$girder::map";

macro_rules! override_wrapper {
    ($(#[$doc:meta])* $name:ident, $marker:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name<T>(pub T);

        impl<T> $name<T> {
            pub fn into_inner(self) -> T {
                self.0
            }
        }

        impl<T: Serialize> Serialize for $name<T> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_newtype_struct($marker, &self.0)
            }
        }

        impl<'de, T: Deserialize<'de>> Deserialize<'de> for $name<T> {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                T::deserialize(deserializer).map($name)
            }
        }

        impl<T> From<T> for $name<T> {
            fn from(inner: T) -> Self {
                $name(inner)
            }
        }
    };
}

override_wrapper!(
    /// Text inside becomes atoms.
    AsAtom,
    MARKER_ATOM
);
override_wrapper!(
    /// Text inside becomes binaries.
    AsBinary,
    MARKER_BINARY
);
override_wrapper!(
    /// Text inside becomes charlists.
    AsCharlist,
    MARKER_CHARLIST
);
override_wrapper!(
    /// Ordered groups inside become tuples.
    AsTuple,
    MARKER_TUPLE
);
override_wrapper!(
    /// Ordered groups inside become proper lists.
    AsList,
    MARKER_LIST
);
override_wrapper!(
    /// Keyed groups inside become keyword lists.
    AsKeywordList,
    MARKER_KEYWORD_LIST
);
override_wrapper!(
    /// Keyed groups inside become maps with atom keys.
    AsMap,
    MARKER_MAP
);
