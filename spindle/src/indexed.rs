//! Utilities for working with containers with strongly-typed indexes.
use serde::{Deserialize, Serialize};

/// A `Vec<Value>` which may only be indexed with `Index`
///
/// The `Index` type should be a wrapper around a `usize` and be convertible in
/// both directions; it is typically built with `define_index!`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
#[serde(bound(
    serialize = "Value: Serialize",
    deserialize = "Value: Deserialize<'de>"
))]
pub struct IndexVec<Value, Index> {
    data: Vec<Value>,
    #[serde(skip)]
    _phantom: std::marker::PhantomData<fn() -> Index>,
}

impl<Value, Index> Default for IndexVec<Value, Index> {
    fn default() -> Self {
        Self {
            data: vec![],
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<Value, Index> IndexVec<Value, Index>
where
    Index: From<usize>,
    usize: From<Index>,
{
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_capacity(n: usize) -> Self {
        Vec::with_capacity(n).into()
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// Pushes a value, returning its index
    pub fn push(&mut self, v: Value) -> Index {
        let out = Index::from(self.data.len());
        self.data.push(v);
        out
    }
    pub fn get(&self, i: Index) -> Option<&Value> {
        self.data.get(usize::from(i))
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.data.iter()
    }
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Value> {
        self.data.iter_mut()
    }
    /// Iterates over `(index, value)` tuples
    pub fn enumerate(&self) -> impl Iterator<Item = (Index, &Value)> {
        self.data.iter().enumerate().map(|(i, v)| (Index::from(i), v))
    }
    /// Iterates over every valid index
    pub fn keys(&self) -> impl Iterator<Item = Index> + use<Value, Index> {
        (0..self.data.len()).map(Index::from)
    }
}

impl<Value: Clone, Index> IndexVec<Value, Index> {
    pub fn resize(&mut self, n: usize, v: Value) {
        self.data.resize(n, v);
    }
}

impl<Value, Index> std::ops::Index<Index> for IndexVec<Value, Index>
where
    usize: From<Index>,
{
    type Output = Value;
    fn index(&self, i: Index) -> &Value {
        &self.data[usize::from(i)]
    }
}

impl<Value, Index> std::ops::IndexMut<Index> for IndexVec<Value, Index>
where
    usize: From<Index>,
{
    fn index_mut(&mut self, i: Index) -> &mut Value {
        &mut self.data[usize::from(i)]
    }
}

impl<Value, Index> From<Vec<Value>> for IndexVec<Value, Index> {
    fn from(data: Vec<Value>) -> Self {
        Self {
            data,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<Value, Index> FromIterator<Value> for IndexVec<Value, Index> {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

////////////////////////////////////////////////////////////////////////////////

macro_rules! define_index {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Copy,
            Clone,
            Debug,
            Eq,
            PartialEq,
            Hash,
            Ord,
            PartialOrd,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(usize);
        impl $name {
            /// Returns the raw index
            pub fn get(&self) -> usize {
                self.0
            }
        }
        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                Self(v)
            }
        }
        impl From<$name> for usize {
            fn from(v: $name) -> Self {
                v.0
            }
        }
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}
pub(crate) use define_index;
