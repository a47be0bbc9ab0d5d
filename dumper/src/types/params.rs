use std::collections::BTreeMap;
use std::collections::btree_map;

use crate::types::Value;

/// A counter row: a key/value bag with at least the fields of a job's schema.
pub type Row = Params;

/// An ordered key/value bag.
///
/// Used for run arguments, common parameters, partition descriptors and rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Builder style [`Params::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Copies every entry of `other` into `self`, replacing existing keys.
    pub fn extend_from(&mut self, other: &Params) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Returns `self` with the entries of `other` layered on top.
    pub fn merged(&self, other: &Params) -> Params {
        let mut merged = self.clone();
        merged.extend_from(other);
        merged
    }

    /// Returns `true` when every entry of `other` has an entry in `self` with the same text.
    ///
    /// Counter stores keep partition values as text, so `Date(2015-01-20)` matches
    /// `"2015-01-20"` and `Integer(2)` matches `"2"`.
    pub fn matches(&self, other: &Params) -> bool {
        other.iter().all(|(key, value)| {
            self.get(key)
                .is_some_and(|own| own == value || own.to_string() == value.to_string())
        })
    }

    /// Returns only the entries whose key is listed in `keys`.
    pub fn select<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Params {
        keys.into_iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value.clone())))
            .collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Params(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Params
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl IntoIterator for Params {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
