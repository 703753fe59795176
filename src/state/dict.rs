use std::collections::HashMap;

use burn::tensor::TensorData;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Insertion-ordered mapping from a state name to a value.
///
/// Iteration order is the order names were first inserted, which is also the
/// order entries are written to disk. Re-inserting a name replaces its value
/// in place.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDict<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

/// Parameter name to tensor.
pub type ParamState = StateDict<TensorData>;

/// Optimizer slot name to tensor or scalar.
pub type OptimizerState = StateDict<StateValue>;

/// A single optimizer state entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    Tensor(TensorData),
    Float(f64),
    Int(i64),
}

impl<V> Default for StateDict<V> {
    fn default() -> Self {
        StateDict {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> StateDict<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        if let Some(&i) = self.index.get(&name) {
            return Some(std::mem::replace(&mut self.entries[i].1, value));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push((name, value));
        None
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overwrite entries present in `other`; names only in `self` keep their values.
    pub fn merge(&mut self, other: StateDict<V>) {
        for (name, value) in other {
            self.insert(name, value);
        }
    }
}

impl<V> FromIterator<(String, V)> for StateDict<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut dict = StateDict::new();
        for (name, value) in iter {
            dict.insert(name, value);
        }
        dict
    }
}

impl<V> IntoIterator for StateDict<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<V: Serialize> Serialize for StateDict<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for StateDict<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<(String, V)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(values: Vec<f32>, shape: Vec<usize>) -> TensorData {
        TensorData::new(values, shape)
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut dict = ParamState::new();
        dict.insert("conv.weight", tensor(vec![0.0; 4], vec![2, 2]));
        dict.insert("bn.bias", tensor(vec![0.0; 3], vec![3]));
        dict.insert("a.weight", tensor(vec![0.0; 1], vec![1]));

        let keys: Vec<&str> = dict.keys().collect();
        assert_eq!(keys, vec!["conv.weight", "bn.bias", "a.weight"]);
    }

    #[test]
    fn test_reinsert_replaces_in_place() {
        let mut dict = OptimizerState::new();
        dict.insert("step", StateValue::Int(1));
        dict.insert("lr", StateValue::Float(0.1));
        let previous = dict.insert("step", StateValue::Int(2));

        assert_eq!(previous, Some(StateValue::Int(1)));
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.keys().next(), Some("step"));
        assert_eq!(dict.get("step"), Some(&StateValue::Int(2)));
    }

    #[test]
    fn test_merge_keeps_unmentioned_entries() {
        let mut target = ParamState::new();
        target.insert("a", tensor(vec![1.0, 2.0], vec![2]));
        target.insert("b", tensor(vec![3.0], vec![1]));

        let mut update = ParamState::new();
        update.insert("a", tensor(vec![9.0, 9.0], vec![2]));
        target.merge(update);

        assert_eq!(
            target.get("a").unwrap().to_vec::<f32>().unwrap(),
            vec![9.0, 9.0]
        );
        assert_eq!(target.get("b").unwrap().to_vec::<f32>().unwrap(), vec![3.0]);
    }

    #[test]
    fn test_json_keeps_order() {
        let mut dict = OptimizerState::new();
        dict.insert("z_moment", StateValue::Float(0.5));
        dict.insert("a_step", StateValue::Int(10));

        let json = serde_json::to_string(&dict).unwrap();
        let restored: OptimizerState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.keys().collect::<Vec<_>>(), vec!["z_moment", "a_step"]);
        assert_eq!(restored, dict);
    }
}
