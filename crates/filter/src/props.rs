use rustc_hash::FxHashMap;

use crate::value::Value;

/// A property map with case-preserving but case-insensitively compared keys.
///
/// `get("objectclass")` and `get("objectClass")` resolve to the same entry;
/// iteration yields the spelling the key was inserted with.
#[derive(Clone, Debug, Default)]
pub struct PropertyMap {
	// Keyed by the ASCII-lowercased key; the entry keeps the original spelling.
	entries: FxHashMap<Box<str>, Entry>,
}

#[derive(Clone, Debug)]
struct Entry {
	key: String,
	value: Value,
}

impl PropertyMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a key/value pair, replacing any entry whose key compares equal
	/// case-insensitively. Returns the replaced value.
	pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
		let key = key.into();
		let folded = key.to_ascii_lowercase().into_boxed_str();
		self.entries
			.insert(folded, Entry { key, value })
			.map(|e| e.value)
	}

	/// Case-insensitive lookup.
	pub fn get(&self, key: &str) -> Option<&Value> {
		if let Some(e) = self.entries.get(key) {
			return Some(&e.value);
		}
		let folded = key.to_ascii_lowercase();
		self.entries.get(folded.as_str()).map(|e| &e.value)
	}

	/// Removes an entry, returning its value.
	pub fn remove(&mut self, key: &str) -> Option<Value> {
		let folded = key.to_ascii_lowercase();
		self.entries.remove(folded.as_str()).map(|e| e.value)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.get(key).is_some()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Iterates over entries with their original key spelling.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.entries.values().map(|e| (e.key.as_str(), &e.value))
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.entries.values().map(|e| e.key.as_str())
	}
}

impl PartialEq for PropertyMap {
	fn eq(&self, other: &Self) -> bool {
		self.entries.len() == other.entries.len()
			&& self
				.entries
				.iter()
				.all(|(k, e)| other.entries.get(k).is_some_and(|o| o.value == e.value))
	}
}

impl<K: Into<String>> FromIterator<(K, Value)> for PropertyMap {
	fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
		let mut map = Self::new();
		for (k, v) in iter {
			map.insert(k, v);
		}
		map
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn case_insensitive_lookup_preserves_spelling() {
		let mut props = PropertyMap::new();
		props.insert("objectClass", Value::from("Log"));

		assert_eq!(props.get("objectclass"), Some(&Value::from("Log")));
		assert_eq!(props.get("OBJECTCLASS"), Some(&Value::from("Log")));
		assert_eq!(props.keys().collect::<Vec<_>>(), vec!["objectClass"]);
	}

	#[test]
	fn insert_replaces_case_insensitively() {
		let mut props = PropertyMap::new();
		props.insert("Rank", Value::Int(1));
		let old = props.insert("rank", Value::Int(2));

		assert_eq!(old, Some(Value::Int(1)));
		assert_eq!(props.len(), 1);
		assert_eq!(props.get("RANK"), Some(&Value::Int(2)));
	}
}
