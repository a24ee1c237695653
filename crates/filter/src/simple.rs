use smallvec::SmallVec;

use crate::expr::{CmpOp, FilterNode};

/// The hash-bucket form of a *simple* filter over a fixed key set.
///
/// A filter is simple when it reduces to equality tests on hashable keys:
/// a wildcard-free `(key=value)` leaf, a disjunction of simples, or a
/// conjunction whose operands each constrain a distinct key. Simple filters
/// never need to be evaluated during dispatch; an event matches exactly when
/// its value for some constrained key appears in that key's value set (or,
/// for conjunctions, for every constrained key).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalCache {
	// Indexed like the key slice passed to `classify`. An empty set means
	// the key is unconstrained.
	per_key: Vec<SmallVec<[String; 2]>>,
	conjunctive: bool,
}

impl LocalCache {
	pub fn num_keys(&self) -> usize {
		self.per_key.len()
	}

	/// The accepted values for the key at `key_index`.
	pub fn values(&self, key_index: usize) -> &[String] {
		&self.per_key[key_index]
	}

	pub fn values_mut(&mut self, key_index: usize) -> &mut SmallVec<[String; 2]> {
		&mut self.per_key[key_index]
	}

	/// Whether a match requires a hit on every constrained key rather than
	/// on any one of them.
	pub fn is_conjunctive(&self) -> bool {
		self.conjunctive
	}

	pub fn constrained_keys(&self) -> impl Iterator<Item = usize> + '_ {
		self.per_key
			.iter()
			.enumerate()
			.filter(|(_, v)| !v.is_empty())
			.map(|(i, _)| i)
	}
}

/// Classifies `node` as simple over `keys`, compared case-insensitively.
pub(crate) fn classify(node: &FilterNode, keys: &[&str]) -> Option<LocalCache> {
	match node {
		FilterNode::Cmp { .. } | FilterNode::Or(_) => {
			let mut per_key = vec![SmallVec::new(); keys.len()];
			collect_disjunctive(node, keys, &mut per_key)?;
			Some(LocalCache {
				per_key,
				conjunctive: false,
			})
		}
		FilterNode::And(args) => {
			let mut per_key: Vec<SmallVec<[String; 2]>> = vec![SmallVec::new(); keys.len()];
			for arg in args {
				let (idx, values) = single_key(arg, keys)?;
				// Two conjuncts on the same key would need intersection
				// semantics the bucket form cannot express.
				if !per_key[idx].is_empty() {
					return None;
				}
				per_key[idx] = values;
			}
			Some(LocalCache {
				per_key,
				conjunctive: true,
			})
		}
		FilterNode::Not(_) => None,
	}
}

/// A wildcard-free equality leaf on a hashable key, or a disjunction of
/// such. Accumulates values into the per-key sets.
fn collect_disjunctive(
	node: &FilterNode,
	keys: &[&str],
	per_key: &mut [SmallVec<[String; 2]>],
) -> Option<()> {
	match node {
		FilterNode::Cmp { attr, op, pattern } => {
			if *op != CmpOp::Eq {
				return None;
			}
			let idx = keys.iter().position(|k| attr.eq_ignore_ascii_case(k))?;
			let literal = pattern.as_literal()?;
			if !per_key[idx].iter().any(|v| v == literal) {
				per_key[idx].push(literal.to_string());
			}
			Some(())
		}
		FilterNode::Or(args) => {
			for arg in args {
				collect_disjunctive(arg, keys, per_key)?;
			}
			Some(())
		}
		FilterNode::And(_) | FilterNode::Not(_) => None,
	}
}

/// A leaf or disjunction that constrains exactly one hashable key.
fn single_key(node: &FilterNode, keys: &[&str]) -> Option<(usize, SmallVec<[String; 2]>)> {
	let mut per_key: Vec<SmallVec<[String; 2]>> = vec![SmallVec::new(); keys.len()];
	collect_disjunctive(node, keys, &mut per_key)?;
	let mut constrained = per_key
		.iter()
		.enumerate()
		.filter(|(_, v)| !v.is_empty())
		.map(|(i, _)| i);
	let idx = constrained.next()?;
	if constrained.next().is_some() {
		return None;
	}
	Some((idx, std::mem::take(&mut per_key[idx])))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Filter;

	const KEYS: &[&str] = &["objectClass", "service.id"];

	fn cache_of(text: &str) -> Option<LocalCache> {
		Filter::parse(text).unwrap().simple_cache(KEYS)
	}

	#[test]
	fn leaf_on_hashable_key_is_simple() {
		let cache = cache_of("(objectClass=Log)").unwrap();
		assert_eq!(cache.values(0), ["Log"]);
		assert!(cache.values(1).is_empty());
		assert!(!cache.is_conjunctive());
	}

	#[test]
	fn key_comparison_ignores_case() {
		let cache = cache_of("(OBJECTCLASS=Log)").unwrap();
		assert_eq!(cache.values(0), ["Log"]);
	}

	#[test]
	fn disjunction_unions_values() {
		let cache = cache_of("(|(objectClass=A)(objectClass=B)(service.id=7))").unwrap();
		assert_eq!(cache.values(0), ["A", "B"]);
		assert_eq!(cache.values(1), ["7"]);
		assert!(!cache.is_conjunctive());
	}

	#[test]
	fn conjunction_of_distinct_keys_is_simple() {
		let cache = cache_of("(&(objectClass=Log)(service.id=7))").unwrap();
		assert_eq!(cache.values(0), ["Log"]);
		assert_eq!(cache.values(1), ["7"]);
		assert!(cache.is_conjunctive());

		let cache = cache_of("(&(|(objectClass=A)(objectClass=B))(service.id=7))").unwrap();
		assert_eq!(cache.values(0), ["A", "B"]);
		assert!(cache.is_conjunctive());
	}

	#[test]
	fn conjunction_on_one_key_repeated_is_not_simple() {
		assert!(cache_of("(&(objectClass=A)(objectClass=B))").is_none());
	}

	#[test]
	fn complicated_shapes_are_rejected() {
		assert!(cache_of("(name=x)").is_none());
		assert!(cache_of("(objectClass=Log*)").is_none());
		assert!(cache_of("(objectClass>=Log)").is_none());
		assert!(cache_of("(!(objectClass=Log))").is_none());
		assert!(cache_of("(|(objectClass=A)(name=x))").is_none());
		assert!(cache_of("(&(objectClass=A)(name=x))").is_none());
	}

	#[test]
	fn match_all_is_not_simple() {
		assert!(cache_of("").is_none());
	}

	#[test]
	fn constrained_keys_skips_empty_sets() {
		let cache = cache_of("(service.id=7)").unwrap();
		assert_eq!(cache.constrained_keys().collect::<Vec<_>>(), [1]);
	}
}
