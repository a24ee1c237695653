use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::parse::{self, ParseError};
use crate::props::PropertyMap;
use crate::simple::{self, LocalCache};
use crate::value::Value;

/// Comparison operator of a leaf node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CmpOp {
	/// `=` — equality, with `*` wildcards in the literal.
	Eq,
	/// `<=`
	Le,
	/// `>=`
	Ge,
	/// `~=` — approximate: case-folded, whitespace-stripped equality.
	Approx,
}

/// One segment of a comparison literal. `*` in an unescaped value position
/// becomes [`PatTok::Any`]; everything else is literal text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum PatTok {
	Text(String),
	Any,
}

/// The right-hand side of a comparison, pre-split at wildcards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Pattern {
	pub(crate) toks: Vec<PatTok>,
}

impl Pattern {
	pub(crate) fn literal(text: String) -> Self {
		if text.is_empty() {
			Pattern { toks: Vec::new() }
		} else {
			Pattern {
				toks: vec![PatTok::Text(text)],
			}
		}
	}

	/// True when the pattern is exactly one wildcard (`=*` presence test).
	pub(crate) fn is_pure_wildcard(&self) -> bool {
		self.toks == [PatTok::Any]
	}

	pub(crate) fn has_wildcard(&self) -> bool {
		self.toks.iter().any(|t| matches!(t, PatTok::Any))
	}

	/// The literal text, if the pattern contains no wildcard.
	pub(crate) fn as_literal(&self) -> Option<&str> {
		match self.toks.as_slice() {
			[] => Some(""),
			[PatTok::Text(t)] => Some(t),
			_ => None,
		}
	}

	/// The raw text with wildcards rendered as `*`, used for ordering and
	/// approximate comparisons where a wildcard has no special meaning.
	pub(crate) fn text_lossy(&self) -> String {
		let mut out = String::new();
		for tok in &self.toks {
			match tok {
				PatTok::Text(t) => out.push_str(t),
				PatTok::Any => out.push('*'),
			}
		}
		out
	}

	/// Wildcard pattern match against `s`.
	pub(crate) fn matches(&self, s: &str) -> bool {
		match_toks(&self.toks, s)
	}
}

fn match_toks(toks: &[PatTok], s: &str) -> bool {
	match toks.split_first() {
		None => s.is_empty(),
		Some((PatTok::Text(t), rest)) => s
			.strip_prefix(t.as_str())
			.is_some_and(|tail| match_toks(rest, tail)),
		Some((PatTok::Any, rest)) => {
			if rest.is_empty() {
				return true;
			}
			(0..=s.len())
				.filter(|i| s.is_char_boundary(*i))
				.any(|i| match_toks(rest, &s[i..]))
		}
	}
}

/// A node of the parsed expression tree.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum FilterNode {
	And(Vec<FilterNode>),
	Or(Vec<FilterNode>),
	Not(Box<FilterNode>),
	Cmp {
		attr: String,
		op: CmpOp,
		pattern: Pattern,
	},
}

/// An immutable, cheaply clonable filter expression.
///
/// Parsed once from the LDAP-style prefix grammar, evaluated many times.
/// The empty string parses to the distinguished match-everything filter.
#[derive(Clone, Debug)]
pub struct Filter {
	// `None` is the match-everything filter.
	node: Option<Arc<FilterNode>>,
}

impl Filter {
	/// Parses filter text. An empty string yields [`Filter::match_all`].
	pub fn parse(text: &str) -> Result<Filter, ParseError> {
		if text.trim().is_empty() {
			return Ok(Filter::match_all());
		}
		let node = parse::parse(text)?;
		Ok(Filter {
			node: Some(Arc::new(node)),
		})
	}

	/// The filter that matches every property map.
	pub fn match_all() -> Filter {
		Filter { node: None }
	}

	/// Builds `(attr=value)` programmatically, escaping the literal so `(`,
	/// `)`, `*` and `\` in `value` match themselves.
	pub fn equality(attr: &str, value: &str) -> Filter {
		Filter {
			node: Some(Arc::new(FilterNode::Cmp {
				attr: attr.to_string(),
				op: CmpOp::Eq,
				pattern: Pattern::literal(value.to_string()),
			})),
		}
	}

	/// Conjunction of two filters. Match-everything operands are absorbed.
	pub fn and(&self, other: &Filter) -> Filter {
		match (&self.node, &other.node) {
			(None, _) => other.clone(),
			(_, None) => self.clone(),
			(Some(a), Some(b)) => Filter {
				node: Some(Arc::new(FilterNode::And(vec![
					(**a).clone(),
					(**b).clone(),
				]))),
			},
		}
	}

	pub fn is_match_all(&self) -> bool {
		self.node.is_none()
	}

	/// Evaluates the filter against a property map.
	pub fn matches(&self, props: &PropertyMap) -> bool {
		match &self.node {
			None => true,
			Some(node) => eval(node, props),
		}
	}

	/// Classifies this filter as *simple* over `hashable_keys` (compared
	/// case-insensitively), returning the per-key literal value sets.
	///
	/// Returns `None` for anything that is not a conjunction/disjunction of
	/// wildcard-free equality tests on the given keys; see [`LocalCache`].
	pub fn simple_cache(&self, hashable_keys: &[&str]) -> Option<LocalCache> {
		simple::classify(self.node.as_deref()?, hashable_keys)
	}

	/// The set of `objectClass` literals every match must carry, or `None`
	/// when the filter does not constrain the object class.
	///
	/// Used to prune interface-less registry queries: when this returns
	/// `Some`, only services published under one of the returned classes can
	/// possibly match.
	pub fn matched_object_classes(&self) -> Option<FxHashSet<String>> {
		let mut classes = FxHashSet::default();
		if collect_object_classes(self.node.as_deref()?, &mut classes) {
			Some(classes)
		} else {
			None
		}
	}
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.node {
			None => Ok(()),
			Some(node) => write_node(f, node),
		}
	}
}

impl PartialEq for Filter {
	fn eq(&self, other: &Self) -> bool {
		match (&self.node, &other.node) {
			(None, None) => true,
			(Some(a), Some(b)) => a == b,
			_ => false,
		}
	}
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &FilterNode) -> fmt::Result {
	f.write_str("(")?;
	match node {
		FilterNode::And(args) => {
			f.write_str("&")?;
			for arg in args {
				write_node(f, arg)?;
			}
		}
		FilterNode::Or(args) => {
			f.write_str("|")?;
			for arg in args {
				write_node(f, arg)?;
			}
		}
		FilterNode::Not(arg) => {
			f.write_str("!")?;
			write_node(f, arg)?;
		}
		FilterNode::Cmp { attr, op, pattern } => {
			f.write_str(attr)?;
			f.write_str(match op {
				CmpOp::Eq => "=",
				CmpOp::Le => "<=",
				CmpOp::Ge => ">=",
				CmpOp::Approx => "~=",
			})?;
			for tok in &pattern.toks {
				match tok {
					PatTok::Any => f.write_str("*")?,
					PatTok::Text(t) => {
						for c in t.chars() {
							if matches!(c, '(' | ')' | '*' | '\\') {
								f.write_str("\\")?;
							}
							write!(f, "{c}")?;
						}
					}
				}
			}
		}
	}
	f.write_str(")")
}

fn eval(node: &FilterNode, props: &PropertyMap) -> bool {
	match node {
		FilterNode::And(args) => args.iter().all(|a| eval(a, props)),
		FilterNode::Or(args) => args.iter().any(|a| eval(a, props)),
		FilterNode::Not(arg) => !eval(arg, props),
		FilterNode::Cmp { attr, op, pattern } => match props.get(attr) {
			None => false,
			Some(value) => compare(value, *op, pattern),
		},
	}
}

/// Compares a stored property value against a filter literal. A list-typed
/// property matches if any element does; numeric types parse the literal and
/// compare numerically, with an unparseable literal treated as a non-match.
fn compare(value: &Value, op: CmpOp, pattern: &Pattern) -> bool {
	if op == CmpOp::Eq && pattern.is_pure_wildcard() {
		return true;
	}
	match value {
		Value::Str(s) => compare_string(s, op, pattern),
		Value::StrList(list) => list.iter().any(|s| compare_string(s, op, pattern)),
		Value::List(list) => list.iter().any(|v| compare(v, op, pattern)),
		Value::Int(i) => {
			let Some(lit) = pattern.as_literal().and_then(|l| l.parse::<i64>().ok()) else {
				return false;
			};
			match op {
				CmpOp::Le => *i <= lit,
				CmpOp::Ge => *i >= lit,
				CmpOp::Eq | CmpOp::Approx => *i == lit,
			}
		}
		Value::Float(x) => {
			let Some(lit) = pattern.as_literal().and_then(|l| l.parse::<f64>().ok()) else {
				return false;
			};
			match op {
				CmpOp::Le => *x <= lit,
				CmpOp::Ge => *x >= lit,
				CmpOp::Eq | CmpOp::Approx => (*x - lit).abs() < f64::EPSILON,
			}
		}
		Value::Bool(b) => {
			if matches!(op, CmpOp::Le | CmpOp::Ge) {
				return false;
			}
			let text = if *b { "true" } else { "false" };
			pattern
				.as_literal()
				.is_some_and(|lit| lit.eq_ignore_ascii_case(text))
		}
	}
}

fn compare_string(s: &str, op: CmpOp, pattern: &Pattern) -> bool {
	match op {
		CmpOp::Eq => pattern.matches(s),
		CmpOp::Le => *s <= *pattern.text_lossy(),
		CmpOp::Ge => *s >= *pattern.text_lossy(),
		CmpOp::Approx => fixup(s) == fixup(&pattern.text_lossy()),
	}
}

/// Approximate-match canonical form: whitespace removed, ASCII lowercased.
fn fixup(s: &str) -> String {
	s.chars()
		.filter(|c| !c.is_whitespace())
		.map(|c| c.to_ascii_lowercase())
		.collect()
}

/// Walks the tree collecting objectClass literals any match must carry.
/// AND intersects contributions, OR requires every branch to contribute.
fn collect_object_classes(node: &FilterNode, out: &mut FxHashSet<String>) -> bool {
	match node {
		FilterNode::Cmp { attr, op, pattern } => {
			if *op == CmpOp::Eq && attr.eq_ignore_ascii_case("objectclass") {
				if let Some(lit) = pattern.as_literal() {
					out.insert(lit.to_string());
					return true;
				}
			}
			false
		}
		FilterNode::And(args) => {
			let mut found = false;
			for arg in args {
				let mut branch = FxHashSet::default();
				if collect_object_classes(arg, &mut branch) {
					if found {
						// Several conjuncts constrain the class: only the
						// intersection can match.
						out.retain(|c| branch.contains(c));
					} else {
						*out = branch;
						found = true;
					}
				}
			}
			found
		}
		FilterNode::Or(args) => {
			for arg in args {
				let mut branch = FxHashSet::default();
				if !collect_object_classes(arg, &mut branch) {
					out.clear();
					return false;
				}
				out.extend(branch);
			}
			true
		}
		FilterNode::Not(_) => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn props(pairs: &[(&str, Value)]) -> PropertyMap {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.clone()))
			.collect()
	}

	#[test]
	fn equality_and_composition() {
		let f = Filter::parse("(&(objectClass=Log)(level>=3))").unwrap();

		assert!(f.matches(&props(&[
			("objectClass", Value::from("Log")),
			("level", Value::Int(5)),
		])));
		assert!(!f.matches(&props(&[
			("objectClass", Value::from("Log")),
			("level", Value::Int(2)),
		])));
		assert!(!f.matches(&props(&[("level", Value::Int(5))])));
	}

	#[test]
	fn keys_compare_case_insensitively() {
		let f = Filter::parse("(OBJECTCLASS=Log)").unwrap();
		assert!(f.matches(&props(&[("objectClass", Value::from("Log"))])));
	}

	#[test]
	fn values_compare_case_sensitively() {
		let f = Filter::parse("(objectClass=log)").unwrap();
		assert!(!f.matches(&props(&[("objectClass", Value::from("Log"))])));
	}

	#[test]
	fn list_property_matches_any_element() {
		let f = Filter::parse("(objectClass=B)").unwrap();
		let p = props(&[(
			"objectClass",
			Value::StrList(vec!["A".into(), "B".into()]),
		)]);
		assert!(f.matches(&p));
	}

	#[test]
	fn wildcards() {
		let p = props(&[("name", Value::from("hello world"))]);
		assert!(Filter::parse("(name=hello*)").unwrap().matches(&p));
		assert!(Filter::parse("(name=*world)").unwrap().matches(&p));
		assert!(Filter::parse("(name=h*o*d)").unwrap().matches(&p));
		assert!(!Filter::parse("(name=h*x*d)").unwrap().matches(&p));
		// Presence test.
		assert!(Filter::parse("(name=*)").unwrap().matches(&p));
		assert!(!Filter::parse("(other=*)").unwrap().matches(&p));
	}

	#[test]
	fn escaped_specials_are_literal() {
		let p = props(&[("path", Value::from("a*b(c)"))]);
		assert!(Filter::parse(r"(path=a\*b\(c\))").unwrap().matches(&p));
		assert!(!Filter::parse(r"(path=a\*b)").unwrap().matches(&p));
	}

	#[test]
	fn numeric_comparison_before_lexicographic() {
		// Int property: "10" > "9" numerically even though "10" < "9" as text.
		let p = props(&[("n", Value::Int(10))]);
		assert!(Filter::parse("(n>=9)").unwrap().matches(&p));
		assert!(!Filter::parse("(n<=9)").unwrap().matches(&p));

		// Str property falls back to lexicographic ordering.
		let p = props(&[("n", Value::from("10"))]);
		assert!(!Filter::parse("(n>=9)").unwrap().matches(&p));
	}

	#[test]
	fn unparseable_numeric_literal_is_no_match() {
		let p = props(&[("n", Value::Int(10))]);
		assert!(!Filter::parse("(n=abc)").unwrap().matches(&p));
		assert!(!Filter::parse("(n>=abc)").unwrap().matches(&p));
	}

	#[test]
	fn bool_and_approx() {
		let p = props(&[("enabled", Value::Bool(true))]);
		assert!(Filter::parse("(enabled=TRUE)").unwrap().matches(&p));
		assert!(!Filter::parse("(enabled>=true)").unwrap().matches(&p));

		let p = props(&[("name", Value::from("Hello World"))]);
		assert!(Filter::parse("(name~=helloworld)").unwrap().matches(&p));
	}

	#[test]
	fn not_and_or() {
		let p = props(&[("a", Value::Int(1))]);
		assert!(Filter::parse("(!(a=2))").unwrap().matches(&p));
		assert!(Filter::parse("(|(a=2)(a=1))").unwrap().matches(&p));
		assert!(!Filter::parse("(|(a=2)(a=3))").unwrap().matches(&p));
	}

	#[test]
	fn empty_text_matches_everything() {
		let f = Filter::parse("").unwrap();
		assert!(f.is_match_all());
		assert!(f.matches(&PropertyMap::new()));
	}

	#[test]
	fn missing_key_never_matches() {
		let f = Filter::parse("(!(missing=x))").unwrap();
		// NOT of a non-match on a missing key still matches.
		assert!(f.matches(&PropertyMap::new()));
		let f = Filter::parse("(missing=x)").unwrap();
		assert!(!f.matches(&PropertyMap::new()));
	}

	#[test]
	fn display_roundtrip_escapes() {
		let text = r"(&(objectClass=Log)(path=a\*b\(c\)))";
		let f = Filter::parse(text).unwrap();
		let printed = f.to_string();
		let reparsed = Filter::parse(&printed).unwrap();
		assert_eq!(f, reparsed);
	}

	#[test]
	fn programmatic_equality_escapes_specials() {
		let f = Filter::equality("name", "a*b");
		let p = props(&[("name", Value::from("a*b"))]);
		let q = props(&[("name", Value::from("axxb"))]);
		assert!(f.matches(&p));
		assert!(!f.matches(&q));
	}

	#[test]
	fn and_combinator_absorbs_match_all() {
		let f = Filter::equality("objectClass", "Log");
		assert_eq!(f.and(&Filter::match_all()), f);
		assert_eq!(Filter::match_all().and(&f), f);

		let g = f.and(&Filter::parse("(level>=3)").unwrap());
		assert!(g.matches(&props(&[
			("objectClass", Value::from("Log")),
			("level", Value::Int(3)),
		])));
	}

	#[test]
	fn matched_object_classes_intersection_and_union() {
		let f = Filter::parse("(objectClass=A)").unwrap();
		let classes = f.matched_object_classes().unwrap();
		assert!(classes.contains("A") && classes.len() == 1);

		let f = Filter::parse("(|(objectClass=A)(objectClass=B))").unwrap();
		let classes = f.matched_object_classes().unwrap();
		assert_eq!(classes.len(), 2);

		// One OR branch without a class constraint poisons the whole set.
		let f = Filter::parse("(|(objectClass=A)(x=1))").unwrap();
		assert!(f.matched_object_classes().is_none());

		// AND intersects.
		let f = Filter::parse("(&(objectClass=A)(|(objectClass=A)(objectClass=B)))").unwrap();
		let classes = f.matched_object_classes().unwrap();
		assert!(classes.contains("A") && classes.len() == 1);

		// Wildcarded class values disqualify.
		let f = Filter::parse("(objectClass=A*)").unwrap();
		assert!(f.matched_object_classes().is_none());
	}
}
