/// A dynamically typed property value.
///
/// Filter comparisons follow the value's type: numeric types parse the filter
/// literal and compare numerically, strings compare lexicographically (or by
/// wildcard pattern for equality), and list types match if any element does.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	Str(String),
	Int(i64),
	Float(f64),
	Bool(bool),
	StrList(Vec<String>),
	List(Vec<Value>),
}

impl Value {
	/// Returns the integer payload, if this is an [`Value::Int`].
	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(i) => Some(*i),
			_ => None,
		}
	}

	/// Returns the string payload, if this is a [`Value::Str`].
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(s) => Some(s),
			_ => None,
		}
	}

	/// Returns the string-list payload, if this is a [`Value::StrList`].
	pub fn as_str_list(&self) -> Option<&[String]> {
		match self {
			Value::StrList(l) => Some(l),
			_ => None,
		}
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::Str(s.to_string())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::Str(s)
	}
}

impl From<i64> for Value {
	fn from(i: i64) -> Self {
		Value::Int(i)
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Value::Bool(b)
	}
}

impl From<f64> for Value {
	fn from(f: f64) -> Self {
		Value::Float(f)
	}
}

impl From<Vec<String>> for Value {
	fn from(l: Vec<String>) -> Self {
		Value::StrList(l)
	}
}
