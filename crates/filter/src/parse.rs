use std::fmt;

use thiserror::Error;

use crate::expr::{CmpOp, FilterNode, PatTok, Pattern};

/// Why filter text failed to parse.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseErrorKind {
	/// Input ended inside an expression.
	UnexpectedEnd,
	/// A structural character was missing or misplaced.
	Malformed,
	/// An attribute was followed by something other than `=`, `<=`, `>=`, `~=`.
	UnknownOperator,
	/// Text remained after the closing parenthesis of the outermost expression.
	TrailingGarbage,
}

impl fmt::Display for ParseErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ParseErrorKind::UnexpectedEnd => "unexpected end of input",
			ParseErrorKind::Malformed => "malformed expression",
			ParseErrorKind::UnknownOperator => "unknown comparison operator",
			ParseErrorKind::TrailingGarbage => "trailing characters after expression",
		})
	}
}

/// A filter parse failure, carrying the byte offset it was detected at.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("{kind} at offset {pos}")]
pub struct ParseError {
	pub pos: usize,
	pub kind: ParseErrorKind,
}

pub(crate) fn parse(text: &str) -> Result<FilterNode, ParseError> {
	let mut state = ParseState::new(text);
	let node = state.parse_expr()?;
	state.skip_whitespace();
	if !state.at_end() {
		return Err(state.error(ParseErrorKind::TrailingGarbage));
	}
	Ok(node)
}

struct ParseState<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> ParseState<'a> {
	fn new(text: &'a str) -> Self {
		ParseState {
			bytes: text.as_bytes(),
			pos: 0,
		}
	}

	fn error(&self, kind: ParseErrorKind) -> ParseError {
		ParseError {
			pos: self.pos,
			kind,
		}
	}

	fn at_end(&self) -> bool {
		self.pos >= self.bytes.len()
	}

	fn peek(&self) -> Option<u8> {
		self.bytes.get(self.pos).copied()
	}

	fn bump(&mut self) -> Option<u8> {
		let b = self.peek()?;
		self.pos += 1;
		Some(b)
	}

	fn skip_whitespace(&mut self) {
		while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
			self.pos += 1;
		}
	}

	fn expect(&mut self, b: u8) -> Result<(), ParseError> {
		match self.peek() {
			Some(got) if got == b => {
				self.pos += 1;
				Ok(())
			}
			Some(_) => Err(self.error(ParseErrorKind::Malformed)),
			None => Err(self.error(ParseErrorKind::UnexpectedEnd)),
		}
	}

	fn parse_expr(&mut self) -> Result<FilterNode, ParseError> {
		self.skip_whitespace();
		self.expect(b'(')?;
		self.skip_whitespace();

		let node = match self.peek() {
			None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
			Some(b'&') => {
				self.pos += 1;
				FilterNode::And(self.parse_operands()?)
			}
			Some(b'|') => {
				self.pos += 1;
				FilterNode::Or(self.parse_operands()?)
			}
			Some(b'!') => {
				self.pos += 1;
				FilterNode::Not(Box::new(self.parse_expr()?))
			}
			Some(_) => self.parse_comparison()?,
		};

		self.skip_whitespace();
		self.expect(b')')?;
		Ok(node)
	}

	/// One or more parenthesized operands of `&` or `|`.
	fn parse_operands(&mut self) -> Result<Vec<FilterNode>, ParseError> {
		let mut operands = Vec::new();
		loop {
			self.skip_whitespace();
			match self.peek() {
				Some(b'(') => operands.push(self.parse_expr()?),
				Some(b')') if !operands.is_empty() => return Ok(operands),
				Some(_) | None if operands.is_empty() => {
					return Err(self.error(match self.peek() {
						None => ParseErrorKind::UnexpectedEnd,
						Some(_) => ParseErrorKind::Malformed,
					}));
				}
				Some(_) => return Err(self.error(ParseErrorKind::Malformed)),
				None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
			}
		}
	}

	fn parse_comparison(&mut self) -> Result<FilterNode, ParseError> {
		let attr = self.parse_attr()?;
		let op = self.parse_op()?;
		let pattern = self.parse_value()?;
		Ok(FilterNode::Cmp { attr, op, pattern })
	}

	/// Attribute name: everything up to an operator character, with
	/// surrounding whitespace trimmed. Must be non-empty.
	fn parse_attr(&mut self) -> Result<String, ParseError> {
		let start = self.pos;
		while let Some(b) = self.peek() {
			if matches!(b, b'=' | b'<' | b'>' | b'~' | b'(' | b')') {
				break;
			}
			self.pos += 1;
		}
		// The input is valid UTF-8 and operator bytes are ASCII, so the
		// slice falls on character boundaries.
		let attr = std::str::from_utf8(&self.bytes[start..self.pos])
			.expect("attribute slice ends on an ASCII boundary")
			.trim();
		if attr.is_empty() {
			return Err(ParseError {
				pos: start,
				kind: ParseErrorKind::Malformed,
			});
		}
		Ok(attr.to_string())
	}

	fn parse_op(&mut self) -> Result<CmpOp, ParseError> {
		match self.bump() {
			Some(b'=') => Ok(CmpOp::Eq),
			Some(b'<') => self.expect(b'=').map(|()| CmpOp::Le).map_err(|mut e| {
				e.kind = ParseErrorKind::UnknownOperator;
				e
			}),
			Some(b'>') => self.expect(b'=').map(|()| CmpOp::Ge).map_err(|mut e| {
				e.kind = ParseErrorKind::UnknownOperator;
				e
			}),
			Some(b'~') => self.expect(b'=').map(|()| CmpOp::Approx).map_err(|mut e| {
				e.kind = ParseErrorKind::UnknownOperator;
				e
			}),
			Some(_) => Err(ParseError {
				pos: self.pos - 1,
				kind: ParseErrorKind::UnknownOperator,
			}),
			None => Err(self.error(ParseErrorKind::UnexpectedEnd)),
		}
	}

	/// Comparison literal: runs to the next unescaped `)`. `*` becomes a
	/// wildcard, `\` makes the following character literal.
	fn parse_value(&mut self) -> Result<Pattern, ParseError> {
		let mut toks: Vec<PatTok> = Vec::new();
		let mut text = String::new();

		loop {
			match self.peek() {
				None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
				Some(b')') => break,
				Some(b'(') => return Err(self.error(ParseErrorKind::Malformed)),
				Some(b'*') => {
					self.pos += 1;
					if !text.is_empty() {
						toks.push(PatTok::Text(std::mem::take(&mut text)));
					}
					// Collapse runs of wildcards.
					if !matches!(toks.last(), Some(PatTok::Any)) {
						toks.push(PatTok::Any);
					}
				}
				Some(b'\\') => {
					self.pos += 1;
					match self.next_char() {
						Some(c) => text.push(c),
						None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
					}
				}
				Some(_) => {
					let c = self.next_char().expect("peek saw a byte");
					text.push(c);
				}
			}
		}

		if !text.is_empty() {
			toks.push(PatTok::Text(text));
		}
		// An empty token list is `(attr=)`, equality with the empty string.
		Ok(Pattern { toks })
	}

	fn next_char(&mut self) -> Option<char> {
		let rest = std::str::from_utf8(&self.bytes[self.pos..]).ok()?;
		let c = rest.chars().next()?;
		self.pos += c.len_utf8();
		Some(c)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Filter;

	fn err_of(text: &str) -> ParseError {
		Filter::parse(text).unwrap_err()
	}

	#[test]
	fn accepts_the_grammar() {
		for text in [
			"(a=b)",
			"(a<=1)",
			"(a>=1)",
			"(a~=b)",
			"(a=*)",
			"(a=)",
			"( a = b )",
			"(&(a=1)(b=2))",
			"(|(a=1))",
			"(!(a=1))",
			"(&(|(a=1)(b=2))(!(c=3)))",
			r"(a=\(\)\*\\)",
			"(a=*b*c)",
		] {
			assert!(Filter::parse(text).is_ok(), "should parse: {text}");
		}
	}

	#[test]
	fn rejects_malformed_input() {
		assert_eq!(err_of("(a=b").kind, ParseErrorKind::UnexpectedEnd);
		assert_eq!(err_of("(&)").kind, ParseErrorKind::Malformed);
		assert_eq!(err_of("(=b)").kind, ParseErrorKind::Malformed);
		assert_eq!(err_of("(a=b))").kind, ParseErrorKind::TrailingGarbage);
		assert_eq!(err_of("(a<b)").kind, ParseErrorKind::UnknownOperator);
		assert_eq!(err_of("a=b").kind, ParseErrorKind::Malformed);
		assert_eq!(err_of("(!(a=1)(b=2))").kind, ParseErrorKind::Malformed);
		assert_eq!(err_of("(a=b\\").kind, ParseErrorKind::UnexpectedEnd);
	}

	#[test]
	fn error_positions_point_at_the_problem() {
		let e = err_of("(a<b)");
		assert_eq!(e.pos, 3);
		let e = err_of("(a=b");
		assert_eq!(e.pos, 4);
	}

	#[test]
	fn whitespace_around_attr_is_trimmed() {
		let f = Filter::parse("( name =x)").unwrap();
		assert_eq!(f.to_string(), "(name=x)");
	}
}
