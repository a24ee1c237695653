//! LDAP-style filter expressions over dynamically typed property maps.
//!
//! A [`Filter`] is an immutable expression tree parsed once from the
//! parenthesized prefix grammar (`(&(objectClass=Log)(level>=3))`) and
//! evaluated many times against [`PropertyMap`] instances. Keys compare
//! case-insensitively but preserve their original spelling.
//!
//! Beyond plain evaluation, a filter can be classified as *simple*
//! ([`Filter::simple_cache`]): a conjunction of equality tests over a fixed
//! set of hashable keys. Simple filters reduce to hash-bucket membership
//! tests, which is what lets an event dispatcher avoid evaluating every
//! filter against every event.

mod expr;
mod parse;
mod props;
mod simple;
mod value;

pub use expr::Filter;
pub use parse::{ParseError, ParseErrorKind};
pub use props::PropertyMap;
pub use simple::LocalCache;
pub use value::Value;
