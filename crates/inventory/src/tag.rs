//! Tag expression parsing.
//!
//! Inventory tags are three-part labels of the form `namespace:predicate=value`.
//! Searches are expressed with a prefix of that form: `namespace`,
//! `namespace:predicate` or the full `namespace:predicate=value`.
//!
//! Parsing is total: every string maps to a [`TagExpression`]. Callers that
//! need a non-empty namespace validate that upstream.
//!
//! ```
//! use autosign_inventory::TagExpression;
//!
//! let tag = TagExpression::parse("nd:auth=foo=bar");
//! assert_eq!(tag.namespace(), "nd");
//! assert_eq!(tag.predicate(), Some("auth"));
//! assert_eq!(tag.value(), Some("foo=bar"));
//! assert_eq!(tag.search_prefix(), "nd:auth");
//! ```

use std::fmt;

/// A tag split into its namespace, predicate and value parts.
///
/// `value` is only ever set when `predicate` is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagExpression {
    namespace: String,
    predicate: Option<String>,
    value: Option<String>,
}

impl TagExpression {
    /// Splits `tag` on the first `:` and then on the first `=`.
    ///
    /// An empty remainder after the `:` yields no predicate, so `nd:` and
    /// `nd` parse identically. The value keeps any further `=` characters.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        let Some((namespace, rest)) = tag.split_once(':') else {
            return Self { namespace: tag.to_owned(), predicate: None, value: None };
        };

        if rest.is_empty() {
            return Self { namespace: namespace.to_owned(), predicate: None, value: None };
        }

        let (predicate, value) = match rest.split_once('=') {
            Some((predicate, value)) => (predicate, Some(value.to_owned())),
            None => (rest, None),
        };

        let expr =
            Self { namespace: namespace.to_owned(), predicate: Some(predicate.to_owned()), value };
        tracing::trace!(tag, ?expr, "split tag");
        expr
    }

    /// Returns the namespace. Always present, possibly empty.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the predicate, if any.
    #[must_use]
    pub fn predicate(&self) -> Option<&str> {
        self.predicate.as_deref()
    }

    /// Returns the value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Consumes the expression and returns its three parts.
    #[must_use]
    pub fn into_parts(self) -> (String, Option<String>, Option<String>) {
        (self.namespace, self.predicate, self.value)
    }

    /// Returns the prefix used to narrow searches: `namespace:predicate`, or
    /// the bare namespace when there is no predicate.
    #[must_use]
    pub fn search_prefix(&self) -> String {
        search_prefix(&self.namespace, self.predicate.as_deref())
    }
}

impl fmt::Display for TagExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)?;
        if let Some(predicate) = &self.predicate {
            write!(f, ":{predicate}")?;
            if let Some(value) = &self.value {
                write!(f, "={value}")?;
            }
        }
        Ok(())
    }
}

impl From<&str> for TagExpression {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

/// Splits `tag` into `(namespace, predicate, value)`.
///
/// Shorthand for [`TagExpression::parse`] followed by
/// [`TagExpression::into_parts`].
#[must_use]
pub fn split_tag(tag: &str) -> (String, Option<String>, Option<String>) {
    TagExpression::parse(tag).into_parts()
}

/// Builds the `namespace:predicate` search prefix.
///
/// Without a predicate the prefix is the namespace alone, so that a bare
/// `mytag=value` tag still falls under it.
#[must_use]
pub fn search_prefix(namespace: &str, predicate: Option<&str>) -> String {
    match predicate {
        Some(predicate) => format!("{namespace}:{predicate}"),
        None => namespace.to_owned(),
    }
}
