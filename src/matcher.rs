//! Request matchers used to pick a rule.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

use crate::error::ThrottlerResult;
use crate::transport::Target;

type Predicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// How a rule decides whether it applies to a request.
pub enum Matcher<R> {
    /// Matches every request.
    Always,
    /// Matches when the request target contains the string.
    Substring(String),
    /// Matches when the pattern finds a match anywhere in the request target.
    Pattern(Regex),
    /// Matches when the predicate returns `true` for the request.
    Predicate(Predicate<R>),
}

impl<R> Matcher<R> {
    pub fn substring(needle: impl Into<String>) -> Self {
        Matcher::Substring(needle.into())
    }

    /// Compile `pattern` into a pattern matcher.
    pub fn pattern(pattern: &str) -> ThrottlerResult<Self> {
        Ok(Matcher::Pattern(Regex::new(pattern)?))
    }

    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(predicate))
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Matcher::Always)
    }
}

impl<R: Target> Matcher<R> {
    pub fn matches(&self, request: &R) -> bool {
        match self {
            Matcher::Always => true,
            Matcher::Substring(needle) => request.target().contains(needle.as_str()),
            Matcher::Pattern(pattern) => pattern.is_match(&request.target()),
            Matcher::Predicate(predicate) => predicate(request),
        }
    }
}

impl<R> Clone for Matcher<R> {
    fn clone(&self) -> Self {
        match self {
            Matcher::Always => Matcher::Always,
            Matcher::Substring(needle) => Matcher::Substring(needle.clone()),
            Matcher::Pattern(pattern) => Matcher::Pattern(pattern.clone()),
            Matcher::Predicate(predicate) => Matcher::Predicate(Arc::clone(predicate)),
        }
    }
}

impl<R> fmt::Debug for Matcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Always => f.write_str("Always"),
            Matcher::Substring(needle) => f.debug_tuple("Substring").field(needle).finish(),
            Matcher::Pattern(pattern) => f.debug_tuple("Pattern").field(&pattern.as_str()).finish(),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl<R> fmt::Display for Matcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Always => write!(f, "*"),
            Matcher::Substring(needle) => write!(f, "{}", needle),
            Matcher::Pattern(pattern) => write!(f, "/{}/", pattern.as_str()),
            Matcher::Predicate(_) => write!(f, "<predicate>"),
        }
    }
}
