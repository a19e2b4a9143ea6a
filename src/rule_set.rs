use std::sync::Arc;
use tracing::trace;

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::matcher::Matcher;
use crate::rate_limit_config::RateLimitRule;
use crate::token_bucket::TokenBucket;
use crate::transport::Target;

/// A matcher paired with the bucket it draws from.
pub struct Rule<R> {
    label: String,
    matcher: Matcher<R>,
    bucket: Arc<TokenBucket>,
}

impl<R> Rule<R> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn matcher(&self) -> &Matcher<R> {
        &self.matcher
    }

    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }
}

impl<R> std::fmt::Debug for Rule<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("label", &self.label)
            .field("matcher", &self.matcher)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Ordered rules; the first rule whose matcher accepts a request owns it.
pub struct RuleSet<R> {
    rules: Vec<Rule<R>>,
}

impl<R> Default for RuleSet<R> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<R> RuleSet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add every rule in order. Fails on the first bad rule.
    pub fn from_rules<I>(rules: I) -> ThrottlerResult<Self>
    where
        I: IntoIterator<Item = RateLimitRule<R>>,
    {
        let mut set = Self::new();
        for rule in rules {
            set.push(rule)?;
        }
        Ok(set)
    }

    /// Validate `rule` and append it after the existing rules.
    ///
    /// A rule without a matcher covers every request, so it may only ever be
    /// the sole rule in the set.
    pub fn push(&mut self, rule: RateLimitRule<R>) -> ThrottlerResult<()> {
        let index = self.rules.len();
        rule.validate(index)?;

        if self.rules.iter().any(|r| r.matcher.is_always()) {
            return Err(ThrottlerError::CatchAllConflict { index });
        }
        if rule.matcher.is_always() && !self.rules.is_empty() {
            return Err(ThrottlerError::CatchAllConflict { index });
        }

        let bucket = Arc::new(rule.build_bucket());
        self.rules.push(Rule {
            label: rule.label(index),
            matcher: rule.matcher,
            bucket,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule<R>> {
        self.rules.iter()
    }
}

impl<R: Target> RuleSet<R> {
    /// Find the rule that governs `request`, if any.
    pub fn resolve(&self, request: &R) -> Option<&Rule<R>> {
        let rule = self.rules.iter().find(|rule| rule.matcher.matches(request));
        trace!(
            url = %request.target(),
            rule = rule.map(|r| r.label.as_str()).unwrap_or("none"),
            "Resolved rule"
        );
        rule
    }

    /// The bucket `request` draws from, if any rule matches it.
    pub fn resolve_bucket(&self, request: &R) -> Option<&Arc<TokenBucket>> {
        self.resolve(request).map(|rule| &rule.bucket)
    }
}

impl<R> std::fmt::Debug for RuleSet<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.iter()).finish()
    }
}
