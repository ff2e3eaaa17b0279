//! Cache key normalization.
//!
//! Keys are derived from call arguments by pure constructors so that two
//! requests collide only when they are semantically identical. Every key
//! carries a category namespace, which is what per-category TTLs and
//! category-wide invalidation operate on.

use std::fmt;

/// Namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: String,
    id: String,
}

impl CacheKey {
    /// Sentinel key for a whole-category read, e.g. a "list all" query.
    pub fn all(category: impl Into<String>) -> Self {
        Self { category: category.into(), id: "all".to_owned() }
    }

    /// Key for a single entity within a category.
    pub fn entity(category: impl Into<String>, id: impl fmt::Display) -> Self {
        Self { category: category.into(), id: id.to_string() }
    }

    /// Key for free-text lookups; the text is trimmed and case-folded so
    /// equivalent queries share one entry.
    pub fn query(category: impl Into<String>, text: &str) -> Self {
        Self { category: category.into(), id: text.trim().to_lowercase() }
    }

    /// The key's category namespace.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The normalized identifier within the category.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.id)
    }
}
