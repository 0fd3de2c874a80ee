//! Error types for the authcache library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when configuration is invalid or incomplete
//!   (out-of-range load factor, missing required parameter, unreadable
//!   config or cache file).
//! - [`InvariantError`]: Returned when internal data-structure invariants are
//!   violated (`check_invariants` methods used by tests).
//! - [`Disturbed`]: Returned by a [`SortedMap`](crate::ds::SortedMap) cursor
//!   whose backing tree was modified after the cursor was created.
//!
//! All other failure signals in the crate are local values rather than
//! errors: absent keys are `None`, a refused table growth sets the sticky
//! `oom` flag, and a transport-level failure is an absent response.

use std::fmt;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when configuration parameters are invalid or incomplete.
///
/// Produced by fallible constructors such as
/// [`OrderedMap::try_with_load_factor`](crate::ds::OrderedMap::try_with_load_factor),
/// by [`Config`](crate::config::Config) file round-trips, and by client
/// operations that need parameters the configuration does not hold (for
/// example a token refresh without a `token_url`). Carries a human-readable
/// description of what was missing or rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Creates a `ConfigError` naming a required parameter that is absent.
    #[inline]
    pub fn missing_param(name: &str) -> Self {
        Self(format!("required parameter `{name}` is not set"))
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal data-structure invariants are violated.
///
/// Produced by `check_invariants` methods on the storage types
/// (e.g. [`OrderedMap::check_invariants`](crate::ds::OrderedMap::check_invariants)).
/// Carries a human-readable description of which invariant failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// Disturbed
// ---------------------------------------------------------------------------

/// Error returned by a sorted-map cursor whose tree changed underneath it.
///
/// A [`Cursor`](crate::ds::sorted_map::Cursor) snapshots the tree's
/// modification counter when created; any structural change afterwards makes
/// every subsequent `next` call return this error instead of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disturbed;

impl fmt::Display for Disturbed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("map was modified during iteration")
    }
}

impl std::error::Error for Disturbed {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
