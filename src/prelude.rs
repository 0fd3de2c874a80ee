//! Convenience re-exports of the crate's public surface.

pub use crate::config::{Config, Options};
pub use crate::ds::{MapKey, OrderedMap, SortedMap};
pub use crate::error::{ConfigError, Disturbed, InvariantError};
pub use crate::oauth::{
    AuthState, CacheEntry, CachePipeline, Challenge, ChallengeMethod, Method, OAuthClient,
    PendingRequest, Response, Transport, TransportRequest,
};
