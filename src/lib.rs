//! authcache: OAuth2 authorization-code (PKCE) client over a keyed-storage
//! engine.
//!
//! The crate is built around two from-scratch containers — an
//! open-addressing [`OrderedMap`](ds::OrderedMap) with an embedded traversal
//! order and an AVL [`SortedMap`](ds::SortedMap) — composed into a
//! [`CachePipeline`](oauth::CachePipeline) that deduplicates in-flight
//! requests and serves stale-while-revalidate response caching behind an
//! injected HTTP [`Transport`](oauth::Transport).

pub mod config;
pub mod ds;
pub mod error;
pub mod oauth;
pub mod prelude;
