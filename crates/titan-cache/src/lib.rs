//! Titan Cache - transparent result caching for service calls
//!
//! Operations registered with a [`CacheRule`] have their results stored under
//! a key derived from the operation name and its serialized arguments.
//! Unregistered operations pass straight through.

pub mod error;
pub mod interceptor;
pub mod key;
pub mod store;

pub use error::CacheError;
pub use interceptor::{CacheMode, CacheRule, CacheSettings, CacheStats, CallInterceptor};
pub use key::derive_key;
pub use store::{CacheEntry, CacheStore, MokaCacheStore};
