//! Key/value backend implementations.
//!
//! - **Redis**: the production backend, with automatic reconnection and
//!   cursor-based key scanning.
//! - **Memory**: a `DashMap` backend with per-entry expiry and glob scan,
//!   used by the test suite and as an embedded fallback.
//!
//! Both implement [`KvBackend`](crate::traits::KvBackend) and plug into the
//! service through
//! [`AvailabilityServiceBuilder::with_store`](crate::AvailabilityServiceBuilder::with_store).

pub mod memory_store;
pub mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
