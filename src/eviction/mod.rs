//! Eviction Module
//!
//! Background expiry of idle sessions. Each member only sweeps the
//! partitions it owns; removals are replicated like any other write.

pub mod scheduler;
