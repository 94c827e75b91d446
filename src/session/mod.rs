//! Session Repository Module
//!
//! Maps HTTP sessions onto entries of the partitioned map.
//!
//! ## Core Concepts
//! - **Identity**: Session ids are random UUIDs (simple form), checked against the map.
//! - **Flush Mode**: `Immediate` writes every mutation to the owner at once; `OnSave` waits
//!   for an explicit save.
//! - **Save Mode**: Decides which attributes enter the delta written on save.
//! - **Conflicts**: Creating an existing id, or changing the principal after someone else
//!   did, fails with `SessionConflict`.
//! - **Events**: `Created`, `Deleted` and `Expired` notifications on a broadcast channel.

pub mod codec;
pub mod repository;
pub mod session;
pub mod types;

#[cfg(test)]
mod tests;
