//! Secondary Index Module
//!
//! Attribute indexes co-located with every data partition.
//!
//! ## Overview
//! Each partition carries an `IndexEngine` inside the same lock as its entries, so an
//! entry and its index memberships always change together. Queries are answered per
//! partition and gathered across members by the partitioned map.
//!
//! ## Submodules
//! - **`engine`**: Hash and sorted indexes over encoded attribute values.
//! - **`types`**: Index definitions and query predicates.

pub mod engine;
pub mod types;

#[cfg(test)]
mod tests;
