//! pingtrail - HTTP endpoint monitoring.
//!
//! Probes a registry of grouped, optionally country-tagged URLs on a fixed
//! interval, stores every result, and serves aggregate statistics over them.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod web;

#[cfg(test)]
mod test_support;
