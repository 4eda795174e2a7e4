//! Command implementations for batchlint
//!
//! `lint` is the default command; `worker` backs process execution contexts.

pub mod lint;
pub mod worker;
