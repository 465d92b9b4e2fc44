//! Shared utilities.

pub mod redact;

#[cfg(test)]
pub mod testutil;
