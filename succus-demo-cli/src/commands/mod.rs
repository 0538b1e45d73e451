//! CLI command implementations

pub mod backup;
pub mod demo;
pub mod keygen;
pub mod namespace;
pub mod probe;
