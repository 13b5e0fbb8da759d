/// Testing utilities for the checkpointing workspace
/// 
/// Provides:
/// - Random data generators (hashes, addresses, seeds)
/// - Proptest strategies for validator power distributions
/// - Tracing setup for tests

pub mod generators;
pub mod fixtures;

pub use generators::*;
pub use fixtures::*;
