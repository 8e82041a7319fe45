//! Persistence Adapters
//!
//! Implementations of the persistence sink port.

pub mod in_memory;

pub use in_memory::InMemorySink;
