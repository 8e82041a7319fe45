//! Port Interfaces
//!
//! Contracts for the external collaborators the ingestion core talks to,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement these; tests substitute doubles.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TokenProvider`: Quote-token exchange and streamer-symbol lookup
//! - `PersistenceSink`: Idempotent storage of bars and indicator snapshots

mod persistence_sink_port;
mod token_provider_port;

pub use persistence_sink_port::{PersistenceSink, SinkError};
pub use token_provider_port::{AuthError, QUOTE_TOKEN_VALIDITY, QuoteToken, TokenProvider};

#[cfg(test)]
pub use persistence_sink_port::MockPersistenceSink;
#[cfg(test)]
pub use token_provider_port::MockTokenProvider;
