//! Application Layer - Use cases and port definitions.
//!
//! This layer holds the ingestion and indicator services and the port
//! interfaces through which they reach the token provider and storage.

/// Port interfaces for external systems (token exchange, persistence).
pub mod ports;

/// Application services for ingestion, indicator cycles and feed state.
pub mod services;
