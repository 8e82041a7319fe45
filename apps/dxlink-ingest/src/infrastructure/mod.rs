//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-level concerns.

/// Configuration loaded from the environment.
pub mod config;

/// DXLink WebSocket protocol client.
pub mod dxlink;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Persistence sink adapters.
pub mod persistence;

/// Tastytrade REST token provider.
pub mod tastytrade;

/// OpenTelemetry tracing integration.
pub mod telemetry;
