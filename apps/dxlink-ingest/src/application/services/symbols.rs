//! Streamer-symbol resolution.

use crate::application::ports::{AuthError, TokenProvider};

/// Resolve plain symbols to streamer symbols.
///
/// Symbols whose lookup fails transiently or returns an unusable answer keep
/// their plain form. Output order follows input order and duplicates are
/// dropped.
///
/// # Errors
///
/// Returns `AuthError` when the session token is missing or rejected, since
/// no later lookup can succeed.
pub async fn resolve_streamer_symbols(
    provider: &dyn TokenProvider,
    session_token: &str,
    symbols: &[String],
) -> Result<Vec<String>, AuthError> {
    let mut resolved: Vec<String> = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        let streamer = match provider.streamer_symbol(session_token, symbol).await {
            Ok(streamer) if !streamer.trim().is_empty() => streamer,
            Ok(_) => {
                tracing::warn!(symbol = %symbol, "Empty streamer symbol, using plain symbol");
                symbol.clone()
            }
            Err(e @ (AuthError::MissingSessionToken | AuthError::Rejected { .. })) => {
                tracing::error!(symbol = %symbol, error = %e, "Streamer symbol lookup rejected");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Streamer symbol lookup failed, using plain symbol");
                symbol.clone()
            }
        };

        if streamer != *symbol {
            tracing::info!(symbol = %symbol, streamer_symbol = %streamer, "Resolved streamer symbol");
        }
        if !resolved.contains(&streamer) {
            resolved.push(streamer);
        }
    }

    Ok(resolved)
}
