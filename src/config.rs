//! Connection configuration.
//!
//! Defaults follow RFC 7540 §11.3 / §6.5.2 where the RFC pins a value, and
//! the ambient choices real HTTP/2 clients in this corpus converge on
//! otherwise (a 1MiB-ish stream window rather than the RFC's conservative
//! 64KiB default, since nearly every production client bumps it on
//! connect).

use std::time::Duration;

use crate::keepalive::KeepAlivePolicy;

/// Selects which field in an outgoing header list a given connection's
/// HPACK encoder is allowed to skip re-sending verbatim, letting an
/// embedder plug in its own static-table-like shortlist without this
/// crate hardcoding one. Most callers can leave this as `default_selector`.
pub type HeaderEncodingSelector = fn(name: &str) -> bool;

fn default_header_encoding_selector(_name: &str) -> bool {
    false
}

#[derive(Clone)]
pub struct Config {
    /// `SETTINGS_INITIAL_WINDOW_SIZE` we advertise and the starting size
    /// of every per-stream `CreditManager`.
    pub initial_stream_window_size: u32,
    /// The connection-level window's starting size; bumped via an
    /// immediate WINDOW_UPDATE right after the preface.
    pub initial_connection_window_size: u32,
    pub max_concurrent_streams: u32,
    pub max_frame_size: u32,
    /// Caps a single response's total header list size this client will
    /// accept before tearing the stream down with ENHANCE_YOUR_CALM.
    pub max_response_headers_bytes: usize,
    pub keep_alive_policy: KeepAlivePolicy,
    pub keep_alive_ping_delay: Duration,
    pub keep_alive_ping_timeout: Duration,
    /// Whether this client coalesces cookies the way RFC 7540 §8.1.2.5
    /// permits (a single `cookie` header split at wire-encode time into
    /// multiple header fields for better HPACK compression).
    pub use_cookies: bool,
    pub request_header_encoding_selector: HeaderEncodingSelector,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            initial_stream_window_size: 1024 * 1024,
            initial_connection_window_size: 64 * 1024 * 1024,
            max_concurrent_streams: 100,
            max_frame_size: crate::frame::DEFAULT_MAX_FRAME_SIZE,
            max_response_headers_bytes: 16 * 1024,
            keep_alive_policy: KeepAlivePolicy::Disabled,
            keep_alive_ping_delay: Duration::from_secs(60),
            keep_alive_ping_timeout: Duration::from_secs(20),
            use_cookies: true,
            request_header_encoding_selector: default_header_encoding_selector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc_recommendations_where_rfc_pins_a_value() {
        let config = Config::default();
        assert_eq!(config.max_frame_size, 16 * 1024);
        assert_eq!(config.max_concurrent_streams, 100);
    }
}
