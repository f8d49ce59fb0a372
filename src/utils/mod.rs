//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, and metrics.
//!
//! ## Components
//! - **Crypto**: HKDF-SHA256 key derivation, HMAC tags, ChaCha20-Poly1305
//!   metadata encryption, Ed25519 signatures
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Constant-time tag comparison (hmac)
//! - Memory zeroing for derived keys (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;

pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
