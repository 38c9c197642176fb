//! # Courier Test Suite
//!
//! Unified test crate for cross-crate integration scenarios.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/          # Cross-crate call/response scenarios
//!     ├── rpc_roundtrip.rs  # Round trips, correlation isolation, orphans
//!     ├── failure_handling.rs # Timeouts, dead-lettering, redelivery
//!     ├── existence_flow.rs # The auth/task/email exchange in miniature
//!     ├── shutdown.rs       # Cooperative shutdown and connection loss
//!     └── wire_format.rs    # Raw JSON frames against the wire contract
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p courier-tests
//!
//! # By scenario
//! cargo test -p courier-tests integration::rpc_roundtrip
//! cargo test -p courier-tests integration::failure_handling
//! ```

#![allow(unused_imports)]
#![allow(dead_code)]


/// Install a fmt subscriber for the whole test binary.
///
/// Safe to call from every test; later calls are no-ops. Honors
/// `RUST_LOG`, defaulting to `debug` so `--nocapture` shows the
/// correlation traces.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
