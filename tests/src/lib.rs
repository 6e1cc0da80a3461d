//! # Service Bus Test Suite
//!
//! Cross-crate scenarios that need the bus, a transport and the controller
//! together.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs        # Recording service, catalog and bus helpers
//! └── integration/
//!     ├── lifecycle.rs   # Bus start, registration, status aggregation
//!     ├── routing.rs     # Slips, routed flags, end of route
//!     ├── dead_letters.rs# Undeliverable envelopes and rotation
//!     ├── shutdown.rs    # Immediate and graceful shutdown
//!     └── tcp.rs         # Control protocol end to end
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p sb-tests
//! cargo test -p sb-tests integration::tcp::
//! ```

pub mod fixtures;
