//! Rollcall production server.
//!
//! This crate runs the sans-IO session from `rollcall-core` using:
//! - Tokio for the tick loop and verifier tasks
//! - The tokio clock and OS entropy via [`SystemEnv`]
//!
//! ## Architecture
//!
//! ```text
//! rollcall-server
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ SessionDriver      (lock, tick loop, verifier tasks)
//!   │    └─ Session       (rotation + attempts, from rollcall-core)
//!   └─ SimulatedVerifier  (demo VerifierAdapter)
//! ```
//!
//! Transports (HTTP, WebSocket, ...) sit in front of
//! [`SessionDriver::handle_bytes`] and [`SessionDriver::presenter_bytes`],
//! routing by session ID.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod simulated_verifier;
mod system_env;

pub use driver::{DriverConfig, SessionDriver};
pub use error::ServerError;
pub use simulated_verifier::SimulatedVerifier;
pub use system_env::SystemEnv;
