//! Warden Gate
//!
//! Password gate and self-maintaining TLS for small services on a LAN.
//!
//! This library provides:
//!
//! - **Access policy**: private/external origin handling, an allow-list, a
//!   shared secret and per-origin lockout combined into one decision
//! - **Gate middleware**: axum layer turning decisions into 401 JSON bodies
//! - **Certificate lifecycle**: self-signed certificate reuse and regeneration
//!   tied to the configured domain
//! - **Listeners**: TLS with an HTTP redirect, or plain HTTP as an explicit
//!   fallback
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_common::MemoryAttemptStore;
//! use warden_gate::{AccessPolicy, Gate};
//!
//! let store = Arc::new(MemoryAttemptStore::new());
//! let policy = Arc::new(AccessPolicy::new(&config.access_policy(), store));
//! let app = warden_gate::gate::protect(my_router, Gate::new(policy, false));
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod gate;
pub mod policy;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod tls;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Access control
pub use gate::{AccessContext, Denial, Gate};
pub use policy::{AccessPolicy, Decision, LockoutSweeper};

// Certificates
pub use tls::{CertificateManager, ProvisionedCertificate};

// Listeners
pub use server::{serve, ListenerPlan, ServerError};
