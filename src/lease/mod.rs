//! Namespace leases serializing solo commands across processes

pub mod holder;
#[allow(clippy::module_inception)]
pub mod lease;
pub mod manager;
pub mod renewal;

pub use holder::LeaseHolder;
pub use lease::{BackoffPolicy, LEASE_NAME, Lease};
pub use manager::{LeaseGuard, LeaseManager};
pub use renewal::{RenewalHandle, RenewalService};
