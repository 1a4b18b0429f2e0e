//! Premium entitlement resolution
//!
//! A user is premium when any of three independent signals says so (under
//! the default [`ReconciliationPolicy`]):
//!
//! - the configured override identity
//! - the denormalized `subscription_status`/`subscription_end_date` columns
//!   of the user's profile row
//! - an `active` subscription at the payments provider
//!
//! [`AccessResolver`] gathers the signals, [`merge_signals`] combines them,
//! and [`AccessMonitor`] drives one consumer's `Loading → Resolved | Failed`
//! state machine under the bounded [`RetryConfig`].

pub mod components;
pub mod decision;
pub mod error;
pub mod monitor;
pub mod payments;
pub mod profile;
pub mod resolver;
pub mod retry;
pub(crate) mod upstream;

pub use components::AccessComponents;
pub use decision::*;
pub use error::*;
pub use monitor::*;
pub use payments::{Customer, InMemoryPaymentsClient, PaymentsClient, RestPaymentsClient, SubscriptionRecord, SubscriptionStatus};
pub use profile::{InMemoryProfileStore, PREMIUM_STATUS, ProfileRecord, ProfileStore, RestProfileStore};
pub use resolver::*;
pub use retry::*;
