//! Domain models for marketplace-service.

mod commission;
mod event;
mod subscription;
mod tier;

pub use commission::{validate_brackets, BracketError, CommissionRate};
pub use event::{NewSubscriptionEvent, SubscriptionEvent, SubscriptionEventType};
pub use subscription::{BillingCycle, SubscriptionStatus, SubscriptionUpdate, UserSubscription};
pub use tier::{SubscriptionTier, UserType};
