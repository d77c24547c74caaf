//! Subscription registry: which handler receives which channel.

mod handler;
mod registry;

pub use handler::{MessageHandler, SharedHandler, SubscriptionHandle};
pub use registry::{
    SubscriptionInfo, SubscriptionOp, SubscriptionRegistry, SubscriptionStatus,
};
