use std::fmt;
use std::sync::Arc;

use crate::router::InboundMessage;

/// Callback invoked for each message delivered on a channel.
///
/// Errors are logged and counted by the router; they never reach the
/// connection. Panics are caught the same way.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: &InboundMessage) -> anyhow::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, message: &InboundMessage) -> anyhow::Result<()> {
        self(message)
    }
}

/// Shared, type-erased handler
pub type SharedHandler = Arc<dyn MessageHandler>;

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
///
/// Subscribing again to the same channel issues a new handle and makes the
/// previous one stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    channel: String,
}

impl SubscriptionHandle {
    pub fn new(id: u64, channel: impl Into<String>) -> Self {
        Self {
            id,
            channel: channel.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.channel, self.id)
    }
}
