use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::handler::{SharedHandler, SubscriptionHandle};
use crate::protocol::ClientFrame;

/// Liveness of a registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Submitted on the current connection
    Active,
    /// Waiting to be submitted on the next connection
    PendingResubscribe,
}

/// Subscription change that the server must see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOp {
    Subscribe(String),
    Unsubscribe(String),
}

impl SubscriptionOp {
    pub fn channel(&self) -> &str {
        match self {
            SubscriptionOp::Subscribe(channel) | SubscriptionOp::Unsubscribe(channel) => channel,
        }
    }

    pub fn into_frame(self) -> ClientFrame {
        match self {
            SubscriptionOp::Subscribe(channel) => ClientFrame::Subscribe { channel },
            SubscriptionOp::Unsubscribe(channel) => ClientFrame::Unsubscribe { channel },
        }
    }
}

/// Local operation waiting for the connection
enum PendingOp {
    Subscribe {
        handle: SubscriptionHandle,
        handler: SharedHandler,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
    },
}

struct Entry {
    handle_id: u64,
    handler: SharedHandler,
    status: SubscriptionStatus,
    /// Registration order, kept when the handler is replaced
    seq: u64,
    registered_at: DateTime<Utc>,
}

/// Read-only view of a subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub channel: String,
    pub handle_id: u64,
    pub status: SubscriptionStatus,
    pub registered_at: DateTime<Utc>,
}

/// Channel to handler map with offline queueing.
///
/// While online, changes apply immediately and return the op to send.
/// While offline they are queued and applied in order by
/// [`SubscriptionRegistry::go_online`], which then returns one `Subscribe`
/// per registered channel.
pub struct SubscriptionRegistry {
    entries: HashMap<String, Entry>,
    pending: VecDeque<PendingOp>,
    online: bool,
    next_seq: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            pending: VecDeque::new(),
            online: false,
            next_seq: 0,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Register `handler` for the handle's channel.
    ///
    /// Returns the op to send now, if any. Re-subscribing to a known channel
    /// only replaces the handler.
    pub fn subscribe(
        &mut self,
        handle: SubscriptionHandle,
        handler: SharedHandler,
    ) -> Option<SubscriptionOp> {
        if !self.online {
            tracing::debug!(channel = %handle.channel(), "Queueing subscribe until connected");
            self.pending
                .push_back(PendingOp::Subscribe { handle, handler });
            return None;
        }
        self.apply_subscribe(handle, handler)
    }

    /// Remove the subscription identified by `handle`.
    ///
    /// Stale handles (the channel has since been re-subscribed) are ignored.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Option<SubscriptionOp> {
        if !self.online {
            tracing::debug!(channel = %handle.channel(), "Queueing unsubscribe until connected");
            self.pending.push_back(PendingOp::Unsubscribe { handle });
            return None;
        }
        self.apply_unsubscribe(&handle)
    }

    fn apply_subscribe(
        &mut self,
        handle: SubscriptionHandle,
        handler: SharedHandler,
    ) -> Option<SubscriptionOp> {
        let status = if self.online {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::PendingResubscribe
        };

        if let Some(entry) = self.entries.get_mut(handle.channel()) {
            tracing::debug!(
                channel = %handle.channel(),
                old_handle = entry.handle_id,
                new_handle = handle.id(),
                "Replacing subscription handler"
            );
            entry.handle_id = handle.id();
            entry.handler = handler;
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            handle.channel().to_string(),
            Entry {
                handle_id: handle.id(),
                handler,
                status,
                seq,
                registered_at: Utc::now(),
            },
        );
        tracing::debug!(channel = %handle.channel(), handle = handle.id(), "Subscription registered");

        self.online
            .then(|| SubscriptionOp::Subscribe(handle.channel().to_string()))
    }

    fn apply_unsubscribe(&mut self, handle: &SubscriptionHandle) -> Option<SubscriptionOp> {
        match self.entries.get(handle.channel()) {
            Some(entry) if entry.handle_id == handle.id() => {}
            Some(entry) => {
                tracing::debug!(
                    channel = %handle.channel(),
                    stale_handle = handle.id(),
                    current_handle = entry.handle_id,
                    "Ignoring unsubscribe with superseded handle"
                );
                return None;
            }
            None => {
                tracing::debug!(channel = %handle.channel(), "Unsubscribe for unknown channel");
                return None;
            }
        }

        self.entries.remove(handle.channel());
        tracing::debug!(channel = %handle.channel(), "Subscription removed");

        self.online
            .then(|| SubscriptionOp::Unsubscribe(handle.channel().to_string()))
    }

    /// Connection lost: everything must be submitted again.
    pub fn go_offline(&mut self) {
        self.online = false;
        for entry in self.entries.values_mut() {
            entry.status = SubscriptionStatus::PendingResubscribe;
        }
    }

    /// Connection confirmed. Applies queued ops in order, then returns one
    /// `Subscribe` per registered channel in registration order.
    pub fn go_online(&mut self) -> Vec<SubscriptionOp> {
        let queued = self.pending.len();
        while let Some(op) = self.pending.pop_front() {
            match op {
                PendingOp::Subscribe { handle, handler } => {
                    self.apply_subscribe(handle, handler);
                }
                PendingOp::Unsubscribe { handle } => {
                    self.apply_unsubscribe(&handle);
                }
            }
        }
        self.online = true;

        let mut ordered: Vec<(&String, &mut Entry)> = self.entries.iter_mut().collect();
        ordered.sort_by_key(|(_, entry)| entry.seq);

        let ops: Vec<SubscriptionOp> = ordered
            .into_iter()
            .map(|(channel, entry)| {
                entry.status = SubscriptionStatus::Active;
                SubscriptionOp::Subscribe(channel.clone())
            })
            .collect();

        tracing::debug!(
            queued_ops = queued,
            subscriptions = ops.len(),
            "Subscriptions resubmitted"
        );
        ops
    }

    /// Handler registered for `destination`.
    pub fn lookup(&self, destination: &str) -> Option<SharedHandler> {
        self.entries
            .get(destination)
            .map(|entry| entry.handler.clone())
    }

    pub fn status(&self, channel: &str) -> Option<SubscriptionStatus> {
        self.entries.get(channel).map(|entry| entry.status)
    }

    /// Registered channels. Queued ops are not yet reflected.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_ops(&self) -> usize {
        self.pending.len()
    }

    /// Registered subscriptions in registration order.
    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let mut entries: Vec<(&String, &Entry)> = self.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(channel, entry)| SubscriptionInfo {
                channel: channel.clone(),
                handle_id: entry.handle_id,
                status: entry.status,
                registered_at: entry.registered_at,
            })
            .collect()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
