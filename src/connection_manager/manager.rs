use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use super::event_loop::{Command, EventLoop};
use super::stats::ConnectionStats;
use super::types::{ConnectionEvent, ConnectionState};
use crate::config::{ClientConfig, HeartbeatConfig, ReconnectConfig, Settings, TransportConfig};
use crate::error::{ClientError, Result};
use crate::protocol::WireProtocol;
use crate::subscription::{MessageHandler, SharedHandler, SubscriptionHandle};
use crate::transport::{create_transport, Credentials, Transport};

/// Configuration consumed by a connection manager
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub client: ClientConfig,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub transport: TransportConfig,
}

impl From<&Settings> for ManagerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            client: settings.client.clone(),
            reconnect: settings.reconnect.clone(),
            heartbeat: settings.heartbeat.clone(),
            transport: settings.transport.clone(),
        }
    }
}

/// Handle to one realtime connection.
///
/// All work happens on a background task; every method here only enqueues a
/// command. Dropping the manager shuts that task down, `dispose` does the
/// same and waits for it.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    next_handle_id: AtomicU64,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager over `transport`. Must be called within a tokio runtime.
    pub fn new(config: ManagerConfig, transport: Arc<dyn Transport>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(config.client.event_buffer.max(1));

        let event_loop = EventLoop::new(config, transport, cmd_rx, state_tx, events_tx.clone());
        let task = tokio::spawn(event_loop.run());

        Self {
            commands: cmd_tx,
            state: state_rx,
            events: events_tx,
            next_handle_id: AtomicU64::new(1),
            task: Some(task),
        }
    }

    /// Validate settings and build the manager with the configured transport.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let transport = create_transport(
            &settings.transport,
            WireProtocol::from(settings.client.protocol),
        );
        Ok(Self::new(ManagerConfig::from(settings), transport))
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).map_err(|_| ClientError::Shutdown)
    }

    /// Start connecting as `credentials`. Returns once the request is
    /// accepted; progress is reported through [`ConnectionManager::events`].
    ///
    /// Ignored while a connection is already active.
    pub async fn connect(&self, credentials: impl Into<Credentials>) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.command(Command::Connect {
            credentials: credentials.into(),
            reply,
        })?;
        done.await.map_err(|_| ClientError::Shutdown)
    }

    /// Register `handler` for `channel`.
    ///
    /// Subscribing again to the same channel replaces its handler and returns
    /// a new handle.
    pub fn subscribe<H>(&self, channel: impl Into<String>, handler: H) -> Result<SubscriptionHandle>
    where
        H: MessageHandler,
    {
        self.subscribe_shared(channel, Arc::new(handler))
    }

    pub fn subscribe_shared(
        &self,
        channel: impl Into<String>,
        handler: SharedHandler,
    ) -> Result<SubscriptionHandle> {
        let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        let handle = SubscriptionHandle::new(id, channel);
        self.command(Command::Subscribe {
            handle: handle.clone(),
            handler,
        })?;
        Ok(handle)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.command(Command::Unsubscribe {
            handle: handle.clone(),
        })
    }

    /// Publish `payload` on `channel`. Queued while not connected.
    pub fn send<T: Serialize + ?Sized>(&self, channel: impl Into<String>, payload: &T) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        self.command(Command::Send {
            channel: channel.into(),
            payload,
        })
    }

    /// Tear the connection down. No event is emitted after this returns.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.command(Command::Disconnect { reply })?;
        done.await.map_err(|_| ClientError::Shutdown)
    }

    /// End the manager and wait for its task to finish.
    pub async fn dispose(mut self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.command(Command::Shutdown { reply: Some(reply) })?;
        let _ = done.await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Connection task ended abnormally");
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Lifecycle events emitted from now on.
    pub fn events(&self) -> BroadcastStream<ConnectionEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Raw receiver for lifecycle events.
    pub fn event_receiver(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub async fn stats(&self) -> Result<ConnectionStats> {
        let (reply, done) = oneshot::channel();
        self.command(Command::Stats { reply })?;
        done.await.map_err(|_| ClientError::Shutdown)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Best effort: the task also stops once every sender is gone
        let _ = self.commands.send(Command::Shutdown { reply: None });
    }
}
