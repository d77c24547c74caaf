//! The connection actor.
//!
//! One task owns the transport link, the reconnection policy, the
//! subscription registry, the heartbeat monitor and every timer. Commands
//! from [`ConnectionManager`](super::ConnectionManager), transport events and
//! timer expiries are handled strictly one at a time.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use url::Url;
use uuid::Uuid;

use super::manager::ManagerConfig;
use super::scheduler::{Scheduler, TimerKind};
use super::stats::{ConnectionStats, LoopCounters};
use super::types::{ConnectionEvent, ConnectionState};
use crate::error::ClientError;
use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::{ConnectionMetrics, FrameMetrics, SubscriptionMetrics};
use crate::protocol::{ClientFrame, ServerFrame, WireProtocol};
use crate::reconnect::{ReconnectPolicy, RetryDecision};
use crate::router::{MessageRouter, Routed};
use crate::subscription::{SharedHandler, SubscriptionHandle, SubscriptionRegistry};
use crate::transport::{Credentials, Transport, TransportEvent, TransportLink};

type OpenFuture = BoxFuture<'static, Result<TransportLink, ClientError>>;

/// Requests from the public handle
pub(crate) enum Command {
    Connect {
        credentials: Credentials,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        handle: SubscriptionHandle,
        handler: SharedHandler,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
    },
    Send {
        channel: String,
        payload: Value,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<ConnectionStats>,
    },
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
}

enum Wakeup {
    Command(Option<Command>),
    Link(Option<TransportEvent>),
    Opened(Result<TransportLink, ClientError>),
    Timer,
}

pub(crate) struct EventLoop {
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    protocol: WireProtocol,
    /// `host` header of the handshake, taken from the endpoint URL
    host: String,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,

    state: ConnectionState,
    policy: ReconnectPolicy,
    registry: SubscriptionRegistry,
    heartbeat: HeartbeatMonitor,
    router: MessageRouter,
    scheduler: Scheduler,

    credentials: Option<Credentials>,
    link: Option<TransportLink>,
    opening: Option<OpenFuture>,
    outbox: VecDeque<ClientFrame>,
    session_id: Option<String>,
    connected_since: Option<DateTime<Utc>>,
    counters: LoopCounters,
}

async fn next_link_event(link: &mut Option<TransportLink>) -> Option<TransportEvent> {
    match link.as_mut() {
        Some(link) => link.next_event().await,
        None => pending().await,
    }
}

async fn poll_opening(opening: &mut Option<OpenFuture>) -> Result<TransportLink, ClientError> {
    match opening.as_mut() {
        Some(open) => open.await,
        None => pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

fn endpoint_host(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

impl EventLoop {
    pub(crate) fn new(
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        events_tx: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let protocol = WireProtocol::from(config.client.protocol);
        Self {
            host: endpoint_host(&config.client.url),
            policy: ReconnectPolicy::new(&config.reconnect),
            heartbeat: HeartbeatMonitor::new(&config.heartbeat),
            router: MessageRouter::new(protocol, config.client.max_protocol_errors),
            registry: SubscriptionRegistry::new(),
            scheduler: Scheduler::new(),
            state: ConnectionState::Disconnected,
            credentials: None,
            link: None,
            opening: None,
            outbox: VecDeque::new(),
            session_id: None,
            connected_since: None,
            counters: LoopCounters::default(),
            config,
            transport,
            protocol,
            commands,
            state_tx,
            events_tx,
        }
    }

    #[tracing::instrument(name = "connection_loop", skip_all)]
    pub(crate) async fn run(mut self) {
        tracing::info!(
            transport = self.transport.name(),
            protocol = self.protocol.name(),
            url = %self.config.client.url,
            "Connection loop started"
        );

        loop {
            let deadline = self.scheduler.next_deadline();
            let wakeup = tokio::select! {
                biased;
                cmd = self.commands.recv() => Wakeup::Command(cmd),
                event = next_link_event(&mut self.link) => Wakeup::Link(event),
                opened = poll_opening(&mut self.opening) => Wakeup::Opened(opened),
                _ = sleep_until_deadline(deadline) => Wakeup::Timer,
            };

            match wakeup {
                Wakeup::Command(Some(cmd)) => {
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                Wakeup::Command(None) => {
                    tracing::debug!("All manager handles dropped");
                    self.teardown_session();
                    break;
                }
                Wakeup::Link(event) => self.handle_link_event(event),
                Wakeup::Opened(result) => {
                    self.opening = None;
                    self.handle_opened(result);
                }
                Wakeup::Timer => self.fire_timers(),
            }
        }

        tracing::info!("Connection loop stopped");
    }

    /// Returns false when the loop must stop.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Connect { credentials, reply } => {
                self.connect(credentials);
                let _ = reply.send(());
            }
            Command::Subscribe { handle, handler } => {
                if let Some(op) = self.registry.subscribe(handle, handler) {
                    if let Err(e) = self.transmit(&op.into_frame()) {
                        tracing::warn!(error = %e, "Failed to send subscribe, will resubmit on reconnect");
                    }
                }
                SubscriptionMetrics::set_active(self.registry.len());
            }
            Command::Unsubscribe { handle } => {
                if let Some(op) = self.registry.unsubscribe(handle) {
                    if let Err(e) = self.transmit(&op.into_frame()) {
                        tracing::warn!(error = %e, "Failed to send unsubscribe");
                    }
                }
                SubscriptionMetrics::set_active(self.registry.len());
            }
            Command::Send { channel, payload } => {
                self.send_or_queue(ClientFrame::Send { channel, payload });
            }
            Command::Disconnect { reply } => {
                self.teardown_session();
                let _ = reply.send(());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { reply } => {
                tracing::info!("Connection manager shutting down");
                self.teardown_session();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return false;
            }
        }
        true
    }

    fn connect(&mut self, credentials: Credentials) {
        if !matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            tracing::debug!(state = %self.state, "Connect ignored, connection already active");
            return;
        }

        self.scheduler.cancel(TimerKind::Cooldown);
        self.credentials = Some(credentials);
        if !self.policy.begin() {
            return;
        }

        self.set_state(ConnectionState::Connecting);
        self.emit(ConnectionEvent::Connecting);
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        let Some(credentials) = self.credentials.clone() else {
            tracing::warn!("No credentials set, cannot open a connection");
            return;
        };
        if self.link.is_some() || self.opening.is_some() {
            self.drop_link();
        }

        self.counters.connect_attempts += 1;
        if self.state == ConnectionState::Reconnecting {
            ConnectionMetrics::record_reconnect_attempt();
        }
        tracing::debug!(
            attempt = self.policy.retry_count() + 1,
            identity = %credentials.identity,
            "Opening transport"
        );

        let transport = self.transport.clone();
        let url = self.config.client.url.clone();
        self.opening = Some(Box::pin(async move {
            transport.open(&url, &credentials).await
        }));
    }

    fn handle_opened(&mut self, result: Result<TransportLink, ClientError>) {
        let link = match result {
            Ok(link) => link,
            Err(ClientError::InvalidUrl(reason)) => {
                self.fail_permanently(ClientError::InvalidUrl(reason));
                return;
            }
            Err(error) => {
                self.handle_failure(error);
                return;
            }
        };

        tracing::debug!(connection_id = %link.id(), "Transport open, sending handshake");
        self.link = Some(link);
        self.router.reset_errors();

        let credentials = self.credentials.clone().unwrap_or_default();
        let handshake = ClientFrame::Connect {
            identity: credentials.identity,
            token: credentials.token,
            host: self.host.clone(),
            heartbeat_ms: if self.config.heartbeat.enabled {
                self.config.heartbeat.interval_ms
            } else {
                0
            },
        };
        if let Err(e) = self.transmit(&handshake) {
            self.handle_failure(e);
            return;
        }
        self.scheduler.arm(
            TimerKind::Handshake,
            self.config.transport.handshake_timeout(),
        );
    }

    fn handle_link_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(text)) => self.handle_text(&text),
            Some(TransportEvent::Malformed(reason)) => {
                let routed = self.router.reject_unreadable(reason);
                self.handle_routed(routed);
            }
            Some(TransportEvent::Error(reason)) => {
                self.handle_failure(ClientError::ConnectionClosed(format!(
                    "transport error: {}",
                    reason
                )));
            }
            Some(TransportEvent::Closed(close)) => {
                tracing::debug!(code = ?close.code, reason = %close.reason, "Transport closed by peer");
                self.handle_failure(ClientError::ConnectionClosed(close.reason));
            }
            None => {
                self.handle_failure(ClientError::ConnectionClosed(
                    "transport link dropped".to_string(),
                ));
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let routed = self.router.route(text, &self.registry);
        self.handle_routed(routed);
    }

    fn handle_routed(&mut self, routed: Routed) {
        match routed {
            Routed::Control(frame) => self.handle_control(frame),
            Routed::Rejected {
                error,
                teardown: true,
            } => self.handle_failure(ClientError::Protocol(error)),
            _ => {}
        }
    }

    fn handle_control(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Connected { session_id } => self.on_handshake(session_id),
            ServerFrame::Pong { nonce } => {
                if self.heartbeat.acknowledge(nonce, Instant::now()).is_some() {
                    self.scheduler.cancel(TimerKind::HeartbeatTimeout);
                }
            }
            ServerFrame::Heartbeat => tracing::trace!("Server heartbeat"),
            ServerFrame::Subscribed { channels } => {
                tracing::debug!(channels = ?channels, "Subscription confirmed");
            }
            ServerFrame::Unsubscribed { channels } => {
                tracing::debug!(channels = ?channels, "Unsubscription confirmed");
            }
            ServerFrame::Receipt { id } => tracing::debug!(receipt = %id, "Receipt"),
            ServerFrame::Error { code, message } => {
                tracing::warn!(code = %code, message = %message, "Server reported an error");
                if self.scheduler.is_armed(TimerKind::Handshake) {
                    self.handle_failure(ClientError::ConnectionRefused(format!(
                        "{}: {}",
                        code, message
                    )));
                }
            }
            ServerFrame::Message { destination, .. } => {
                tracing::trace!(destination = %destination, "Message reached control handling");
            }
        }
    }

    fn on_handshake(&mut self, session_id: Option<String>) {
        if !self.scheduler.cancel(TimerKind::Handshake) {
            tracing::debug!("Ignoring handshake confirmation outside of a connect attempt");
            return;
        }
        if !self.policy.on_connected() {
            return;
        }

        let connection_id = self
            .link
            .as_ref()
            .map(TransportLink::id)
            .unwrap_or_else(Uuid::nil);
        self.session_id = session_id.clone();
        self.connected_since = Some(Utc::now());
        self.counters.connections_established += 1;
        ConnectionMetrics::record_established();
        self.set_state(ConnectionState::Connected);

        let ops = self.registry.go_online();
        SubscriptionMetrics::record_resubscribed(ops.len());
        SubscriptionMetrics::set_active(self.registry.len());
        for op in ops {
            if let Err(e) = self.transmit(&op.into_frame()) {
                tracing::warn!(error = %e, "Failed to resubmit subscription");
                break;
            }
        }
        self.flush_outbox();

        if self.heartbeat.start() {
            self.scheduler
                .arm(TimerKind::HeartbeatProbe, self.heartbeat.interval());
        }

        tracing::info!(
            connection_id = %connection_id,
            session_id = ?session_id,
            subscriptions = self.registry.len(),
            "Connected"
        );
        self.emit(ConnectionEvent::Connected {
            connection_id,
            session_id,
        });
    }

    fn fire_timers(&mut self) {
        let pass = self.scheduler.pass(Instant::now());
        while let Some(kind) = self.scheduler.pop_expired(pass) {
            tracing::trace!(timer = ?kind, "Timer fired");
            match kind {
                TimerKind::Reconnect => {
                    if self.policy.on_retry_due() {
                        self.start_attempt();
                    }
                }
                TimerKind::Cooldown => {
                    if self.policy.on_cooldown_elapsed() {
                        tracing::info!("Cooldown elapsed, starting a fresh attempt cycle");
                        self.set_state(ConnectionState::Connecting);
                        self.emit(ConnectionEvent::Connecting);
                        self.start_attempt();
                    }
                }
                TimerKind::Handshake => {
                    let timeout = self.config.transport.handshake_timeout();
                    self.handle_failure(ClientError::Timeout(format!(
                        "handshake not confirmed within {:?}",
                        timeout
                    )));
                }
                TimerKind::HeartbeatProbe => self.send_probe(),
                TimerKind::HeartbeatTimeout => {
                    if self.heartbeat.expire() {
                        let timeout = self.heartbeat.timeout();
                        self.handle_failure(ClientError::Timeout(format!(
                            "heartbeat not acknowledged within {:?}",
                            timeout
                        )));
                    }
                }
            }
        }
    }

    fn send_probe(&mut self) {
        if !self.heartbeat.is_running() {
            return;
        }
        self.scheduler
            .arm(TimerKind::HeartbeatProbe, self.heartbeat.interval());

        let Some(nonce) = self.heartbeat.probe(Instant::now()) else {
            return;
        };
        if let Err(e) = self.transmit(&ClientFrame::Ping { nonce }) {
            tracing::warn!(error = %e, "Failed to send heartbeat probe");
        }
        self.scheduler
            .arm(TimerKind::HeartbeatTimeout, self.heartbeat.timeout());
    }

    /// An attempt failed or the live connection was lost.
    fn handle_failure(&mut self, error: ClientError) {
        ConnectionMetrics::record_failure(error.code());
        if self.state == ConnectionState::Connected {
            tracing::warn!(error = %error, "Connection lost");
        } else {
            tracing::warn!(error = %error, "Connection attempt failed");
        }

        self.drop_link();

        match self.policy.on_failure() {
            RetryDecision::Retry { attempt, delay } => {
                self.scheduler.arm(TimerKind::Reconnect, delay);
                self.set_state(ConnectionState::Reconnecting);
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.emit(ConnectionEvent::Reconnecting {
                    attempt,
                    delay,
                    error,
                });
            }
            RetryDecision::Cooldown { attempts, cooldown } => {
                self.scheduler.arm(TimerKind::Cooldown, cooldown);
                self.exhausted(attempts, Some(cooldown));
            }
            RetryDecision::GiveUp { attempts } => self.exhausted(attempts, None),
            RetryDecision::Ignored => {}
        }
    }

    fn exhausted(&mut self, attempts: u32, cooldown: Option<Duration>) {
        ConnectionMetrics::record_exhausted();
        tracing::error!(
            attempts,
            cooldown_ms = cooldown.map(|c| c.as_millis() as u64),
            "Reconnection attempts exhausted"
        );
        self.set_state(ConnectionState::Failed);
        self.emit(ConnectionEvent::Failed(ClientError::ExhaustedRetries {
            attempts,
        }));
    }

    /// Non-retryable failure: stop until the host connects again.
    fn fail_permanently(&mut self, error: ClientError) {
        tracing::error!(error = %error, "Connection cannot be established");
        ConnectionMetrics::record_failure(error.code());
        self.drop_link();
        self.scheduler.cancel_all();
        self.policy.reset();
        self.set_state(ConnectionState::Failed);
        self.emit(ConnectionEvent::Failed(error));
    }

    /// Tear down the link and everything bound to it.
    fn drop_link(&mut self) {
        self.opening = None;
        self.scheduler.cancel(TimerKind::Handshake);
        self.scheduler.cancel(TimerKind::HeartbeatProbe);
        self.scheduler.cancel(TimerKind::HeartbeatTimeout);
        self.heartbeat.stop();
        self.registry.go_offline();
        self.session_id = None;
        self.connected_since = None;
        if let Some(link) = self.link.take() {
            tracing::debug!(connection_id = %link.id(), "Closing transport link");
            link.close();
        }
    }

    /// Host-initiated teardown. Subscriptions are kept for the next connect.
    fn teardown_session(&mut self) {
        self.drop_link();
        self.scheduler.cancel_all();
        self.policy.reset();
        if !self.outbox.is_empty() {
            tracing::debug!(dropped = self.outbox.len(), "Discarding queued sends");
            self.outbox.clear();
        }
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            tracing::info!("Disconnected");
            self.emit(ConnectionEvent::Disconnected);
        }
    }

    fn transmit(&mut self, frame: &ClientFrame) -> Result<(), ClientError> {
        let Some(link) = self.link.as_ref() else {
            return Err(ClientError::ConnectionClosed(
                "no active transport link".to_string(),
            ));
        };
        let text = self.protocol.encode(frame)?;
        link.send(text)?;
        self.counters.frames_sent += 1;
        FrameMetrics::record_sent();
        tracing::trace!(kind = frame.kind(), "Frame sent");
        Ok(())
    }

    fn send_or_queue(&mut self, frame: ClientFrame) {
        if self.state == ConnectionState::Connected {
            match self.transmit(&frame) {
                Ok(()) => return,
                Err(e) => tracing::warn!(error = %e, "Send failed, queueing for reconnect"),
            }
        }
        self.enqueue(frame);
    }

    /// Bounded outbox; the oldest frame is dropped when full.
    fn enqueue(&mut self, frame: ClientFrame) {
        let capacity = self.config.client.outbox_capacity;
        if capacity == 0 {
            self.counters.outbox_dropped += 1;
            FrameMetrics::record_outbox_dropped();
            return;
        }
        if self.outbox.len() >= capacity {
            self.outbox.pop_front();
            self.counters.outbox_dropped += 1;
            FrameMetrics::record_outbox_dropped();
            tracing::warn!(capacity, "Outbox full, dropping oldest queued send");
        }
        self.outbox.push_back(frame);
    }

    fn flush_outbox(&mut self) {
        if !self.outbox.is_empty() {
            tracing::debug!(queued = self.outbox.len(), "Flushing queued sends");
        }
        while let Some(frame) = self.outbox.pop_front() {
            if let Err(e) = self.transmit(&frame) {
                tracing::warn!(error = %e, "Failed to flush queued send");
                self.outbox.push_front(frame);
                break;
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        ConnectionMetrics::record_state(state);
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state,
            connection_id: self.link.as_ref().map(TransportLink::id),
            session_id: self.session_id.clone(),
            connected_since: self.connected_since,
            retry_count: self.policy.retry_count(),
            subscriptions: self.registry.snapshot(),
            queued_subscription_ops: self.registry.pending_ops(),
            outbox_len: self.outbox.len(),
            outbox_dropped: self.counters.outbox_dropped,
            connections_established: self.counters.connections_established,
            connect_attempts: self.counters.connect_attempts,
            frames_sent: self.counters.frames_sent,
            router: self.router.stats().clone(),
            heartbeat: self.heartbeat.stats().clone(),
            armed_timers: self.scheduler.armed(),
        }
    }
}
