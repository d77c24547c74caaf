//! Inbound frame routing.
//!
//! Every text frame from the transport passes through [`MessageRouter`]:
//! it is decoded with the active [`WireProtocol`], messages are matched to
//! their subscription and handed to the handler inside an isolation
//! boundary, and everything else is returned to the connection loop as a
//! control frame.

mod message;

pub use message::InboundMessage;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

use crate::error::ClientError;
use crate::metrics::FrameMetrics;
use crate::protocol::{MessageBody, ProtocolError, ServerFrame, WireProtocol};
use crate::subscription::{SharedHandler, SubscriptionRegistry};

/// What happened to an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Not a message; the connection loop handles it
    Control(ServerFrame),
    Delivered { destination: String },
    /// No subscription for the destination
    Unrouted { destination: String },
    /// The handler returned an error or panicked
    HandlerFailed(ClientError),
    /// The frame could not be decoded. `teardown` is set once the consecutive
    /// error threshold is reached.
    Rejected {
        error: ProtocolError,
        teardown: bool,
    },
}

/// Routing counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub frames_received: u64,
    pub delivered: u64,
    pub unrouted: u64,
    pub handler_failures: u64,
    pub protocol_errors: u64,
}

pub struct MessageRouter {
    protocol: WireProtocol,
    max_protocol_errors: u32,
    consecutive_errors: u32,
    stats: RouterStats,
}

impl MessageRouter {
    pub fn new(protocol: WireProtocol, max_protocol_errors: u32) -> Self {
        Self {
            protocol,
            max_protocol_errors: max_protocol_errors.max(1),
            consecutive_errors: 0,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Start counting protocol errors from zero, e.g. on a new link.
    pub fn reset_errors(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Count a frame the transport could not hand over as text.
    pub fn reject_unreadable(&mut self, reason: impl Into<String>) -> Routed {
        self.stats.frames_received += 1;
        FrameMetrics::record_received();
        self.reject(ProtocolError::MalformedFrame(reason.into()))
    }

    /// Decode and dispatch one text frame.
    pub fn route(&mut self, text: &str, registry: &SubscriptionRegistry) -> Routed {
        self.stats.frames_received += 1;
        FrameMetrics::record_received();

        let frame = match self.protocol.decode(text) {
            Ok(frame) => frame,
            Err(error) => return self.reject(error),
        };

        let (destination, body) = match frame {
            ServerFrame::Message { destination, body } => (destination, body),
            control => {
                self.consecutive_errors = 0;
                return Routed::Control(control);
            }
        };

        self.dispatch(destination, body, registry)
    }

    fn dispatch(
        &mut self,
        destination: String,
        body: MessageBody,
        registry: &SubscriptionRegistry,
    ) -> Routed {
        let payload = match body.into_json() {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(destination = %destination, error = %error, "Dropping message with invalid payload");
                return self.reject(error);
            }
        };
        self.consecutive_errors = 0;

        let Some(handler) = registry.lookup(&destination) else {
            tracing::trace!(destination = %destination, "No subscription for destination, dropping");
            self.stats.unrouted += 1;
            FrameMetrics::record_unrouted();
            return Routed::Unrouted { destination };
        };

        let message = InboundMessage::new(destination, payload);
        match invoke(&handler, &message) {
            Ok(()) => {
                self.stats.delivered += 1;
                FrameMetrics::record_delivered();
                Routed::Delivered {
                    destination: message.destination,
                }
            }
            Err(error) => {
                tracing::error!(
                    destination = %message.destination,
                    error = %error,
                    "Message handler failed"
                );
                self.stats.handler_failures += 1;
                FrameMetrics::record_handler_failure();
                Routed::HandlerFailed(error)
            }
        }
    }

    fn reject(&mut self, error: ProtocolError) -> Routed {
        self.consecutive_errors += 1;
        self.stats.protocol_errors += 1;
        FrameMetrics::record_protocol_error();

        let teardown = self.consecutive_errors >= self.max_protocol_errors;
        if teardown {
            tracing::warn!(
                consecutive = self.consecutive_errors,
                error = %error,
                "Protocol error threshold reached"
            );
        } else {
            tracing::warn!(
                consecutive = self.consecutive_errors,
                error = %error,
                "Dropping undecodable frame"
            );
        }
        Routed::Rejected { error, teardown }
    }
}

/// Run the handler so that neither an error nor a panic escapes.
fn invoke(handler: &SharedHandler, message: &InboundMessage) -> Result<(), ClientError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message)));
    let failure = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => format!("{:#}", e),
        Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
    };
    Err(ClientError::Handler {
        channel: message.destination.clone(),
        message: failure,
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
