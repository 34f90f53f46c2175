/// Transmitter: one payload, whole-transfer retries.
///
/// ```text
/// drain inbound status left over from earlier transfers
/// attempt 1..=max_retries:
///   start handshake -> settle -> chunks 0..n (paced) -> end handshake
///   ack window: "retry: ..." -> resend listed chunks (paced, window keeps running)
///               "photo <tag> ok" -> "Photo <tag> sent", Delivered
///   window elapsed -> next attempt
/// ```
///
/// The call blocks for the whole transfer. Total time is bounded by
/// `max_retries * (streaming + ack_timeout)`. Transient receive errors
/// inside an ack window are logged and the window keeps running.

use std::sync::Arc;
use std::time::Duration;

use vultur_link::{Channel, LinkError, Message};

use crate::config::TransferConfig;
use crate::descriptor::TransferDescriptor;
use crate::error::TransferError;
use crate::logging::{TracingLogger, TransferEvent, TransferLog, TransferLogger};
use crate::session::TransferSession;
use crate::stats::TransferStats;
use crate::status::{StatusLine, photo_sent};

const COMPONENT: &str = "transmitter";

/// Upper bound on stale messages discarded before a transfer.
const MAX_STALE: usize = 256;

/// Pause after a transient receive error inside the ack window.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How a transfer ended. `attempts` counts start handshakes sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32 },
}

impl Outcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Outcome::Delivered { .. })
    }
}

pub struct Transmitter {
    channel: Arc<dyn Channel>,
    config: TransferConfig,
    logger: Arc<dyn TransferLogger>,
    stats: Arc<TransferStats>,
}

impl Transmitter {
    pub fn new(channel: Arc<dyn Channel>, config: TransferConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            channel,
            config,
            logger: Arc::new(TracingLogger),
            stats: Arc::new(TransferStats::new()),
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_stats(mut self, stats: Arc<TransferStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<TransferStats> {
        &self.stats
    }

    /// Deliver `descriptor`. Lost messages and missing acks end in
    /// `Outcome::Failed`; `Err` means the descriptor cannot be sent or the
    /// link is gone.
    pub fn send(&mut self, descriptor: &TransferDescriptor) -> Result<Outcome, TransferError> {
        let packet_count = descriptor.validate(self.config.chunk_size)?;
        let max_retries = self.config.max_retries;
        self.drain_stale(&descriptor.tag);

        for attempt in 1..=max_retries {
            TransferStats::bump(&self.stats.attempts);
            let mut session = TransferSession::new(descriptor, &self.config, attempt, packet_count);
            self.log(
                &descriptor.tag,
                TransferEvent::AttemptStarted {
                    attempt,
                    max_retries,
                    packet_count,
                    pacing_ms: session.pacing.as_millis() as u64,
                },
            );

            match self.run_attempt(&mut session) {
                Ok(true) => {
                    self.log(
                        &descriptor.tag,
                        TransferEvent::AckReceived {
                            attempt,
                            duration_ms: session.elapsed().as_millis() as u64,
                        },
                    );
                    let sent = photo_sent(&descriptor.tag, self.config.status_max_len);
                    if let Err(e) = self.channel.send(&Message::Status(sent)) {
                        tracing::warn!(tag = %descriptor.tag, error = %e, "completion line not sent");
                    }
                    TransferStats::bump(&self.stats.delivered);
                    return Ok(Outcome::Delivered { attempts: attempt });
                }
                Ok(false) => {
                    self.log(&descriptor.tag, TransferEvent::AckTimeout { attempt });
                }
                Err(e) if e.is_terminal() => {
                    self.log(
                        &descriptor.tag,
                        TransferEvent::LinkError {
                            message: e.to_string(),
                        },
                    );
                    TransferStats::bump(&self.stats.failed);
                    return Err(e.into());
                }
                Err(e) => {
                    self.log(
                        &descriptor.tag,
                        TransferEvent::LinkError {
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        TransferStats::bump(&self.stats.failed);
        self.log(
            &descriptor.tag,
            TransferEvent::TransferFailed {
                attempts: max_retries,
            },
        );
        Ok(Outcome::Failed {
            attempts: max_retries,
        })
    }

    /// One attempt. Ok(true) when acknowledged inside the window.
    fn run_attempt(&self, session: &mut TransferSession<'_>) -> Result<bool, LinkError> {
        self.channel
            .send(&Message::Handshake(session.start_handshake()))?;
        pause(self.config.settle_delay());

        for seq in 0..session.packet_count {
            if let Some(chunk) = session.chunk(seq) {
                self.channel.send(&Message::Chunk(chunk))?;
                TransferStats::bump(&self.stats.chunks_sent);
                pause(session.pacing);
            }
        }

        self.channel
            .send(&Message::Handshake(session.end_handshake()))?;
        self.log(
            session.tag(),
            TransferEvent::ChunksStreamed {
                attempt: session.attempt,
                packet_count: session.packet_count,
            },
        );

        session.arm_ack_window(self.config.ack_timeout());
        loop {
            let remaining = session.remaining();
            if remaining.is_zero() {
                return Ok(false);
            }
            let msg = match self.channel.recv_timeout(remaining.min(self.config.ack_poll())) {
                Ok(Some(Message::Status(status))) => status,
                // Handshakes and chunks are not ours to answer.
                Ok(Some(_)) | Ok(None) => continue,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    self.log(session.tag(), TransferEvent::LinkError { message: e.to_string() });
                    pause(RECV_ERROR_BACKOFF.min(self.config.ack_poll()).min(session.remaining()));
                    continue;
                }
            };

            match StatusLine::parse(&msg.text) {
                line @ StatusLine::PhotoOk { .. } if line.acknowledges(session.tag()) => {
                    return Ok(true);
                }
                StatusLine::Retry(sequences) => {
                    self.log(
                        session.tag(),
                        TransferEvent::RetransmitRequest {
                            attempt: session.attempt,
                            sequences: sequences.clone(),
                        },
                    );
                    for seq in sequences {
                        if let Some(chunk) = session.chunk(seq) {
                            self.channel.send(&Message::Chunk(chunk))?;
                            session.resent += 1;
                            TransferStats::bump(&self.stats.chunks_resent);
                            pause(session.pacing);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Discard whatever is already queued inbound, so a late
    /// acknowledgment from an earlier transfer cannot confirm this one.
    fn drain_stale(&self, tag: &str) {
        let mut stale = 0;
        while stale < MAX_STALE {
            match self.channel.recv_timeout(Duration::ZERO) {
                Ok(Some(_)) => stale += 1,
                _ => break,
            }
        }
        if stale > 0 {
            tracing::debug!(tag = %tag, stale, "discarded inbound messages before transfer");
        }
    }

    fn log(&self, tag: &str, event: TransferEvent) {
        self.logger.log(TransferLog::new(COMPONENT, tag, event));
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
