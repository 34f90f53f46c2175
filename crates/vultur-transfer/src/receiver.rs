/// Reassembler: the long-lived receive side.
///
/// ```text
/// [channel] --recv--> [Reassembler loop] --try_send--> events (payloads, status)
///                             |
///                             +--push--> [OutboundQueue] --writer thread--> channel
/// ```
///
/// One stream is active at a time. Chunks carry no tag, so they belong to
/// the most recent valid start handshake; a new start handshake abandons
/// whatever was in progress. Chunks may arrive longer than the announced
/// chunk size (ENCAPSULATED_DATA is always 253 bytes) and are cut back to
/// it. The loop never blocks on the consumer or on the radio.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use vultur_link::{Channel, ChunkMessage, Handshake, LinkError, Message, STREAM_KIND_IMG_JPEG, StatusText};

use crate::chunk_table::Insert;
use crate::config::TransferConfig;
use crate::jpeg::{DecodedImage, JpegDecoder, PayloadDecoder};
use crate::logging::{TracingLogger, TransferEvent, TransferLog, TransferLogger};
use crate::outbound::{OutboundQueue, spawn_writer};
use crate::session::StreamSession;
use crate::stats::TransferStats;
use crate::status::{photo_ok, retry_lines};

const COMPONENT: &str = "reassembler";

/// A fully received, decoded payload.
#[derive(Debug, Clone)]
pub struct CompletedPayload {
    pub tag: String,
    pub bytes: Vec<u8>,
    /// Dimensions announced in the handshake.
    pub width: u16,
    pub height: u16,
    pub quality: u8,
    /// What the decoder found.
    pub image: DecodedImage,
}

#[derive(Debug, Clone)]
pub enum ReassemblerEvent {
    Payload(CompletedPayload),
    /// A status line not consumed by the protocol (telemetry, capture state).
    Status(StatusText),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Receiving { received: usize, total: usize },
}

pub struct Reassembler {
    channel: Arc<dyn Channel>,
    outbound: OutboundQueue,
    events: Sender<ReassemblerEvent>,
    config: TransferConfig,
    decoder: Box<dyn PayloadDecoder>,
    logger: Arc<dyn TransferLogger>,
    stats: Arc<TransferStats>,
    streams: HashMap<String, StreamSession>,
    active: Option<String>,
}

impl Reassembler {
    pub fn new(
        channel: Arc<dyn Channel>,
        outbound: OutboundQueue,
        events: Sender<ReassemblerEvent>,
        config: &TransferConfig,
    ) -> Self {
        Self {
            channel,
            outbound,
            events,
            config: config.clone(),
            decoder: Box::new(JpegDecoder),
            logger: Arc::new(TracingLogger),
            stats: Arc::new(TransferStats::new()),
            streams: HashMap::new(),
            active: None,
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn PayloadDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_stats(mut self, stats: Arc<TransferStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stream_state(&self, tag: &str) -> StreamState {
        match self.streams.get(tag) {
            Some(s) => StreamState::Receiving {
                received: s.table.received(),
                total: s.table.total(),
            },
            None => StreamState::Idle,
        }
    }

    /// Tag of the stream chunks are currently routed to.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Dispatch one inbound message.
    pub fn handle(&mut self, msg: Message) {
        match msg {
            Message::Handshake(hs) if hs.stream_kind != STREAM_KIND_IMG_JPEG => {
                tracing::debug!(kind = hs.stream_kind, tag = %hs.tag, "ignoring handshake for unknown stream kind");
            }
            Message::Handshake(hs) if hs.is_start() => self.on_start(hs),
            Message::Handshake(hs) => self.on_end(&hs.tag),
            Message::Chunk(chunk) => self.on_chunk(chunk),
            Message::Status(status) => self.on_status(status),
        }
    }

    /// Receive until `cancelled` is set or the link closes.
    pub fn run(mut self, cancelled: Arc<AtomicBool>) -> Result<(), LinkError> {
        let poll = self.config.receive_poll();
        while !cancelled.load(Ordering::Relaxed) {
            match self.channel.recv_timeout(poll) {
                Ok(Some(msg)) => self.handle(msg),
                Ok(None) => {}
                Err(e) if e.is_terminal() => {
                    self.log("-", TransferEvent::LinkError { message: e.to_string() });
                    return Err(e);
                }
                Err(e) => {
                    self.log("-", TransferEvent::LinkError { message: e.to_string() });
                    std::thread::sleep(poll.min(std::time::Duration::from_millis(100)));
                }
            }
        }
        Ok(())
    }

    fn on_start(&mut self, hs: Handshake) {
        if !StreamSession::is_consistent(&hs) {
            tracing::debug!(tag = %hs.tag, size = hs.total_size, packets = hs.packet_count, "ignoring inconsistent start handshake");
            return;
        }

        // Newest start wins: drop every stream in progress.
        for (tag, session) in self.streams.drain() {
            TransferStats::bump(&self.stats.streams_abandoned);
            self.logger.log(TransferLog::new(
                COMPONENT,
                &tag,
                TransferEvent::StreamAbandoned {
                    received: session.table.received(),
                    total: session.table.total(),
                },
            ));
        }

        self.log(
            &hs.tag,
            TransferEvent::TransferStarted {
                total_size: hs.total_size,
                packet_count: hs.packet_count,
                width: hs.width,
                height: hs.height,
            },
        );
        let tag = hs.tag.clone();
        self.streams.insert(tag.clone(), StreamSession::new(hs));
        self.active = Some(tag);
    }

    fn on_end(&mut self, tag: &str) {
        if self.active.as_deref() != Some(tag) || !self.config.request_missing {
            return;
        }
        let Some(session) = self.streams.get(tag) else {
            return;
        };
        let missing = session.table.missing();
        if missing.is_empty() {
            return;
        }
        self.log(tag, TransferEvent::MissingRequested { missing: missing.len() });
        for line in retry_lines(&missing, self.config.status_max_len) {
            self.outbound.status(line);
        }
    }

    fn on_chunk(&mut self, chunk: ChunkMessage) {
        let Some(tag) = self.active.clone() else {
            TransferStats::bump(&self.stats.chunks_ignored);
            return;
        };
        let Some(session) = self.streams.get_mut(&tag) else {
            TransferStats::bump(&self.stats.chunks_ignored);
            return;
        };
        let chunk_size = session.handshake.chunk_size as usize;
        if chunk.data.len() < chunk_size {
            TransferStats::bump(&self.stats.chunks_ignored);
            return;
        }
        let mut data = chunk.data;
        data.truncate(chunk_size);

        match session.table.insert(chunk.sequence, data) {
            Insert::New => TransferStats::bump(&self.stats.chunks_received),
            Insert::Duplicate => TransferStats::bump(&self.stats.chunks_duplicate),
            Insert::OutOfRange => TransferStats::bump(&self.stats.chunks_ignored),
        }

        if session.table.is_complete() {
            self.complete(&tag);
        }
    }

    fn complete(&mut self, tag: &str) {
        self.active = None;
        let Some(session) = self.streams.remove(tag) else {
            return;
        };
        let Some(bytes) = session.assemble() else {
            return;
        };
        self.log(tag, TransferEvent::assembled(&bytes, session.started.elapsed()));

        let image = match self.decoder.decode(&bytes) {
            Ok(image) => image,
            Err(e) => {
                // No ack: the sender's ack window runs out and it retries.
                TransferStats::bump(&self.stats.decode_failures);
                self.log(tag, TransferEvent::DecodeFailed { reason: e.to_string() });
                return;
            }
        };

        TransferStats::bump(&self.stats.payloads_completed);
        let hs = &session.handshake;
        let payload = CompletedPayload {
            tag: tag.to_string(),
            width: hs.width,
            height: hs.height,
            quality: hs.quality,
            image,
            bytes,
        };
        let size = payload.bytes.len();
        if self.events.try_send(ReassemblerEvent::Payload(payload)).is_err() {
            TransferStats::bump(&self.stats.handoffs_dropped);
            self.log(tag, TransferEvent::HandoffDropped { total_size: size });
        }

        self.outbound.status(photo_ok(tag, self.config.status_max_len));
    }

    fn on_status(&mut self, status: StatusText) {
        if status.severity as u8 > self.config.passthrough_max_severity {
            return;
        }
        match self.events.try_send(ReassemblerEvent::Status(status)) {
            Ok(()) => {}
            Err(TrySendError::Full(ReassemblerEvent::Status(s))) => {
                tracing::debug!(text = %s.text, "event queue full, status line dropped");
            }
            Err(_) => {}
        }
    }

    fn log(&self, tag: &str, event: TransferEvent) {
        self.logger.log(TransferLog::new(COMPONENT, tag, event));
    }
}

/// A reassembler running on its own thread, plus its outbound writer.
pub struct ReassemblerHandle {
    cancelled: Arc<AtomicBool>,
    reader: JoinHandle<Result<(), LinkError>>,
    writer: JoinHandle<()>,
}

impl ReassemblerHandle {
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Stop the loop and wait for both threads. Returns the loop's result.
    pub fn stop(self) -> Result<(), LinkError> {
        self.cancelled.store(true, Ordering::Relaxed);
        let result = self
            .reader
            .join()
            .map_err(|_| LinkError::Io(io::Error::other("reassembler thread panicked")))?;
        let _ = self.writer.join();
        result
    }
}

/// Start a reassembler on `channel` with its writer thread. Completed
/// payloads and pass-through status lines arrive on the returned receiver.
pub fn run_reassembler(
    channel: Arc<dyn Channel>,
    config: &TransferConfig,
    decoder: Box<dyn PayloadDecoder>,
    stats: Arc<TransferStats>,
) -> (ReassemblerHandle, Receiver<ReassemblerEvent>) {
    let (outbound, writer) = spawn_writer(channel.clone(), config.event_queue_depth);
    let (events_tx, events_rx) = bounded(config.event_queue_depth);
    let reassembler = Reassembler::new(channel, outbound, events_tx, config)
        .with_decoder(decoder)
        .with_stats(stats);

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let reader = std::thread::spawn(move || reassembler.run(flag));

    (
        ReassemblerHandle {
            cancelled,
            reader,
            writer,
        },
        events_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{TransferDescriptor, fragment};
    use crate::jpeg::PassthroughDecoder;
    use crate::jpeg::tests::synthetic_jpeg;
    use crate::logging::tests::CollectingLogger;
    use std::time::Duration;
    use vultur_link::{MemoryChannel, Severity, memory_pair};

    struct Rig {
        reassembler: Reassembler,
        events: Receiver<ReassemblerEvent>,
        far: MemoryChannel,
        writer: JoinHandle<()>,
    }

    fn rig(config: TransferConfig, decoder: Box<dyn PayloadDecoder>) -> Rig {
        let (near, far) = memory_pair();
        let near: Arc<dyn Channel> = Arc::new(near);
        let (outbound, writer) = spawn_writer(near.clone(), 16);
        let (tx, events) = bounded(4);
        let reassembler = Reassembler::new(near, outbound, tx, &config).with_decoder(decoder);
        Rig {
            reassembler,
            events,
            far,
            writer,
        }
    }

    impl Rig {
        /// Drop the reassembler and collect what the writer sent.
        fn outbound_lines(self) -> Vec<String> {
            drop(self.reassembler);
            self.writer.join().unwrap();
            let mut lines = Vec::new();
            while let Ok(Some(Message::Status(s))) = self.far.recv_timeout(Duration::from_millis(10)) {
                lines.push(s.text);
            }
            lines
        }
    }

    fn feed(r: &mut Reassembler, desc: &TransferDescriptor, skip: &[u16]) {
        let packets = desc.validate(253).unwrap();
        r.handle(Message::Handshake(desc.start_handshake(253, packets)));
        for chunk in fragment(&desc.payload, 253) {
            if !skip.contains(&chunk.sequence) {
                r.handle(Message::Chunk(chunk));
            }
        }
    }

    #[test]
    fn completes_decodes_and_acks() {
        let mut rig = rig(TransferConfig::default(), Box::new(JpegDecoder));
        let jpeg = synthetic_jpeg(320, 240, 900);
        let desc = TransferDescriptor::new("cam1", jpeg.clone(), 320, 240, 30);
        feed(&mut rig.reassembler, &desc, &[]);

        assert_eq!(rig.reassembler.stream_state("cam1"), StreamState::Idle);
        match rig.events.try_recv().unwrap() {
            ReassemblerEvent::Payload(p) => {
                assert_eq!(p.bytes, jpeg);
                assert_eq!(p.image, DecodedImage { width: 320, height: 240 });
                assert_eq!(p.quality, 30);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rig.outbound_lines(), vec!["Photo cam1 ok".to_string()]);
    }

    #[test]
    fn reversed_and_duplicated_chunks_complete_once() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        let stats = Arc::new(TransferStats::new());
        rig.reassembler = rig.reassembler.with_stats(stats.clone());

        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let desc = TransferDescriptor::new("cam1", payload.clone(), 0, 0, 30);
        rig.reassembler
            .handle(Message::Handshake(desc.start_handshake(253, desc.validate(253).unwrap())));

        let mut chunks: Vec<_> = fragment(&desc.payload, 253).collect();
        chunks.reverse();
        let late = chunks[1].clone();
        rig.reassembler.handle(Message::Chunk(chunks[0].clone()));
        for chunk in chunks {
            rig.reassembler.handle(Message::Chunk(chunk));
        }
        // After completion a straggler has no stream to land in.
        rig.reassembler.handle(Message::Chunk(late));

        match rig.events.try_recv().unwrap() {
            ReassemblerEvent::Payload(p) => assert_eq!(p.bytes, payload),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rig.events.try_recv().is_err());
        let snap = stats.snapshot();
        assert_eq!((snap.chunks_received, snap.chunks_duplicate, snap.chunks_ignored), (4, 1, 1));
        assert_eq!(snap.payloads_completed, 1);
        assert_eq!(rig.outbound_lines(), vec!["Photo cam1 ok".to_string()]);
    }

    #[test]
    fn padded_chunks_are_cut_to_chunk_size() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        let payload: Vec<u8> = (1..=250u8).collect();
        let desc = TransferDescriptor::new("cam1", payload.clone(), 0, 0, 30);
        rig.reassembler
            .handle(Message::Handshake(desc.start_handshake(100, desc.validate(100).unwrap())));
        for mut chunk in fragment(&desc.payload, 100) {
            // What arrives off ENCAPSULATED_DATA.
            chunk.data.resize(253, 0);
            rig.reassembler.handle(Message::Chunk(chunk));
        }
        match rig.events.try_recv().unwrap() {
            ReassemblerEvent::Payload(p) => assert_eq!(p.bytes, payload),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn lifecycle_is_logged() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        let log = Arc::new(CollectingLogger::default());
        rig.reassembler = rig.reassembler.with_logger(log.clone());

        let first = TransferDescriptor::new("cam1", vec![1u8; 600], 0, 0, 30);
        feed(&mut rig.reassembler, &first, &[0]);
        let second = TransferDescriptor::new("cam2", vec![2u8; 300], 0, 0, 30);
        feed(&mut rig.reassembler, &second, &[]);

        let entry = |tag: &str, name: &str| (tag.to_string(), name.to_string());
        assert_eq!(
            log.entries(),
            vec![
                entry("cam1", "transfer_started"),
                entry("cam1", "stream_abandoned"),
                entry("cam2", "transfer_started"),
                entry("cam2", "payload_assembled"),
            ]
        );
    }

    #[test]
    fn decode_failure_is_silent() {
        let mut rig = rig(TransferConfig::default(), Box::new(JpegDecoder));
        let desc = TransferDescriptor::new("cam1", vec![0x55u8; 600], 0, 0, 30);
        feed(&mut rig.reassembler, &desc, &[]);
        assert!(rig.events.try_recv().is_err());
        assert!(rig.outbound_lines().is_empty());
    }

    #[test]
    fn newest_start_wins() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        let first = TransferDescriptor::new("cam1", vec![1u8; 600], 0, 0, 30);
        feed(&mut rig.reassembler, &first, &[2]);
        assert_eq!(
            rig.reassembler.stream_state("cam1"),
            StreamState::Receiving { received: 2, total: 3 }
        );

        let second = TransferDescriptor::new("cam2", vec![2u8; 300], 0, 0, 30);
        feed(&mut rig.reassembler, &second, &[]);
        assert_eq!(rig.reassembler.stream_state("cam1"), StreamState::Idle);

        match rig.events.try_recv().unwrap() {
            ReassemblerEvent::Payload(p) => {
                assert_eq!(p.tag, "cam2");
                assert_eq!(p.bytes, vec![2u8; 300]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rig.outbound_lines(), vec!["Photo cam2 ok".to_string()]);
    }

    #[test]
    fn restart_mid_stream_resets_table() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        let desc = TransferDescriptor::new("cam1", vec![9u8; 600], 0, 0, 30);
        feed(&mut rig.reassembler, &desc, &[1, 2]);
        feed(&mut rig.reassembler, &desc, &[0]);
        assert_eq!(
            rig.reassembler.stream_state("cam1"),
            StreamState::Receiving { received: 2, total: 3 }
        );
    }

    #[test]
    fn end_handshake_requests_missing_when_enabled() {
        let config = TransferConfig {
            request_missing: true,
            ..TransferConfig::default()
        };
        let mut rig = rig(config, Box::new(PassthroughDecoder));
        let desc = TransferDescriptor::new("cam1", vec![3u8; 1000], 0, 0, 30);
        feed(&mut rig.reassembler, &desc, &[1, 3]);
        rig.reassembler.handle(Message::Handshake(desc.end_handshake()));
        assert_eq!(rig.outbound_lines(), vec!["retry: 1 3".to_string()]);
    }

    #[test]
    fn end_handshake_is_quiet_by_default() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        let desc = TransferDescriptor::new("cam1", vec![3u8; 1000], 0, 0, 30);
        feed(&mut rig.reassembler, &desc, &[1]);
        rig.reassembler.handle(Message::Handshake(desc.end_handshake()));
        assert_eq!(
            rig.reassembler.stream_state("cam1"),
            StreamState::Receiving { received: 3, total: 4 }
        );
        assert!(rig.outbound_lines().is_empty());
    }

    #[test]
    fn ignores_strays_and_malformed() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        // Chunk with no active stream.
        rig.reassembler.handle(Message::Chunk(ChunkMessage { sequence: 0, data: vec![0; 253] }));
        // Inconsistent start handshake.
        let mut bad = TransferDescriptor::new("cam1", vec![1u8; 600], 0, 0, 30).start_handshake(253, 3);
        bad.packet_count = 7;
        rig.reassembler.handle(Message::Handshake(bad));
        assert_eq!(rig.reassembler.active(), None);

        let desc = TransferDescriptor::new("cam1", vec![1u8; 600], 0, 0, 30);
        feed(&mut rig.reassembler, &desc, &[0]);
        // Short chunk and out-of-range sequence.
        rig.reassembler.handle(Message::Chunk(ChunkMessage { sequence: 0, data: vec![1; 10] }));
        rig.reassembler.handle(Message::Chunk(ChunkMessage { sequence: 5, data: vec![1; 253] }));
        assert_eq!(
            rig.reassembler.stream_state("cam1"),
            StreamState::Receiving { received: 2, total: 3 }
        );
    }

    #[test]
    fn status_lines_pass_through_by_severity() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        rig.reassembler.handle(Message::Status(StatusText::info("gps ok | 1,2,3")));
        rig.reassembler
            .handle(Message::Status(StatusText::new(Severity::Debug, "noise", 50)));
        rig.reassembler.handle(Message::Status(StatusText::info("Photo cam1 ok")));

        let mut texts = Vec::new();
        while let Ok(ReassemblerEvent::Status(s)) = rig.events.try_recv() {
            texts.push(s.text);
        }
        assert_eq!(texts, vec!["gps ok | 1,2,3", "Photo cam1 ok"]);
    }

    #[test]
    fn full_event_queue_still_acks() {
        let mut rig = rig(TransferConfig::default(), Box::new(PassthroughDecoder));
        for i in 0..5u8 {
            let desc = TransferDescriptor::new(format!("cam{}", i), vec![i + 1; 100], 0, 0, 30);
            feed(&mut rig.reassembler, &desc, &[]);
        }
        // Queue depth is 4: the fifth payload is dropped but acknowledged.
        assert_eq!(rig.events.len(), 4);
        assert_eq!(rig.outbound_lines().len(), 5);
    }
}
