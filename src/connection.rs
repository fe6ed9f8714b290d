use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::{debug, trace, warn};
use crate::ack_listener::{NoOpAckListener, PacketAckListener};
use crate::ack_window::AckWindow;
use crate::block::BlockStatus;
use crate::config::ConnectionConfig;
use crate::packet::ConnectionPacket;
use crate::receive_stream::{ReceiveStream, ReceivedMessage};
use crate::send_stream::SendStream;
use crate::sequence::SequenceNumber;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum ConnectionCounter {
    /// packets passed to `read_packet` while the connection was usable
    PacketsRead = 0,
    PacketsWritten = 1,
    /// own packets acknowledged by the peer
    PacketsAcked = 2,
    /// duplicate, outdated or overflowing packets that were dropped without processing
    PacketsDiscarded = 3,
}

impl ConnectionCounter {
    pub const NUM_COUNTERS: usize = 4;

    fn index(self) -> usize {
        u8::from(self) as usize
    }
}

/// Coarse fault state of a connection. Anything other than `None` means that the connection
///  stopped processing packets and must be `reset()` before it can be used again.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum ConnectionError {
    None = 0,
    /// packet data that could not be deserialized, or a packet exceeding the configured limits
    MalformedPacket = 1,
    /// a block fragment that is inconsistent with the block currently being received
    BlockMismatch = 2,
}

/// A reliable, ordered message channel on top of an unreliable packet transport.
///
/// The connection does no I/O itself. The application calls `write_packet` to get the next
///  packet for the peer, passes packets from the peer to `read_packet`, and drives the
///  connection's clock through `advance_time`. Messages passed to `send_message` are delivered
///  by the peer's `receive_message` exactly once and in order, as long as packets keep flowing
///  in both directions.
pub struct Connection {
    config: Arc<ConnectionConfig>,
    ack_listener: Arc<dyn PacketAckListener>,

    time: Duration,
    error: ConnectionError,
    counters: [u64; ConnectionCounter::NUM_COUNTERS],

    ack_window: AckWindow,
    send_stream: SendStream,
    receive_stream: ReceiveStream,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> anyhow::Result<Connection> {
        Self::with_ack_listener(config, Arc::new(NoOpAckListener))
    }

    pub fn with_ack_listener(config: ConnectionConfig, ack_listener: Arc<dyn PacketAckListener>) -> anyhow::Result<Connection> {
        config.validate()?;
        let config = Arc::new(config);

        Ok(Connection {
            ack_listener,
            time: Duration::ZERO,
            error: ConnectionError::None,
            counters: [0; ConnectionCounter::NUM_COUNTERS],
            ack_window: AckWindow::new(config.sliding_window_size),
            send_stream: SendStream::new(config.clone()),
            receive_stream: ReceiveStream::new(config.clone()),
            config,
        })
    }

    /// Discards all queued messages, block state, packet history and counters, and clears the
    ///  error state. The connection's clock keeps running.
    pub fn reset(&mut self) {
        debug!("resetting connection");
        self.error = ConnectionError::None;
        self.counters = [0; ConnectionCounter::NUM_COUNTERS];
        self.ack_window.reset();
        self.send_stream.reset();
        self.receive_stream.reset();
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn time(&self) -> Duration {
        self.time
    }

    pub fn advance_time(&mut self, dt: Duration) {
        self.time += dt;
    }

    pub fn error(&self) -> ConnectionError {
        self.error
    }

    pub fn counter(&self, counter: ConnectionCounter) -> u64 {
        self.counters[counter.index()]
    }

    fn increment(&mut self, counter: ConnectionCounter) {
        self.counters[counter.index()] += 1;
    }

    /// puts the connection into error state, releasing the buffers of blocks in transit
    fn set_error(&mut self, error: ConnectionError) {
        warn!("connection error: {:?}", error);
        self.error = error;
        self.send_stream.abort_block();
        self.receive_stream.abort_block();
    }

    fn is_usable(&self) -> bool {
        self.error == ConnectionError::None
    }

    pub fn send_block_status(&self) -> Option<BlockStatus> {
        self.send_stream.send_block_status()
    }

    pub fn receive_block_status(&self) -> Option<BlockStatus> {
        self.receive_stream.receive_block_status()
    }

    /// true iff `send_message` would accept a message of the given length right now
    pub fn can_send_message(&self, message_len: usize) -> bool {
        self.is_usable() && self.send_stream.can_send_message(message_len)
    }

    /// Queues a message for reliable delivery, returning its message id. Messages bigger than
    ///  `max_message_size` are sent as blocks, and only one block can be in flight at a time.
    ///
    /// This fails without changing the connection's state if the send queue is full, or if the
    ///  message can not be sent as a block (yet).
    pub fn send_message(&mut self, payload: Bytes) -> anyhow::Result<SequenceNumber> {
        if !self.is_usable() {
            bail!("connection is in error state {:?}", self.error);
        }
        self.send_stream.send_message(payload)
    }

    /// the next message in the order the peer sent them, if it was received already
    pub fn receive_message(&mut self) -> Option<ReceivedMessage> {
        if !self.is_usable() {
            return None;
        }
        self.receive_stream.receive_message()
    }

    /// Assembles the next packet for the peer: the acks for the peer's packets plus the messages
    ///  (or block fragment) that are due for (re)transmission. Returns `None` while the
    ///  connection is in error state.
    pub fn write_packet(&mut self) -> Option<ConnectionPacket> {
        if !self.is_usable() {
            return None;
        }

        let (ack, ack_bits) = self.ack_window.ack();
        let sequence = self.ack_window.on_packet_sent(self.time);

        let mut packet = ConnectionPacket::new(sequence, ack, ack_bits);
        self.send_stream.write_payload(&mut packet, self.time);
        self.increment(ConnectionCounter::PacketsWritten);

        trace!("writing packet {} (ack {}, ack bits {:032b}) with {} messages{}", sequence, ack, ack_bits, packet.messages.len(),
            packet.fragment.as_ref().map(|f| format!(", fragment {} of block {}", f.fragment_id, f.block_id)).unwrap_or_default());
        Some(packet)
    }

    /// Processes a packet from the peer. Returns `true` if the packet was accepted, and `false`
    ///  if it was discarded (duplicate, outdated, too far ahead for the receive queue) or caused
    ///  a protocol error.
    pub fn read_packet(&mut self, packet: &ConnectionPacket) -> bool {
        if !self.is_usable() {
            return false;
        }
        self.increment(ConnectionCounter::PacketsRead);

        if let Err(e) = packet.validate(&self.config) {
            warn!("invalid packet {}: {}", packet.sequence, e);
            self.set_error(ConnectionError::MalformedPacket);
            return false;
        }

        if !self.ack_window.can_receive(packet.sequence) {
            debug!("discarding duplicate or outdated packet {}", packet.sequence);
            self.increment(ConnectionCounter::PacketsDiscarded);
            return false;
        }
        if !self.receive_stream.has_room_for(packet) {
            self.increment(ConnectionCounter::PacketsDiscarded);
            return false;
        }

        trace!("reading packet {} (ack {}, ack bits {:032b})", packet.sequence, packet.ack, packet.ack_bits);
        self.ack_window.on_packet_received(packet.sequence);

        let send_stream = &mut self.send_stream;
        let counters = &mut self.counters;
        let ack_listener = &self.ack_listener;
        self.ack_window.process_acks(packet.ack, packet.ack_bits, self.time, |sequence| {
            counters[ConnectionCounter::PacketsAcked.index()] += 1;
            send_stream.packet_acked(sequence);
            ack_listener.on_packet_acked(sequence);
        });

        if let Err(error) = self.receive_stream.on_packet(packet) {
            self.set_error(error);
            return false;
        }
        true
    }

    /// `write_packet`, serialized
    pub fn write_packet_data(&mut self) -> Option<Bytes> {
        self.write_packet()
            .map(|packet| packet.to_bytes(&self.config))
    }

    /// `read_packet` for serialized packet data. Data that can not be deserialized puts the
    ///  connection into error state.
    pub fn read_packet_data(&mut self, buf: &[u8]) -> bool {
        if !self.is_usable() {
            return false;
        }

        match ConnectionPacket::from_bytes(buf, &self.config) {
            Ok(packet) => self.read_packet(&packet),
            Err(e) => {
                warn!("malformed packet data: {}", e);
                self.increment(ConnectionCounter::PacketsRead);
                self.set_error(ConnectionError::MalformedPacket);
                false
            }
        }
    }
}
