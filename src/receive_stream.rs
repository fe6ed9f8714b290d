use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use crate::block::{BlockStatus, ReceiveBlock};
use crate::config::ConnectionConfig;
use crate::connection::ConnectionError;
use crate::packet::{BlockFragment, ConnectionPacket};
use crate::safe_converter::SafeCast;
use crate::sequence::SequenceNumber;
use crate::windowed_buffer::WindowedBuffer;

/// A message handed to the application, in the order the peer sent it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: SequenceNumber,
    pub payload: Bytes,
}

/// The receiving half of a connection's message layer.
///
/// Messages can arrive in any order and any number of times. They are buffered until all
///  messages with lower ids were handed to the application, and then delivered exactly once.
pub struct ReceiveStream {
    config: Arc<ConnectionConfig>,

    /// the id of the next message to be delivered to the application
    receive_message_id: SequenceNumber,
    receive_queue: WindowedBuffer<Bytes>,
    receive_block: Option<ReceiveBlock>,
}

impl ReceiveStream {
    pub fn new(config: Arc<ConnectionConfig>) -> ReceiveStream {
        ReceiveStream {
            receive_message_id: SequenceNumber::ZERO,
            receive_queue: WindowedBuffer::new(config.message_receive_queue_size),
            receive_block: None,
            config,
        }
    }

    pub fn reset(&mut self) {
        self.receive_message_id = SequenceNumber::ZERO;
        self.receive_queue.clear();
        self.receive_block = None;
    }

    pub fn receive_message_id(&self) -> SequenceNumber {
        self.receive_message_id
    }

    pub fn receive_block_status(&self) -> Option<BlockStatus> {
        self.receive_block.as_ref().map(|b| b.status())
    }

    /// drops a partially received block, releasing its reassembly buffer
    pub fn abort_block(&mut self) {
        if let Some(block) = self.receive_block.take() {
            debug!("aborting reception of block {}", block.block_id());
        }
    }

    /// messages before the next one to deliver were delivered already
    fn is_stale(&self, message_id: SequenceNumber) -> bool {
        message_id.is_older_than(self.receive_message_id)
    }

    fn is_beyond_queue(&self, message_id: SequenceNumber) -> bool {
        let offset: usize = message_id.distance_from(self.receive_message_id).safe_cast();
        !self.is_stale(message_id) && offset >= self.config.message_receive_queue_size
    }

    /// Checks that all messages in a packet fit into the receive queue. A packet that does not
    ///  must be dropped without acknowledging it, so the peer resends it once the application
    ///  caught up.
    pub fn has_room_for(&self, packet: &ConnectionPacket) -> bool {
        let overflow = packet.messages.iter()
            .map(|m| m.id)
            .chain(packet.fragment.as_ref().map(|f| f.block_id))
            .find(|&id| self.is_beyond_queue(id));

        match overflow {
            Some(message_id) => {
                warn!("message {} is too far ahead of the next expected message {} for the receive queue - dropping packet {}", message_id, self.receive_message_id, packet.sequence);
                false
            }
            None => true,
        }
    }

    /// Adds a packet's messages and block fragment to the receive queue. Fails if the fragment
    ///  conflicts with the block that is currently being received.
    pub fn on_packet(&mut self, packet: &ConnectionPacket) -> Result<(), ConnectionError> {
        debug_assert!(self.has_room_for(packet));

        for message in &packet.messages {
            self.on_message(message.id, message.payload.clone());
        }

        if let Some(fragment) = &packet.fragment {
            self.on_fragment(fragment)?;
        }
        Ok(())
    }

    fn on_message(&mut self, message_id: SequenceNumber, payload: Bytes) {
        if self.is_stale(message_id) || self.receive_queue.exists(message_id) {
            trace!("ignoring duplicate message {}", message_id);
            return;
        }
        trace!("received message {} with {} bytes", message_id, payload.len());
        self.receive_queue.insert(message_id, payload);
    }

    fn on_fragment(&mut self, fragment: &BlockFragment) -> Result<(), ConnectionError> {
        let block_id = fragment.block_id;
        if self.is_stale(block_id) || self.receive_queue.exists(block_id) {
            trace!("ignoring fragment {} of delivered block {}", fragment.fragment_id, block_id);
            return Ok(());
        }

        let block = match &mut self.receive_block {
            Some(block) if block.block_id() == block_id => {
                if block.block_size() != fragment.block_size {
                    warn!("fragment {} of block {} has block size {}, expected {}", fragment.fragment_id, block_id, fragment.block_size, block.block_size());
                    self.receive_block = None;
                    return Err(ConnectionError::BlockMismatch);
                }
                block
            }
            Some(block) if block_id.is_older_than(block.block_id()) => {
                debug!("ignoring fragment {} of outdated block {} while receiving block {}", fragment.fragment_id, block_id, block.block_id());
                return Ok(());
            }
            Some(block) => {
                warn!("received fragment for block {} while block {} is incomplete", block_id, block.block_id());
                self.receive_block = None;
                return Err(ConnectionError::BlockMismatch);
            }
            None => {
                debug!("start receiving block {} with {} bytes", block_id, fragment.block_size);
                self.receive_block.insert(ReceiveBlock::new(block_id, fragment.block_size, self.config.block_fragment_size))
            }
        };

        if !block.insert_fragment(fragment.fragment_id, &fragment.data) {
            trace!("ignoring duplicate fragment {} of block {}", fragment.fragment_id, block_id);
            return Ok(());
        }
        trace!("received fragment {} of block {}", fragment.fragment_id, block_id);

        if block.is_complete() {
            if let Some(block) = self.receive_block.take() {
                debug!("block {} is complete", block_id);
                self.receive_queue.insert(block_id, block.into_message());
            }
        }
        Ok(())
    }

    /// the next message in send order, if it was received
    pub fn receive_message(&mut self) -> Option<ReceivedMessage> {
        let id = self.receive_message_id;
        let payload = self.receive_queue.remove(id)?;
        self.receive_message_id = id.next();
        Some(ReceivedMessage { id, payload })
    }
}
