use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;
use anyhow::bail;
use bytes::Bytes;
use tracing::{debug, trace};
use crate::block::{BlockStatus, SendBlock};
use crate::config::ConnectionConfig;
use crate::packet::{ConnectionPacket, PacketBudget, PacketMessage};
use crate::sequence::SequenceNumber;
use crate::windowed_buffer::WindowedBuffer;

struct SendQueueEntry {
    payload: Bytes,
    /// `None` if the message was never sent
    time_last_sent: Option<Duration>,
    /// block messages are sent as fragments by the send block rather than inline
    is_block: bool,
}

/// The messages (and block fragment) that went into a given packet, so that the packet's ack
///  can be propagated to them
struct SentPacketRecord {
    message_ids: Vec<SequenceNumber>,
    fragment: Option<(SequenceNumber, u16)>,
}

/// The sending half of a connection's message layer.
///
/// Messages get sequential ids and stay in the send queue until a packet carrying them is
///  acknowledged, being retransmitted every `message_resend_rate` in the meantime. A block message
///  stays in the send queue until all its fragments are acknowledged.
pub struct SendStream {
    config: Arc<ConnectionConfig>,
    budget: PacketBudget,

    /// the id for the next message passed to `send_message`
    send_message_id: SequenceNumber,
    /// All messages before this id are acknowledged. This is equal to `send_message_id` if there
    ///  are no unacknowledged messages.
    oldest_unacked_message_id: SequenceNumber,

    send_queue: WindowedBuffer<SendQueueEntry>,
    sent_packets: WindowedBuffer<SentPacketRecord>,
    send_block: Option<SendBlock>,
}

impl SendStream {
    pub fn new(config: Arc<ConnectionConfig>) -> SendStream {
        SendStream {
            budget: PacketBudget::new(&config),
            send_message_id: SequenceNumber::ZERO,
            oldest_unacked_message_id: SequenceNumber::ZERO,
            send_queue: WindowedBuffer::new(config.message_send_queue_size),
            sent_packets: WindowedBuffer::new(config.message_sent_packets_size),
            send_block: None,
            config,
        }
    }

    pub fn reset(&mut self) {
        self.send_message_id = SequenceNumber::ZERO;
        self.oldest_unacked_message_id = SequenceNumber::ZERO;
        self.send_queue.clear();
        self.sent_packets.clear();
        self.send_block = None;
    }

    /// Stops sending the current block. Its message stays in the send queue, but no more fragments
    ///  are written for it.
    pub fn abort_block(&mut self) {
        if let Some(block) = self.send_block.take() {
            debug!("aborting transmission of block {}", block.block_id());
        }
    }

    pub fn oldest_unacked_message_id(&self) -> SequenceNumber {
        self.oldest_unacked_message_id
    }

    pub fn send_block_status(&self) -> Option<BlockStatus> {
        self.send_block.as_ref().map(|b| b.status())
    }

    fn is_block(&self, message_len: usize) -> bool {
        message_len > self.config.max_message_size
    }

    pub fn can_send_message(&self, message_len: usize) -> bool {
        if !self.send_queue.available(self.send_message_id) {
            return false;
        }
        if self.is_block(message_len) {
            return message_len <= self.config.max_block_size && self.send_block.is_none();
        }
        true
    }

    pub fn send_message(&mut self, payload: Bytes) -> anyhow::Result<SequenceNumber> {
        let message_id = self.send_message_id;

        if !self.send_queue.available(message_id) {
            debug!("send queue is full, rejecting message {}", message_id);
            bail!("send queue is full");
        }

        let is_block = self.is_block(payload.len());
        if is_block {
            if payload.len() > self.config.max_block_size {
                bail!("message of {} bytes exceeds the max block size {}", payload.len(), self.config.max_block_size);
            }
            if let Some(block) = &self.send_block {
                debug!("block {} is still being sent, rejecting block message {}", block.block_id(), message_id);
                bail!("only one block message can be in flight at a time");
            }
            self.send_block = Some(SendBlock::new(message_id, payload.clone(), self.config.block_fragment_size));
        }

        trace!("queueing message {} with {} bytes{}", message_id, payload.len(), if is_block { " as a block" } else { "" });
        self.send_queue.insert(message_id, SendQueueEntry {
            payload,
            time_last_sent: None,
            is_block,
        });
        self.send_message_id = message_id.next();
        Ok(message_id)
    }

    /// Adds the messages (or the block fragment) that are due for (re)transmission to a packet,
    ///  and remembers them for the packet's sequence number.
    pub fn write_payload(&mut self, packet: &mut ConnectionPacket, now: Duration) {
        let head_is_block = self.send_queue.get(self.oldest_unacked_message_id)
            .map(|entry| entry.is_block)
            .unwrap_or(false);

        let mut record = SentPacketRecord {
            message_ids: Vec::new(),
            fragment: None,
        };

        if head_is_block {
            if let Some(block) = &mut self.send_block {
                debug_assert_eq!(block.block_id(), self.oldest_unacked_message_id);
                if let Some(fragment) = block.next_fragment(now, self.config.message_resend_rate) {
                    trace!("sending fragment {} of block {}", fragment.fragment_id, fragment.block_id);
                    record.fragment = Some((fragment.block_id, fragment.fragment_id));
                    packet.fragment = Some(fragment);
                }
            }
        }
        else {
            self.select_messages(packet, now);
            record.message_ids = packet.messages.iter()
                .map(|m| m.id)
                .collect();
        }

        self.sent_packets.insert(packet.sequence, record);
    }

    fn select_messages(&mut self, packet: &mut ConnectionPacket, now: Duration) {
        let mut available_bits = self.budget.available_message_bits();

        // messages further ahead might not fit into the peer's receive queue
        let message_limit = min(self.config.message_send_queue_size, self.config.message_receive_queue_size);

        for message_id in self.oldest_unacked_message_id.to(self.send_message_id).take(message_limit) {
            if packet.messages.len() == self.config.max_messages_per_packet {
                break;
            }

            let Some(entry) = self.send_queue.get_mut(message_id) else {
                continue;
            };
            if entry.is_block {
                // blocks are sent after all messages before them are acknowledged
                break;
            }
            if let Some(time_last_sent) = entry.time_last_sent {
                if now.saturating_sub(time_last_sent) < self.config.message_resend_rate {
                    continue;
                }
            }

            let message_bits = self.budget.message_bits(entry.payload.len());
            if message_bits > available_bits {
                continue;
            }
            available_bits -= message_bits;

            entry.time_last_sent = Some(now);
            packet.messages.push(PacketMessage {
                id: message_id,
                payload: entry.payload.clone(),
            });
        }

        if !packet.messages.is_empty() {
            trace!("packet {}: {} messages", packet.sequence, packet.messages.len());
        }
    }

    /// Propagates a packet's acknowledgement to the messages and block fragment it carried.
    pub fn packet_acked(&mut self, sequence: SequenceNumber) {
        let Some(record) = self.sent_packets.remove(sequence) else {
            return;
        };

        for message_id in record.message_ids {
            if self.send_queue.remove(message_id).is_some() {
                trace!("message {} acked", message_id);
            }
        }

        if let Some((block_id, fragment_id)) = record.fragment {
            self.fragment_acked(block_id, fragment_id);
        }

        self.update_oldest_unacked_message_id();
    }

    fn fragment_acked(&mut self, block_id: SequenceNumber, fragment_id: u16) {
        let Some(block) = &mut self.send_block else {
            return;
        };
        if block.block_id() != block_id || !block.ack_fragment(fragment_id) {
            return;
        }

        trace!("fragment {} of block {} acked", fragment_id, block_id);
        if block.is_complete() {
            debug!("block {} is fully acknowledged", block_id);
            self.send_queue.remove(block_id);
            self.send_block = None;
        }
    }

    fn update_oldest_unacked_message_id(&mut self) {
        while self.oldest_unacked_message_id != self.send_message_id && !self.send_queue.exists(self.oldest_unacked_message_id) {
            self.oldest_unacked_message_id = self.oldest_unacked_message_id.next();
        }
    }
}
