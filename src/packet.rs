use std::cmp::max;
use anyhow::bail;
use bytes::Bytes;
use crate::bit_stream::{bits_required, BitReader, BitWriter};
use crate::block::{fragment_len, num_fragments};
use crate::config::ConnectionConfig;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::sequence::SequenceNumber;

/// A message carried inline in a connection packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketMessage {
    pub id: SequenceNumber,
    pub payload: Bytes,
}

/// One fragment of a block message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockFragment {
    /// the message id of the block message
    pub block_id: SequenceNumber,
    pub block_size: u32,
    pub fragment_id: u16,
    pub data: Bytes,
}

/// The unit of exchange between two connections: an ack header plus the messages (or block
///  fragment) selected for this packet.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ConnectionPacket {
    pub sequence: SequenceNumber,
    /// the newest sequence number received from the peer
    pub ack: SequenceNumber,
    /// bit `k` set means that `ack - k - 1` was received
    pub ack_bits: u32,

    pub messages: Vec<PacketMessage>,
    pub fragment: Option<BlockFragment>,
}

impl ConnectionPacket {
    pub const PERFECT_ACK_BITS: u32 = 0xFFFF_FFFF;
    pub const MAX_ACK_DELTA: u32 = 64;

    /// worst case size of the header including alignment: perfect flag, ack bits, sequence,
    ///  in-range flag, full ack
    pub const MAX_HEADER_BITS: usize = 72;

    pub fn new(sequence: SequenceNumber, ack: SequenceNumber, ack_bits: u32) -> ConnectionPacket {
        ConnectionPacket {
            sequence,
            ack,
            ack_bits,
            messages: Vec::new(),
            fragment: None,
        }
    }

    /// the number of increments from `ack` to `sequence`, in the range 1..=65536
    fn ack_delta(&self) -> u32 {
        match self.sequence.distance_from(self.ack) {
            0 => 65536,
            d => d.safe_cast(),
        }
    }

    pub fn ser_header(&self, writer: &mut BitWriter) {
        let perfect = self.ack_bits == Self::PERFECT_ACK_BITS;
        writer.write_bool(perfect);
        if !perfect {
            writer.write_bits(self.ack_bits, 32);
        }

        writer.write_bits(self.sequence.to_raw().safe_cast(), 16);

        let ack_delta = self.ack_delta();
        let ack_in_range = ack_delta <= Self::MAX_ACK_DELTA;
        writer.write_bool(ack_in_range);
        if ack_in_range {
            writer.write_int(ack_delta, 1, Self::MAX_ACK_DELTA);
        }
        else {
            writer.write_bits(self.ack.to_raw().safe_cast(), 16);
        }

        writer.write_align();
    }

    pub fn deser_header(reader: &mut BitReader) -> anyhow::Result<ConnectionPacket> {
        let perfect = reader.read_bool()?;
        let ack_bits = if perfect {
            Self::PERFECT_ACK_BITS
        }
        else {
            reader.read_bits(32)?
        };

        let sequence = SequenceNumber::from_raw(reader.read_bits(16)?.prechecked_cast());

        let ack_in_range = reader.read_bool()?;
        let ack = if ack_in_range {
            let ack_delta: u16 = reader.read_int(1, Self::MAX_ACK_DELTA)?.prechecked_cast();
            sequence - ack_delta
        }
        else {
            SequenceNumber::from_raw(reader.read_bits(16)?.prechecked_cast())
        };

        reader.read_align()?;

        Ok(ConnectionPacket::new(sequence, ack, ack_bits))
    }

    pub fn ser(&self, writer: &mut BitWriter, config: &ConnectionConfig) {
        self.ser_header(writer);

        writer.write_bool(!self.messages.is_empty());
        if !self.messages.is_empty() {
            debug_assert!(self.messages.len() <= config.max_messages_per_packet);
            writer.write_int(self.messages.len().prechecked_cast(), 1, config.max_messages_per_packet.prechecked_cast());

            for message in &self.messages {
                debug_assert!(message.payload.len() <= config.max_message_size);
                writer.write_bits(message.id.to_raw().safe_cast(), 16);
                writer.write_int(message.payload.len().prechecked_cast(), 0, config.max_message_size.prechecked_cast());
                writer.write_align();
                writer.write_bytes(&message.payload);
            }
        }

        writer.write_bool(self.fragment.is_some());
        if let Some(fragment) = &self.fragment {
            debug_assert_eq!(fragment.data.len(), fragment_len(fragment.block_size, fragment.fragment_id, config.block_fragment_size));
            writer.write_bits(fragment.block_id.to_raw().safe_cast(), 16);
            writer.write_int(fragment.block_size, 1, max_block_size_bound(config));
            writer.write_int(fragment.fragment_id.safe_cast(), 0, max_fragment_id_bound(config));
            writer.write_align();
            writer.write_bytes(&fragment.data);
        }
    }

    pub fn deser(reader: &mut BitReader, config: &ConnectionConfig) -> anyhow::Result<ConnectionPacket> {
        let mut packet = Self::deser_header(reader)?;

        if reader.read_bool()? {
            let num_messages = reader.read_int(1, config.max_messages_per_packet.prechecked_cast())?;
            for _ in 0..num_messages {
                let id = SequenceNumber::from_raw(reader.read_bits(16)?.prechecked_cast());
                let len = reader.read_int(0, config.max_message_size.prechecked_cast())?;
                reader.read_align()?;
                let payload = Bytes::copy_from_slice(reader.read_bytes(len.safe_cast())?);
                packet.messages.push(PacketMessage { id, payload });
            }
        }

        if reader.read_bool()? {
            let block_id = SequenceNumber::from_raw(reader.read_bits(16)?.prechecked_cast());
            let block_size = reader.read_int(1, max_block_size_bound(config))?;
            let fragment_id: u16 = reader.read_int(0, max_fragment_id_bound(config))?.prechecked_cast();

            let fragment_index: usize = fragment_id.safe_cast();
            if fragment_index >= num_fragments(block_size, config.block_fragment_size) {
                bail!("fragment id {} is out of range for block {} of size {}", fragment_id, block_id, block_size);
            }

            reader.read_align()?;
            let len = fragment_len(block_size, fragment_id, config.block_fragment_size);
            let data = Bytes::copy_from_slice(reader.read_bytes(len)?);
            packet.fragment = Some(BlockFragment { block_id, block_size, fragment_id, data });
        }

        Ok(packet)
    }

    /// Checks that the payload stays within the configured limits, i.e. that it could have been
    ///  produced by `deser`
    pub fn validate(&self, config: &ConnectionConfig) -> anyhow::Result<()> {
        if self.messages.len() > config.max_messages_per_packet {
            bail!("{} messages exceed the max of {} messages per packet", self.messages.len(), config.max_messages_per_packet);
        }
        if let Some(message) = self.messages.iter().find(|m| m.payload.len() > config.max_message_size) {
            bail!("message {} with {} bytes exceeds the max message size {}", message.id, message.payload.len(), config.max_message_size);
        }

        if let Some(fragment) = &self.fragment {
            let block_size: usize = fragment.block_size.safe_cast();
            if block_size == 0 || block_size > config.max_block_size {
                bail!("block {} has invalid size {}", fragment.block_id, fragment.block_size);
            }
            let fragment_index: usize = fragment.fragment_id.safe_cast();
            if fragment_index >= num_fragments(fragment.block_size, config.block_fragment_size) {
                bail!("fragment id {} is out of range for block {} of size {}", fragment.fragment_id, fragment.block_id, fragment.block_size);
            }
            if fragment.data.len() != fragment_len(fragment.block_size, fragment.fragment_id, config.block_fragment_size) {
                bail!("fragment {} of block {} has the wrong length {}", fragment.fragment_id, fragment.block_id, fragment.data.len());
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self, config: &ConnectionConfig) -> Bytes {
        let mut writer = BitWriter::with_capacity(config.max_packet_size);
        self.ser(&mut writer, config);
        writer.finish()
    }

    pub fn from_bytes(buf: &[u8], config: &ConnectionConfig) -> anyhow::Result<ConnectionPacket> {
        let mut reader = BitReader::new(buf);
        let packet = Self::deser(&mut reader, config)?;

        // the final partial byte is zero-padded by the writer
        if reader.bits_remaining() >= 8 {
            bail!("{} trailing bytes after the end of the packet", reader.bits_remaining() / 8);
        }
        if reader.read_bits(reader.bits_remaining().prechecked_cast())? != 0 {
            bail!("non-zero padding at the end of the packet");
        }
        Ok(packet)
    }
}

fn max_block_size_bound(config: &ConnectionConfig) -> u32 {
    max(config.max_block_size, 1).prechecked_cast()
}

fn max_fragment_id_bound(config: &ConnectionConfig) -> u32 {
    (max(config.max_fragments_per_block(), 1) - 1).prechecked_cast()
}

/// Worst case bit counts for the parts of a connection packet, used to decide which messages fit
///  into a packet before actually serializing it.
pub struct PacketBudget {
    max_packet_bits: usize,
    num_messages_bits: usize,
    message_header_bits: usize,
    fragment_header_bits: usize,
}

impl PacketBudget {
    /// the 'has messages' and 'has fragment' flags
    const PAYLOAD_FLAG_BITS: usize = 2;
    const MAX_ALIGN_BITS: usize = 7;

    pub fn new(config: &ConnectionConfig) -> PacketBudget {
        let message_len_bits: usize = bits_required(0, config.max_message_size.prechecked_cast()).safe_cast();
        let block_size_bits: usize = bits_required(1, max_block_size_bound(config)).safe_cast();
        let fragment_id_bits: usize = bits_required(0, max_fragment_id_bound(config)).safe_cast();

        PacketBudget {
            max_packet_bits: config.max_packet_size * 8,
            num_messages_bits: bits_required(1, config.max_messages_per_packet.prechecked_cast()).safe_cast(),
            message_header_bits: 16 + message_len_bits + Self::MAX_ALIGN_BITS,
            fragment_header_bits: 16 + block_size_bits + fragment_id_bits + Self::MAX_ALIGN_BITS,
        }
    }

    /// bits available for messages (with their per-message headers) in a packet without fragment
    pub fn available_message_bits(&self) -> usize {
        self.max_packet_bits
            .saturating_sub(ConnectionPacket::MAX_HEADER_BITS + Self::PAYLOAD_FLAG_BITS + self.num_messages_bits)
    }

    /// bits available for a fragment (with its header) in a packet without messages
    pub fn available_fragment_bits(&self) -> usize {
        self.max_packet_bits
            .saturating_sub(ConnectionPacket::MAX_HEADER_BITS + Self::PAYLOAD_FLAG_BITS)
    }

    /// worst case number of bits a message of the given length takes in a packet
    pub fn message_bits(&self, message_len: usize) -> usize {
        self.message_header_bits + message_len * 8
    }

    pub fn fragment_bits(&self, fragment_len: usize) -> usize {
        self.fragment_header_bits + fragment_len * 8
    }
}
