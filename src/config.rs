use std::time::Duration;
use anyhow::bail;
use crate::packet::PacketBudget;

/// The largest window / queue size for which wrap-around comparisons of 16 bit sequence numbers
///  stay unambiguous
pub const MAX_WINDOW_SIZE: usize = 32768;

/// Number of distinct 16 bit sequence numbers. Window and queue sizes must divide it, otherwise
///  sequence numbers on both sides of the wrap-around map to the same slot.
const SEQUENCE_SPACE: usize = 1 << 16;

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Upper bound for the size of a bit-packed connection packet in bytes. Messages are only
    ///  added to a packet while the packet is guaranteed to stay within this size.
    pub max_packet_size: usize,

    /// Size of the sent / received packet windows used for acks (in packets). A sent packet that
    ///  is not acked before it moves out of this window is considered lost.
    pub sliding_window_size: usize,

    /// Minimum time between two transmissions of the same unacked message or block fragment.
    pub message_resend_rate: Duration,

    /// This is the maximum number of messages (not bytes) that can be queued for sending and
    ///  not yet acknowledged.
    pub message_send_queue_size: usize,

    /// This is the maximum number of messages the receiver buffers ahead of the next message to
    ///  be handed to the application.
    pub message_receive_queue_size: usize,

    /// Size of the window (in packets) that remembers which messages went into which sent packet.
    pub message_sent_packets_size: usize,

    pub max_messages_per_packet: usize,

    /// Messages up to this size (in bytes) are sent inline. Bigger messages are sent as blocks,
    ///  i.e. split into fragments that are acknowledged individually.
    pub max_message_size: usize,

    pub max_block_size: usize,

    /// Size of the fragments blocks are split into. The last fragment of a block may be shorter.
    pub block_fragment_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            max_packet_size: 4 * 1024,
            sliding_window_size: 256,
            message_resend_rate: Duration::from_millis(100),
            message_send_queue_size: 1024,
            message_receive_queue_size: 1024,
            message_sent_packets_size: 256,
            max_messages_per_packet: 64,
            max_message_size: 1024,
            max_block_size: 256 * 1024,
            block_fragment_size: 1024,
        }
    }
}

impl ConnectionConfig {
    pub const MAX_FRAGMENTS_PER_BLOCK: usize = 65536;

    pub fn max_fragments_per_block(&self) -> usize {
        self.max_block_size.div_ceil(self.block_fragment_size)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, size) in [
            ("sliding window size", self.sliding_window_size),
            ("message send queue size", self.message_send_queue_size),
            ("message receive queue size", self.message_receive_queue_size),
            ("message sent packets size", self.message_sent_packets_size),
        ] {
            if size == 0 || size > MAX_WINDOW_SIZE {
                bail!("{} must be in the range 1..={}, is {}", name, MAX_WINDOW_SIZE, size);
            }
            if SEQUENCE_SPACE % size != 0 {
                bail!("{} must divide {}, is {}", name, SEQUENCE_SPACE, size);
            }
        }

        if self.max_messages_per_packet == 0 || self.max_messages_per_packet > u16::MAX as usize {
            bail!("max messages per packet must be in the range 1..={}", u16::MAX);
        }
        if self.block_fragment_size == 0 {
            bail!("block fragment size must not be 0");
        }
        if self.max_block_size > u32::MAX as usize {
            bail!("max block size {} does not fit into 32 bits", self.max_block_size);
        }
        if self.max_block_size < self.max_message_size {
            bail!("max block size {} is smaller than max message size {}", self.max_block_size, self.max_message_size);
        }
        if self.max_fragments_per_block() > Self::MAX_FRAGMENTS_PER_BLOCK {
            bail!("a block may have up to {} fragments, the configuration allows {}", Self::MAX_FRAGMENTS_PER_BLOCK, self.max_fragments_per_block());
        }

        let budget = PacketBudget::new(self);
        if budget.available_message_bits() < budget.message_bits(self.max_message_size) {
            bail!("a message of max message size {} does not fit into a packet of max packet size {}", self.max_message_size, self.max_packet_size);
        }
        if budget.available_fragment_bits() < budget.fragment_bits(self.block_fragment_size) {
            bail!("a fragment of size {} does not fit into a packet of max packet size {}", self.block_fragment_size, self.max_packet_size);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_valid() {
        ConnectionConfig::default().validate().unwrap();
    }

    #[rstest]
    #[case::zero_sliding_window(ConnectionConfig { sliding_window_size: 0, ..Default::default() })]
    #[case::huge_send_queue(ConnectionConfig { message_send_queue_size: 40000, ..Default::default() })]
    #[case::zero_receive_queue(ConnectionConfig { message_receive_queue_size: 0, ..Default::default() })]
    #[case::zero_sent_packets(ConnectionConfig { message_sent_packets_size: 0, ..Default::default() })]
    #[case::sliding_window_not_power_of_two(ConnectionConfig { sliding_window_size: 100, ..Default::default() })]
    #[case::send_queue_not_power_of_two(ConnectionConfig { message_send_queue_size: 1000, ..Default::default() })]
    #[case::receive_queue_not_power_of_two(ConnectionConfig { message_receive_queue_size: 1000, ..Default::default() })]
    #[case::sent_packets_not_power_of_two(ConnectionConfig { message_sent_packets_size: 3, ..Default::default() })]
    #[case::no_messages_per_packet(ConnectionConfig { max_messages_per_packet: 0, ..Default::default() })]
    #[case::zero_fragment_size(ConnectionConfig { block_fragment_size: 0, ..Default::default() })]
    #[case::block_smaller_than_message(ConnectionConfig { max_block_size: 512, ..Default::default() })]
    #[case::too_many_fragments(ConnectionConfig { max_block_size: 1 << 20, block_fragment_size: 8, max_message_size: 8, ..Default::default() })]
    #[case::message_does_not_fit(ConnectionConfig { max_packet_size: 1024, ..Default::default() })]
    #[case::fragment_does_not_fit(ConnectionConfig { max_packet_size: 1024, max_message_size: 100, ..Default::default() })]
    fn test_invalid(#[case] config: ConnectionConfig) {
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_small_packets_are_valid() {
        let config = ConnectionConfig {
            max_packet_size: 256,
            max_message_size: 64,
            block_fragment_size: 128,
            max_block_size: 4096,
            ..Default::default()
        };
        config.validate().unwrap();
        assert_eq!(config.max_fragments_per_block(), 32);
    }
}
