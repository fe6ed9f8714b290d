use std::time::Duration;
use tracing::trace;
use crate::sequence::SequenceNumber;
use crate::windowed_buffer::WindowedBuffer;

struct SentPacket {
    acked: bool,
    time_sent: Duration,
}

/// Packet-level bookkeeping for acknowledgements: which of our packets are still waiting for an
///  ack, and which of the peer's packets we received (to reject duplicates and build the acks we
///  piggyback on outgoing packets).
///
/// Packets that fall out of the sent window unacknowledged are simply forgotten. Their messages
///  are retransmitted by the send queue's timer, not through this window.
pub struct AckWindow {
    next_sequence: SequenceNumber,
    sent: WindowedBuffer<SentPacket>,
    received: WindowedBuffer<()>,
}

impl AckWindow {
    pub fn new(sliding_window_size: usize) -> AckWindow {
        AckWindow {
            next_sequence: SequenceNumber::ZERO,
            sent: WindowedBuffer::new(sliding_window_size),
            received: WindowedBuffer::new(sliding_window_size),
        }
    }

    pub fn reset(&mut self) {
        self.next_sequence = SequenceNumber::ZERO;
        self.sent.clear();
        self.received.clear();
    }

    /// allocates the sequence number for an outgoing packet and records it as unacknowledged
    pub fn on_packet_sent(&mut self, now: Duration) -> SequenceNumber {
        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        self.sent.insert(sequence, SentPacket { acked: false, time_sent: now });
        sequence
    }

    /// `ack` and `ack_bits` for the next outgoing packet, built from the received window
    pub fn ack(&self) -> (SequenceNumber, u32) {
        let ack = self.received.high_water_mark() - 1;

        let mut ack_bits = 0u32;
        for k in 0..32u16 {
            if self.received.exists(ack - (k + 1)) {
                ack_bits |= 1 << k;
            }
        }
        (ack, ack_bits)
    }

    /// `false` if `sequence` was received before or is too old for the received window
    pub fn can_receive(&self, sequence: SequenceNumber) -> bool {
        !self.received.is_outdated(sequence) && !self.received.exists(sequence)
    }

    pub fn on_packet_received(&mut self, sequence: SequenceNumber) {
        debug_assert!(self.can_receive(sequence));
        self.received.insert(sequence, ());
    }

    /// Marks all sent packets covered by `ack` / `ack_bits` as acknowledged, calling `on_acked`
    ///  for each packet that was not acknowledged before. Packets that are no longer in the sent
    ///  window are ignored.
    pub fn process_acks(&mut self, ack: SequenceNumber, ack_bits: u32, now: Duration, mut on_acked: impl FnMut(SequenceNumber)) {
        let acked = std::iter::once(ack)
            .chain((0..32u16)
                .filter(|&k| ack_bits & (1 << k) != 0)
                .map(|k| ack - (k + 1))
            );

        for sequence in acked {
            if let Some(sent) = self.sent.get_mut(sequence) {
                if !sent.acked {
                    sent.acked = true;
                    trace!("packet {} acked after {:?}", sequence, now.saturating_sub(sent.time_sent));
                    on_acked(sequence);
                }
            }
        }
    }
}
