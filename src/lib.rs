//! A reliable, ordered message channel on top of an unreliable packet transport (e.g. UDP).
//!
//! The channel is driven entirely by its owner: it does no I/O, starts no threads and reads no
//!  clocks. The owner writes packets through [connection::Connection::write_packet], hands
//!  received packets to [connection::Connection::read_packet], and advances the connection's
//!  clock. This makes the protocol deterministic and easy to test.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *messages*, i.e. chunks of data of defined length
//! * All messages are delivered, exactly once and in the order they were sent, as long as packets
//!    keep flowing in both directions
//!   * messages arriving out of order are buffered until the gap before them is filled
//! * Acknowledgement needs no dedicated packets: every packet carries the acks for the peer's
//!    most recent packets, and per-packet acks are mapped back to the messages they carried
//! * Unacknowledged messages are resent at a configurable rate - there is no NAK and no
//!    retransmission timer per packet
//! * Small messages are combined into packets, up to a configured packet size
//! * Big messages ('blocks') are split into fragments that are acknowledged and resent
//!    individually, and reassembled at the receiving side. Only one block is in flight at a time.
//! * Memory is bounded: all bookkeeping lives in fixed-size windows indexed by 16 bit sequence
//!    numbers, with wrap-around semantics
//! * Not in scope: encryption, congestion control, connection setup, multiplexing of channels
//!
//! ## Packet format
//!
//! Packets are bit-packed, with bits filled into each byte starting at the least significant
//!  bit. `int(min, max)` denotes an integer encoded as `value - min` in the minimum number of bits
//!  required for the range, `align` denotes zero bits up to the next byte boundary.
//!
//! ```ascii
//! perfect flag (1 bit): set iff all 32 ack bits are set
//! ack bits (32 bits): only if the perfect flag is not set. Bit k acknowledges 'ack - k - 1'
//! sequence (16 bits)
//! ack in range flag (1 bit): set iff 'sequence - ack' (wrapping) is in 1..=64
//! ack delta int(1, 64) if in range, ack (16 bits) otherwise
//! align
//!
//! has messages flag (1 bit)
//!   number of messages int(1, max_messages_per_packet)
//!   per message:
//!     message id (16 bits)
//!     length int(0, max_message_size)
//!     align
//!     raw message bytes
//! has fragment flag (1 bit)
//!   block message id (16 bits)
//!   block size int(1, max_block_size)
//!   fragment id int(0, max_fragments_per_block - 1)
//!   align
//!   raw fragment bytes (length derived from block size and fragment id)
//! ```
//!
//! A packet never carries messages and a fragment at the same time, but the format allows it.
//!
//! ## Acknowledgement
//!
//! Each side remembers the sequence numbers of the peer's packets it received in a sliding
//!  window, and sends the newest one plus a bit field for its 32 predecessors with every packet.
//!  When a packet is acknowledged for the first time, all messages it carried are removed from
//!  the send queue (or, for a block fragment, the fragment is marked as acknowledged). A packet
//!  that is never acknowledged is simply forgotten: its messages stay in the send queue and are
//!  resent once `message_resend_rate` has passed.

pub mod ack_listener;
pub mod ack_window;
pub mod bit_stream;
pub mod block;
pub mod config;
pub mod connection;
pub mod packet;
pub mod receive_stream;
pub mod safe_converter;
pub mod send_stream;
pub mod sequence;
pub mod windowed_buffer;

#[cfg(test)] mod test_util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            // .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
