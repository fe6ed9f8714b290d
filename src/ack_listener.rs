#[cfg(test)] use mockall::automock;
use crate::sequence::SequenceNumber;

/// Observer for packet-level acknowledgements.
///
/// A connection calls `on_packet_acked` exactly once for each of its sent packets that the peer
///  acknowledges, after the acknowledgement was applied to the connection's message
///  bookkeeping. Packets that are acknowledged repeatedly by later acks do not trigger further
///  calls.
///
/// NB: Callbacks happen synchronously from inside `Connection::read_packet`, so implementations
///      should be quick and must not call back into the connection.
#[cfg_attr(test, automock)]
pub trait PacketAckListener: Send + Sync + 'static {
    fn on_packet_acked(&self, sequence: SequenceNumber);
}

/// The listener used when none is registered
pub struct NoOpAckListener;

impl PacketAckListener for NoOpAckListener {
    fn on_packet_acked(&self, _sequence: SequenceNumber) {}
}
