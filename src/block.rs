//! State of the (at most one) block message that is currently being sent or received.
//!
//! A block is a message too big to be sent inline. It is split into fragments of
//!  `block_fragment_size` bytes (the last fragment may be shorter), and each fragment is sent,
//!  acknowledged and retransmitted independently of the others.
//!
//! Both sides' state only exists while a block is in flight: a `SendBlock` lives from the call
//!  to `send_message` until the last fragment is acknowledged, a `ReceiveBlock` from the first
//!  received fragment until the block is reassembled. Dropping the state releases the buffers.

use std::cmp::min;
use std::time::Duration;
use bit_set::BitSet;
use bytes::Bytes;
use crate::packet::BlockFragment;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::sequence::SequenceNumber;

pub fn num_fragments(block_size: u32, fragment_size: usize) -> usize {
    let block_size: usize = block_size.safe_cast();
    block_size.div_ceil(fragment_size)
}

/// the length of a given fragment: all fragments except the last one have the full fragment size
pub fn fragment_len(block_size: u32, fragment_id: u16, fragment_size: usize) -> usize {
    let block_size: usize = block_size.safe_cast();
    let fragment_id: usize = fragment_id.safe_cast();
    min(fragment_size, block_size.saturating_sub(fragment_id * fragment_size))
}

/// A snapshot of the progress of a block that is being sent or received
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockStatus {
    pub block_id: SequenceNumber,
    pub block_size: u32,
    pub num_fragments: usize,
    /// acknowledged fragments on the sending side, received fragments on the receiving side
    pub num_completed_fragments: usize,
}

pub struct SendBlock {
    block_id: SequenceNumber,
    data: Bytes,
    fragment_size: usize,
    num_fragments: usize,
    acked_fragments: BitSet,
    num_acked_fragments: usize,
    fragment_time_last_sent: Vec<Option<Duration>>,
}

impl SendBlock {
    pub fn new(block_id: SequenceNumber, data: Bytes, fragment_size: usize) -> SendBlock {
        let num_fragments = num_fragments(data.len().prechecked_cast(), fragment_size);
        SendBlock {
            block_id,
            data,
            fragment_size,
            num_fragments,
            acked_fragments: BitSet::with_capacity(num_fragments),
            num_acked_fragments: 0,
            fragment_time_last_sent: vec![None; num_fragments],
        }
    }

    pub fn block_id(&self) -> SequenceNumber {
        self.block_id
    }

    pub fn status(&self) -> BlockStatus {
        BlockStatus {
            block_id: self.block_id,
            block_size: self.data.len().prechecked_cast(),
            num_fragments: self.num_fragments,
            num_completed_fragments: self.num_acked_fragments,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.num_acked_fragments == self.num_fragments
    }

    /// Selects the lowest-indexed fragment that is neither acknowledged nor sent less than
    ///  `resend_rate` ago, and marks it as sent at `now`.
    pub fn next_fragment(&mut self, now: Duration, resend_rate: Duration) -> Option<BlockFragment> {
        let fragment_index = (0..self.num_fragments)
            .filter(|&i| !self.acked_fragments.contains(i))
            .find(|&i| match self.fragment_time_last_sent[i] {
                None => true,
                Some(t) => now.saturating_sub(t) >= resend_rate,
            })?;

        self.fragment_time_last_sent[fragment_index] = Some(now);

        let fragment_id: u16 = fragment_index.prechecked_cast();
        let block_size: u32 = self.data.len().prechecked_cast();
        let start = fragment_index * self.fragment_size;
        let end = start + fragment_len(block_size, fragment_id, self.fragment_size);
        Some(BlockFragment {
            block_id: self.block_id,
            block_size,
            fragment_id,
            data: self.data.slice(start..end),
        })
    }

    /// returns `true` if the fragment was not acknowledged before
    pub fn ack_fragment(&mut self, fragment_id: u16) -> bool {
        let fragment_index: usize = fragment_id.safe_cast();
        if fragment_index >= self.num_fragments || !self.acked_fragments.insert(fragment_index) {
            return false;
        }
        self.num_acked_fragments += 1;
        true
    }
}

pub struct ReceiveBlock {
    block_id: SequenceNumber,
    block_size: u32,
    fragment_size: usize,
    num_fragments: usize,
    received_fragments: BitSet,
    num_received_fragments: usize,
    data: Vec<u8>,
}

impl ReceiveBlock {
    pub fn new(block_id: SequenceNumber, block_size: u32, fragment_size: usize) -> ReceiveBlock {
        let num_fragments = num_fragments(block_size, fragment_size);
        ReceiveBlock {
            block_id,
            block_size,
            fragment_size,
            num_fragments,
            received_fragments: BitSet::with_capacity(num_fragments),
            num_received_fragments: 0,
            data: vec![0; block_size.safe_cast()],
        }
    }

    pub fn block_id(&self) -> SequenceNumber {
        self.block_id
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn status(&self) -> BlockStatus {
        BlockStatus {
            block_id: self.block_id,
            block_size: self.block_size,
            num_fragments: self.num_fragments,
            num_completed_fragments: self.num_received_fragments,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.num_received_fragments == self.num_fragments
    }

    /// Copies a fragment's data into the reassembly buffer. Returns `false` for duplicates, which
    ///  leave the buffer unchanged.
    pub fn insert_fragment(&mut self, fragment_id: u16, fragment_data: &[u8]) -> bool {
        let fragment_index: usize = fragment_id.safe_cast();
        debug_assert!(fragment_index < self.num_fragments);
        debug_assert_eq!(fragment_data.len(), fragment_len(self.block_size, fragment_id, self.fragment_size));

        if !self.received_fragments.insert(fragment_index) {
            return false;
        }

        let start = fragment_index * self.fragment_size;
        self.data[start..start + fragment_data.len()].copy_from_slice(fragment_data);
        self.num_received_fragments += 1;
        true
    }

    pub fn into_message(self) -> Bytes {
        debug_assert!(self.is_complete());
        Bytes::from(self.data)
    }
}
