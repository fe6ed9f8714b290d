//! Bit-packed serialization primitives.
//!
//! Bits are packed LSB-first: the first bit written ends up in bit 0 of the first byte. This is
//!  equivalent to accumulating values in little-endian 32 bit words, so the byte layout does not
//!  depend on how the writer buffers its scratch bits.
//!
//! Every `write_*` call has a matching `read_*` call, and reading back the same sequence of
//!  calls reproduces the written values exactly.

use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};

/// number of bits needed to represent all values in `min..=max`
pub fn bits_required(min: u32, max: u32) -> u32 {
    debug_assert!(min <= max);
    let range = max - min;
    if range == 0 {
        0
    }
    else {
        u32::BITS - range.leading_zeros()
    }
}

pub struct BitWriter {
    buf: BytesMut,
    scratch: u64,
    scratch_bits: u32,
    bits_written: usize,
}

impl BitWriter {
    pub fn with_capacity(capacity_bytes: usize) -> BitWriter {
        BitWriter {
            buf: BytesMut::with_capacity(capacity_bytes),
            scratch: 0,
            scratch_bits: 0,
            bits_written: 0,
        }
    }

    pub fn bits_written(&self) -> usize {
        self.bits_written
    }

    /// number of bytes the finished buffer will have
    pub fn bytes_written(&self) -> usize {
        self.bits_written.div_ceil(8)
    }

    pub fn write_bits(&mut self, value: u32, num_bits: u32) {
        debug_assert!(num_bits <= 32);
        if num_bits == 0 {
            return;
        }
        debug_assert!(num_bits == 32 || value < (1u32 << num_bits), "value {} does not fit into {} bits", value, num_bits);

        self.scratch |= (value as u64) << self.scratch_bits;
        self.scratch_bits += num_bits;
        self.bits_written += num_bits as usize;

        while self.scratch_bits >= 8 {
            self.buf.put_u8(self.scratch as u8);
            self.scratch >>= 8;
            self.scratch_bits -= 8;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(value as u32, 1);
    }

    /// writes `value` in the minimum number of bits required for the range `min..=max`
    pub fn write_int(&mut self, value: u32, min: u32, max: u32) {
        debug_assert!(min <= value && value <= max, "value {} out of range {}..={}", value, min, max);
        self.write_bits(value - min, bits_required(min, max));
    }

    /// pads with zero bits up to the next byte boundary
    pub fn write_align(&mut self) {
        let remainder = self.bits_written % 8;
        if remainder != 0 {
            self.write_bits(0, 8 - remainder as u32);
        }
    }

    /// writes a run of raw bytes. The writer must be aligned, i.e. `write_align` must have been
    ///  called before
    pub fn write_bytes(&mut self, data: &[u8]) {
        assert_eq!(self.scratch_bits, 0, "writing bytes requires an aligned writer");
        self.buf.put_slice(data);
        self.bits_written += data.len() * 8;
    }

    pub fn finish(mut self) -> Bytes {
        if self.scratch_bits > 0 {
            self.buf.put_u8(self.scratch as u8);
        }
        self.buf.freeze()
    }
}

pub struct BitReader<'a> {
    data: &'a [u8],
    scratch: u64,
    scratch_bits: u32,
    bits_read: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> BitReader<'a> {
        BitReader {
            data,
            scratch: 0,
            scratch_bits: 0,
            bits_read: 0,
        }
    }

    pub fn bits_read(&self) -> usize {
        self.bits_read
    }

    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 + self.scratch_bits as usize
    }

    pub fn read_bits(&mut self, num_bits: u32) -> anyhow::Result<u32> {
        debug_assert!(num_bits <= 32);
        if num_bits as usize > self.bits_remaining() {
            bail!("buffer underflow: reading {} bits with {} bits remaining", num_bits, self.bits_remaining());
        }

        while self.scratch_bits < num_bits {
            let Some((&next, rest)) = self.data.split_first() else {
                bail!("buffer underflow");
            };
            self.scratch |= (next as u64) << self.scratch_bits;
            self.scratch_bits += 8;
            self.data = rest;
        }

        let mask = if num_bits == 32 { u32::MAX as u64 } else { (1u64 << num_bits) - 1 };
        let value = (self.scratch & mask) as u32;
        self.scratch >>= num_bits;
        self.scratch_bits -= num_bits;
        self.bits_read += num_bits as usize;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> anyhow::Result<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn read_int(&mut self, min: u32, max: u32) -> anyhow::Result<u32> {
        let value = min as u64 + self.read_bits(bits_required(min, max))? as u64;
        if value > max as u64 {
            bail!("value {} is out of the range {}..={}", value, min, max);
        }
        Ok(value as u32)
    }

    /// skips padding up to the next byte boundary, failing if the padding contains set bits
    pub fn read_align(&mut self) -> anyhow::Result<()> {
        let remainder = self.bits_read % 8;
        if remainder != 0 {
            let padding = self.read_bits(8 - remainder as u32)?;
            if padding != 0 {
                bail!("non-zero alignment padding");
            }
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        if self.bits_read % 8 != 0 {
            bail!("reading bytes requires an aligned reader");
        }
        debug_assert_eq!(self.scratch_bits, 0);

        if len > self.data.len() {
            bail!("buffer underflow: reading {} bytes with {} bytes remaining", len, self.data.len());
        }
        let (result, rest) = self.data.split_at(len);
        self.data = rest;
        self.bits_read += len * 8;
        Ok(result)
    }
}
