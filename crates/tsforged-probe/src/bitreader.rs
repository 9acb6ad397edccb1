//! Big-endian bit cursor with exponential-Golomb support.
//!
//! Bits are consumed from a 32-bit register that is refilled up to four
//! bytes at a time. A read that straddles the register boundary takes the
//! remaining high bits first and the rest from the next refill.

use crate::error::{ProbeError, Result};

/// Bit-level reader over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Next byte to load into `word`.
    position: usize,
    /// Left-aligned unread bits.
    word: u32,
    word_bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            word: 0,
            word_bits: 0,
        }
    }

    /// Bits not yet consumed.
    pub fn bits_remaining(&self) -> u64 {
        (self.data.len() - self.position) as u64 * 8 + u64::from(self.word_bits)
    }

    /// Bits consumed so far.
    pub fn bits_consumed(&self) -> u64 {
        self.position as u64 * 8 - u64::from(self.word_bits)
    }

    fn fill_word(&mut self) -> Result<()> {
        let remaining = self.data.len() - self.position;
        if remaining == 0 {
            return Err(ProbeError::BitstreamOverrun {
                needed: 1,
                available: 0,
            });
        }

        let take = remaining.min(4);
        let mut bytes = [0u8; 4];
        bytes[..take].copy_from_slice(&self.data[self.position..self.position + take]);
        self.word = u32::from_be_bytes(bytes);
        self.position += take;
        self.word_bits = take as u32 * 8;
        Ok(())
    }

    fn take_from_word(&mut self, n: u32) -> u32 {
        debug_assert!(n <= self.word_bits);
        if n == 0 {
            return 0;
        }
        let value = self.word >> (32 - n);
        self.word = self.word.checked_shl(n).unwrap_or(0);
        self.word_bits -= n;
        value
    }

    /// Read `n` bits (at most 32) as an unsigned integer.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(ProbeError::InvalidBitWidth(n));
        }
        if n <= self.word_bits {
            return Ok(self.take_from_word(n));
        }

        let high_bits = self.word_bits;
        let high = self.take_from_word(high_bits);
        let low_bits = n - high_bits;

        self.fill_word().map_err(|_| ProbeError::BitstreamOverrun {
            needed: low_bits,
            available: 0,
        })?;
        if low_bits > self.word_bits {
            return Err(ProbeError::BitstreamOverrun {
                needed: low_bits,
                available: self.word_bits,
            });
        }
        let low = self.take_from_word(low_bits);

        Ok(high.checked_shl(low_bits).unwrap_or(0) | low)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Discard `n` bits of any width.
    pub fn skip_bits(&mut self, mut n: u64) -> Result<()> {
        while n > 0 {
            let step = n.min(32) as u32;
            self.read_bits(step)?;
            n -= u64::from(step);
        }
        Ok(())
    }

    fn skip_leading_zeros(&mut self) -> Result<u32> {
        let mut zeros = 0;
        loop {
            if self.word_bits == 0 {
                self.fill_word()?;
            }
            let run = self.word.leading_zeros().min(self.word_bits);
            zeros += run;
            if run < self.word_bits {
                self.take_from_word(run);
                return Ok(zeros);
            }
            // Register exhausted without a set bit
            self.word = 0;
            self.word_bits = 0;
        }
    }

    /// Unsigned exponential-Golomb code, `ue(v)`.
    pub fn read_ue(&mut self) -> Result<u32> {
        let zeros = self.skip_leading_zeros()?;
        if zeros > 31 {
            return Err(ProbeError::malformed(format!(
                "exp-Golomb prefix of {zeros} zero bits"
            )));
        }
        let code = self.read_bits(zeros + 1)?;
        Ok(code - 1)
    }

    /// Signed exponential-Golomb code, `se(v)`.
    pub fn read_se(&mut self) -> Result<i32> {
        let value = i64::from(self.read_ue()?);
        let signed = if value & 1 == 1 {
            (value + 1) >> 1
        } else {
            -(value >> 1)
        };
        i32::try_from(signed)
            .map_err(|_| ProbeError::malformed(format!("se(v) {signed} out of range")))
    }
}
