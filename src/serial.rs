use bit::BitIndex;
use serde::{Deserialize, Serialize};

/// An 8-bit LSB-first shift register with a bit counter.
///
/// Both the command byte and every data byte of a transaction travel
/// through one of these; deasserting chip-enable rebuilds it from
/// scratch, so a partial byte never survives a session.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct ShiftRegister {
    byte: u8,
    bits: usize,
}

impl ShiftRegister {
    pub fn new() -> ShiftRegister {
        ShiftRegister { byte: 0, bits: 0 }
    }

    /// Shifts one incoming line bit in. Returns the assembled byte once
    /// 8 bits have accumulated, leaving the register empty.
    #[inline]
    pub fn shift_in(&mut self, bit: bool) -> Option<u8> {
        self.byte.set_bit(self.bits, bit);
        self.bits += 1;
        if self.bits == 8 {
            let byte = self.byte;
            self.reset();
            Some(byte)
        } else {
            None
        }
    }

    /// Shifts one outgoing bit out, or `None` once the loaded byte is
    /// exhausted.
    #[inline]
    pub fn shift_out(&mut self) -> Option<bool> {
        if self.bits == 0 {
            return None;
        }
        let bit = self.byte.bit(0);
        self.byte = self.byte.wrapping_shr(1);
        self.bits -= 1;
        Some(bit)
    }

    pub fn load(&mut self, byte: u8) {
        self.byte = byte;
        self.bits = 8;
    }

    pub fn reset(&mut self) {
        self.byte = 0;
        self.bits = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }
}
