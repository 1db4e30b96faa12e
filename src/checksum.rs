//! One-byte rolling hash used as the droplet trailer.
//!
//! `h(i) = (h(i-1) * 33 mod 256) xor byte(i)`, seeded at 0 and folded over
//! every byte of the record except the trailer itself.

/// Incremental checksum state, fed one byte or one slice at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hasher {
    state: u8,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn update_byte(&mut self, byte: u8) {
        self.state = step(self.state, byte);
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.state = bytes.iter().fold(self.state, |h, &b| step(h, b));
    }

    pub fn finalize(self) -> u8 {
        self.state
    }
}

/// A single hash step.
#[inline]
pub const fn step(state: u8, byte: u8) -> u8 {
    state.wrapping_mul(33) ^ byte
}

/// Checksum of a whole byte range.
pub fn checksum(bytes: &[u8]) -> u8 {
    let mut h = Hasher::new();
    h.update(bytes);
    h.finalize()
}
