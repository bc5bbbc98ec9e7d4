use bytes::Bytes;
use rand::Rng;
use rand::distr::Alphanumeric;

/// Largest SET payload; larger drawn sizes are truncated.
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// Shared block of printable filler that SET payloads are sliced from.
#[derive(Clone, Debug)]
pub struct ValuePool {
    data: Bytes,
}

impl ValuePool {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let data: Vec<u8> = rng
            .sample_iter(Alphanumeric)
            .take(2 * MAX_VALUE_LEN)
            .collect();
        Self {
            data: Bytes::from(data),
        }
    }

    /// A payload of `length` bytes (capped at [`MAX_VALUE_LEN`]) starting at a random offset.
    pub fn value<R: Rng + ?Sized>(&self, rng: &mut R, length: usize) -> Bytes {
        let length = length.min(MAX_VALUE_LEN);
        let offset = rng.random_range(0..=MAX_VALUE_LEN);
        self.data.slice(offset..offset + length)
    }
}
