use std::time::Instant;

/// Longest key the memcached text protocol accepts.
pub const MAX_KEY_LEN: usize = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Get,
    Set,
}

/// One request on the wire, from issuance until its response has been parsed.
#[derive(Clone, Debug)]
pub struct Operation {
    pub kind: OpKind,
    pub key: String,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
}

impl Operation {
    pub fn new(kind: OpKind, key: impl Into<String>, start_time: Instant) -> Self {
        let mut key = key.into();
        if key.len() > MAX_KEY_LEN {
            let mut cut = MAX_KEY_LEN;
            while !key.is_char_boundary(cut) {
                cut -= 1;
            }
            key.truncate(cut);
        }

        Self {
            kind,
            key,
            start_time,
            end_time: None,
        }
    }

    pub fn complete(&mut self, end_time: Instant) {
        self.end_time = Some(end_time);
    }

    /// Latency in microseconds. Zero until the operation has completed.
    pub fn time(&self) -> f64 {
        match self.end_time {
            Some(end) => end.saturating_duration_since(self.start_time).as_secs_f64() * 1_000_000.0,
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_time_is_in_microseconds() {
        let start = Instant::now();
        let mut op = Operation::new(OpKind::Get, "k", start);
        assert_eq!(op.time(), 0.0);

        op.complete(start + Duration::from_micros(1500));
        assert!((op.time() - 1500.0).abs() < 1e-6);
    }

    #[test]
    fn test_key_is_bounded() {
        let op = Operation::new(OpKind::Set, "x".repeat(400), Instant::now());
        assert_eq!(op.key.len(), MAX_KEY_LEN);
    }
}
