use std::io::Write;
use std::time::{Duration, Instant};

use shared::Result;

use crate::log_histogram::LogHistogramSampler;
use crate::operation::Operation;

/// Buckets per latency histogram; 1.1^200 µs is a little over three minutes.
pub const LATENCY_BINS: usize = 200;

/// Buckets for the pipeline occupancy histogram.
pub const QUEUE_DEPTH_BINS: usize = 100;

/// Statistics sink owned by a single connection. Merged into a run-wide view with
/// [`accumulate`](ConnectionStats::accumulate) once every connection has finished.
#[derive(Clone, Debug)]
pub struct ConnectionStats {
    pub get_sampler: LogHistogramSampler,
    pub set_sampler: LogHistogramSampler,
    /// In-flight operations right after each issue
    pub op_sampler: LogHistogramSampler,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub gets: u64,
    pub sets: u64,
    pub get_misses: u64,
    pub start: Option<Instant>,
    pub stop: Option<Instant>,
    retain_samples: bool,
}

impl ConnectionStats {
    pub fn new(retain_samples: bool) -> Self {
        let sampler = || {
            if retain_samples {
                LogHistogramSampler::with_samples(LATENCY_BINS)
            } else {
                LogHistogramSampler::new(LATENCY_BINS)
            }
        };

        Self {
            get_sampler: sampler(),
            set_sampler: sampler(),
            op_sampler: LogHistogramSampler::new(QUEUE_DEPTH_BINS),
            rx_bytes: 0,
            tx_bytes: 0,
            gets: 0,
            sets: 0,
            get_misses: 0,
            start: None,
            stop: None,
            retain_samples,
        }
    }

    /// Fresh statistics with the same sampling mode.
    pub fn cleared(&self) -> Self {
        Self::new(self.retain_samples)
    }

    pub fn log_get(&mut self, op: &Operation) -> Result<()> {
        self.get_sampler.sample_op(op)?;
        self.gets += 1;
        Ok(())
    }

    pub fn log_set(&mut self, op: &Operation) -> Result<()> {
        self.set_sampler.sample_op(op)?;
        self.sets += 1;
        Ok(())
    }

    pub fn log_op(&mut self, queue_depth: usize) -> Result<()> {
        self.op_sampler.sample(queue_depth as f64)
    }

    pub fn hits(&self) -> u64 {
        self.gets.saturating_sub(self.get_misses)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match (self.start, self.stop) {
            (Some(start), Some(stop)) => Some(stop.saturating_duration_since(start)),
            _ => None,
        }
    }

    /// Completed operations per second over the measured window.
    pub fn qps(&self) -> f64 {
        match self.elapsed() {
            Some(elapsed) if !elapsed.is_zero() => {
                (self.gets + self.sets) as f64 / elapsed.as_secs_f64()
            }
            _ => 0.0,
        }
    }

    pub fn accumulate(&mut self, other: &ConnectionStats) -> Result<()> {
        self.get_sampler.accumulate(&other.get_sampler)?;
        self.set_sampler.accumulate(&other.set_sampler)?;
        self.op_sampler.accumulate(&other.op_sampler)?;

        self.rx_bytes += other.rx_bytes;
        self.tx_bytes += other.tx_bytes;
        self.gets += other.gets;
        self.sets += other.sets;
        self.get_misses += other.get_misses;

        // the merged window spans every connection's window
        self.start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.stop = match (self.stop, other.stop) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        Ok(())
    }

    /// Writes one `<start offset secs> <latency µs>` line per retained sample, GETs first.
    pub fn write_samples<W: Write>(&self, out: &mut W, origin: Instant) -> Result<()> {
        for op in self
            .get_sampler
            .samples()
            .iter()
            .chain(self.set_sampler.samples())
        {
            let offset = op.start_time.saturating_duration_since(origin).as_secs_f64();
            writeln!(out, "{:.6} {:.1}", offset, op.time())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpKind;

    fn completed(kind: OpKind, start: Instant, micros: u64) -> Operation {
        let mut op = Operation::new(kind, "key", start);
        op.complete(start + Duration::from_micros(micros));
        op
    }

    #[test]
    fn test_log_get_and_set_route_to_their_samplers() {
        let start = Instant::now();
        let mut stats = ConnectionStats::new(false);

        stats.log_get(&completed(OpKind::Get, start, 100)).unwrap();
        stats.log_get(&completed(OpKind::Get, start, 200)).unwrap();
        stats.log_set(&completed(OpKind::Set, start, 300)).unwrap();
        stats.get_misses = 1;

        assert_eq!(stats.gets, 2);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hits(), 1);
        assert_eq!(stats.get_sampler.total(), 2);
        assert_eq!(stats.set_sampler.total(), 1);
        assert!((stats.get_sampler.average().unwrap() - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_accumulate_merges_counters_and_window() {
        let origin = Instant::now();

        let mut a = ConnectionStats::new(false);
        a.log_get(&completed(OpKind::Get, origin, 50)).unwrap();
        a.log_op(1).unwrap();
        a.log_op(2).unwrap();
        a.rx_bytes = 10;
        a.start = Some(origin + Duration::from_millis(5));
        a.stop = Some(origin + Duration::from_millis(100));

        let mut b = ConnectionStats::new(false);
        b.log_set(&completed(OpKind::Set, origin, 70)).unwrap();
        b.log_op(3).unwrap();
        b.tx_bytes = 20;
        b.start = Some(origin);
        b.stop = Some(origin + Duration::from_millis(80));

        let mut total = ConnectionStats::new(false);
        total.accumulate(&a).unwrap();
        total.accumulate(&b).unwrap();

        assert_eq!(total.gets + total.sets, 2);
        assert_eq!(total.op_sampler.total(), 3);
        assert!((total.op_sampler.average().unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(total.rx_bytes, 10);
        assert_eq!(total.tx_bytes, 20);
        assert_eq!(total.elapsed(), Some(Duration::from_millis(100)));
        assert!((total.qps() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_write_samples() {
        let origin = Instant::now();
        let mut stats = ConnectionStats::new(true);
        stats
            .log_get(&completed(OpKind::Get, origin + Duration::from_secs(1), 120))
            .unwrap();
        stats.log_set(&completed(OpKind::Set, origin, 80)).unwrap();

        let mut file = tempfile::tempfile().unwrap();
        stats.write_samples(&mut file, origin).unwrap();

        use std::io::{Read, Seek, SeekFrom};
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["1.000000 120.0", "0.000000 80.0"]);
    }
}
