use shared::{Error, Result};

use crate::operation::Operation;

/// Growth factor between consecutive bucket boundaries.
pub const BASE: f64 = 1.1;

/// Logarithmic-bucket latency histogram.
///
/// Bucket `i` covers `[BASE^i, BASE^(i+1))`; anything below 1 lands in bucket 0 and anything
/// past the last boundary lands in the last bucket. Sum and sum of squares are tracked exactly,
/// so mean and standard deviation do not depend on the bucketing.
#[derive(Clone, Debug)]
pub struct LogHistogramSampler {
    bins: Vec<u64>,
    sum: f64,
    sum_sq: f64,
    samples: Vec<Operation>,
    retain_samples: bool,
}

impl LogHistogramSampler {
    /// Creates a sampler with `bins + 1` buckets. A zero bucket count is promoted to one.
    pub fn new(bins: usize) -> Self {
        Self {
            bins: vec![0; bins.max(1) + 1],
            sum: 0.0,
            sum_sq: 0.0,
            samples: Vec::new(),
            retain_samples: false,
        }
    }

    /// Like [`new`](Self::new) but keeps every sampled operation for later export.
    pub fn with_samples(bins: usize) -> Self {
        Self {
            retain_samples: true,
            ..Self::new(bins)
        }
    }

    pub fn sample(&mut self, duration: f64) -> Result<()> {
        // NaN fails this comparison as well
        if !(duration >= 0.0) {
            return Err(Error::NegativeSample(duration));
        }

        self.sum += duration;
        self.sum_sq += duration * duration;

        let bin = (duration.ln() / BASE.ln()).floor();
        let last = self.bins.len() - 1;
        let index = if bin < 0.0 {
            0
        } else if bin >= last as f64 {
            last
        } else {
            bin as usize
        };
        self.bins[index] += 1;

        Ok(())
    }

    /// Samples the operation's latency and keeps the record if retention is enabled.
    pub fn sample_op(&mut self, op: &Operation) -> Result<()> {
        self.sample(op.time())?;
        if self.retain_samples {
            self.samples.push(op.clone());
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn average(&self) -> Result<f64> {
        let total = self.nonempty_total()?;
        Ok(self.sum / total)
    }

    pub fn stddev(&self) -> Result<f64> {
        let total = self.nonempty_total()?;
        let mean = self.sum / total;
        // rounding can push the variance a hair below zero
        Ok((self.sum_sq / total - mean * mean).max(0.0).sqrt())
    }

    /// Midpoint (in log space) of the first nonempty bucket.
    pub fn minimum(&self) -> Result<f64> {
        self.bins
            .iter()
            .position(|&count| count > 0)
            .map(|i| BASE.powf(i as f64 + 0.5))
            .ok_or(Error::EmptyHistogram)
    }

    /// Value at percentile `nth`, interpolated linearly inside the bucket that holds it.
    pub fn get_nth(&self, nth: f64) -> Result<f64> {
        if !(0.0..=100.0).contains(&nth) {
            return Err(Error::InvalidPercentile(nth));
        }
        let total = self.nonempty_total()?;
        let target = total * nth / 100.0;

        let mut cumulative = 0u64;
        for (i, &count) in self.bins.iter().enumerate() {
            cumulative += count;
            if cumulative as f64 > target {
                let left = target - (cumulative - count) as f64;
                let lower = BASE.powi(i as i32);
                let upper = BASE.powi(i as i32 + 1);
                return Ok(lower + left / count as f64 * (upper - lower));
            }
        }

        Ok(BASE.powi(self.bins.len() as i32))
    }

    /// Folds `other` into `self`. Both must have the same bucket count.
    pub fn accumulate(&mut self, other: &LogHistogramSampler) -> Result<()> {
        if self.bins.len() != other.bins.len() {
            return Err(Error::BinCountMismatch(self.bins.len(), other.bins.len()));
        }

        for (mine, theirs) in self.bins.iter_mut().zip(&other.bins) {
            *mine += theirs;
        }
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.samples.extend(other.samples.iter().cloned());

        Ok(())
    }

    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn sum_sq(&self) -> f64 {
        self.sum_sq
    }

    pub fn samples(&self) -> &[Operation] {
        &self.samples
    }

    fn nonempty_total(&self) -> Result<f64> {
        match self.total() {
            0 => Err(Error::EmptyHistogram),
            n => Ok(n as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpKind;
    use std::time::{Duration, Instant};

    fn filled(values: &[f64]) -> LogHistogramSampler {
        let mut h = LogHistogramSampler::new(200);
        for &v in values {
            h.sample(v).unwrap();
        }
        h
    }

    #[test]
    fn test_sample_increments_total_and_sum() {
        let mut h = LogHistogramSampler::new(200);
        let mut expected_sum = 0.0;

        for (i, d) in [0.0, 0.5, 1.0, 12.5, 980.0, 1e12].into_iter().enumerate() {
            h.sample(d).unwrap();
            expected_sum += d;
            assert_eq!(h.total(), i as u64 + 1);
            let reconstructed = h.average().unwrap() * h.total() as f64;
            assert!((reconstructed - expected_sum).abs() <= expected_sum * 1e-12);
        }
    }

    #[test]
    fn test_zero_bins_promoted_to_one() {
        let mut h = LogHistogramSampler::new(0);
        assert_eq!(h.bins().len(), 2);

        h.sample(1000.0).unwrap();
        assert_eq!(h.bins(), &[0, 1]);
    }

    #[test]
    fn test_bins_are_clamped() {
        let h = filled(&[0.0, 0.2, 1e30]);
        assert_eq!(h.bins().len(), 201);
        assert_eq!(h.bins()[0], 2);
        assert_eq!(h.bins()[200], 1);
    }

    #[test]
    fn test_bin_index_is_floor_of_log() {
        // log_1.1(100) = 48.3
        let h = filled(&[100.0]);
        assert_eq!(h.bins()[48], 1);
    }

    #[test]
    fn test_negative_and_nan_samples_are_rejected() {
        let mut h = LogHistogramSampler::new(10);
        assert!(matches!(h.sample(-1.0), Err(Error::NegativeSample(_))));
        assert!(h.sample(f64::NAN).is_err());
        assert_eq!(h.total(), 0);
        assert_eq!(h.sum(), 0.0);
    }

    #[test]
    fn test_empty_histogram_queries_fail() {
        let h = LogHistogramSampler::new(200);
        assert!(matches!(h.minimum(), Err(Error::EmptyHistogram)));
        assert!(matches!(h.average(), Err(Error::EmptyHistogram)));
        assert!(matches!(h.stddev(), Err(Error::EmptyHistogram)));
        assert!(matches!(h.get_nth(50.0), Err(Error::EmptyHistogram)));
    }

    #[test]
    fn test_average_and_stddev_are_exact() {
        let h = filled(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((h.average().unwrap() - 5.0).abs() < 1e-12);
        assert!((h.stddev().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_stddev_of_constant_samples_is_zero() {
        let h = filled(&[0.1, 0.1, 0.1]);
        assert!(h.stddev().unwrap() < 1e-6);
    }

    #[test]
    fn test_median_of_uniform_samples() {
        let values: Vec<f64> = (1..=1000).map(|i| i as f64).collect();
        let h = filled(&values);

        let median = h.get_nth(50.0).unwrap();
        // one bucket around 500 spans 10%
        assert!((median - 500.0).abs() / 500.0 < 0.1, "median was {median}");

        let p99 = h.get_nth(99.0).unwrap();
        assert!((p99 - 990.0).abs() / 990.0 < 0.1, "p99 was {p99}");
    }

    #[test]
    fn test_get_nth_interpolates_within_bucket() {
        // all ten samples in bucket 48: [1.1^48, 1.1^49)
        let h = filled(&[100.0; 10]);
        let lower = BASE.powi(48);
        let upper = BASE.powi(49);

        assert!((h.get_nth(0.0).unwrap() - lower).abs() < 1e-9);
        let mid = h.get_nth(50.0).unwrap();
        assert!((mid - (lower + 0.5 * (upper - lower))).abs() < 1e-9);
    }

    #[test]
    fn test_get_nth_saturates_past_the_data() {
        let h = filled(&[3.0, 4.0]);
        assert_eq!(h.get_nth(100.0).unwrap(), BASE.powi(201));
        assert!(matches!(h.get_nth(101.0), Err(Error::InvalidPercentile(_))));
    }

    #[test]
    fn test_minimum_reports_first_bucket_midpoint() {
        let h = filled(&[100.0, 5000.0]);
        assert!((h.minimum().unwrap() - BASE.powf(48.5)).abs() < 1e-9);
    }

    #[test]
    fn test_accumulate_is_commutative_and_associative() {
        let a = filled(&[1.0, 10.0, 100.0]);
        let b = filled(&[2.0, 20.0]);
        let c = filled(&[3.0, 3000.0, 0.0, 7.5]);

        // (a + b) + c
        let mut left = a.clone();
        left.accumulate(&b).unwrap();
        left.accumulate(&c).unwrap();

        // a + (b + c)
        let mut bc = b.clone();
        bc.accumulate(&c).unwrap();
        let mut right = a.clone();
        right.accumulate(&bc).unwrap();

        // c + b + a
        let mut reversed = c.clone();
        reversed.accumulate(&b).unwrap();
        reversed.accumulate(&a).unwrap();

        for other in [&right, &reversed] {
            assert_eq!(left.bins(), other.bins());
            assert!((left.sum() - other.sum()).abs() < 1e-9);
            assert!((left.sum_sq() - other.sum_sq()).abs() < 1e-6);
        }
        assert_eq!(left.total(), 9);
    }

    #[test]
    fn test_accumulate_rejects_mismatched_bins() {
        let mut a = LogHistogramSampler::new(10);
        let b = LogHistogramSampler::new(20);
        assert!(matches!(a.accumulate(&b), Err(Error::BinCountMismatch(11, 21))));
    }

    #[test]
    fn test_samples_retained_only_when_requested() {
        let start = Instant::now();
        let mut op = Operation::new(OpKind::Get, "key", start);
        op.complete(start + Duration::from_micros(250));

        let mut plain = LogHistogramSampler::new(200);
        plain.sample_op(&op).unwrap();
        assert!(plain.samples().is_empty());

        let mut keeping = LogHistogramSampler::with_samples(200);
        keeping.sample_op(&op).unwrap();
        keeping.sample_op(&op).unwrap();
        assert_eq!(keeping.samples().len(), 2);

        plain.accumulate(&keeping).unwrap();
        assert_eq!(plain.samples().len(), 2);
        assert_eq!(plain.total(), 3);
    }
}
