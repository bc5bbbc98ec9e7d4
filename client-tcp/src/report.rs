use std::fmt::{self, Write};

use sampler::{ConnectionStats, LogHistogramSampler};

const PERCENTILES: [f64; 5] = [5.0, 10.0, 90.0, 95.0, 99.0];

/// End-of-run table: one latency row per operation kind, then throughput, misses and bytes
/// moved.
pub struct Report<'a>(pub &'a ConnectionStats);

impl fmt::Display for Report<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.0;
        writeln!(
            out,
            "{:<7} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "#type", "avg", "std", "min", "5th", "10th", "90th", "95th", "99th"
        )?;
        write_row(out, "read", &stats.get_sampler)?;
        write_row(out, "update", &stats.set_sampler)?;
        writeln!(out)?;

        let ops = stats.gets + stats.sets;
        let secs = stats.elapsed().map(|d| d.as_secs_f64()).unwrap_or(0.0);
        writeln!(
            out,
            "Total QPS = {:.1} ({} / {:.1}s)",
            stats.qps(),
            ops,
            secs
        )?;

        let miss_pct = if stats.gets == 0 {
            0.0
        } else {
            stats.get_misses as f64 / stats.gets as f64 * 100.0
        };
        writeln!(out, "Misses = {} ({:.1}%)", stats.get_misses, miss_pct)?;
        write_depth(out, &stats.op_sampler)?;
        writeln!(out)?;

        write_bytes(out, "RX", stats.rx_bytes, secs)?;
        write_bytes(out, "TX", stats.tx_bytes, secs)
    }
}

fn write_row(out: &mut impl Write, label: &str, sampler: &LogHistogramSampler) -> fmt::Result {
    let Some(cells) = row_values(sampler) else {
        return writeln!(out, "{label:<7} no samples");
    };

    write!(out, "{label:<7}")?;
    for value in cells {
        write!(out, " {value:>8.1}")?;
    }
    writeln!(out)
}

/// avg, std, min and the fixed percentiles; `None` when nothing was sampled.
fn row_values(sampler: &LogHistogramSampler) -> Option<Vec<f64>> {
    let mut cells = vec![
        sampler.average().ok()?,
        sampler.stddev().ok()?,
        sampler.minimum().ok()?,
    ];
    for p in PERCENTILES {
        cells.push(sampler.get_nth(p).ok()?);
    }
    Some(cells)
}

fn write_depth(out: &mut impl Write, sampler: &LogHistogramSampler) -> fmt::Result {
    match (sampler.average(), sampler.get_nth(99.0)) {
        (Ok(avg), Ok(p99)) => writeln!(out, "Queue depth = {avg:.1} avg, {p99:.1} 99th"),
        _ => writeln!(out, "Queue depth = no samples"),
    }
}

fn write_bytes(out: &mut impl Write, label: &str, bytes: u64, secs: f64) -> fmt::Result {
    let rate = if secs > 0.0 {
        bytes as f64 / secs / (1024.0 * 1024.0)
    } else {
        0.0
    };
    writeln!(out, "{label} {bytes:>12} bytes : {rate:>8.1} MB/s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sampler::{OpKind, Operation};
    use std::time::{Duration, Instant};

    fn op(kind: OpKind, origin: Instant, micros: u64) -> Operation {
        let mut op = Operation::new(kind, "k", origin);
        op.complete(origin + Duration::from_micros(micros));
        op
    }

    #[test]
    fn test_report_lists_both_kinds_and_totals() {
        let origin = Instant::now();
        let mut stats = ConnectionStats::new(false);
        for micros in [100, 200, 300, 400] {
            stats.log_get(&op(OpKind::Get, origin, micros)).unwrap();
        }
        stats.log_set(&op(OpKind::Set, origin, 500)).unwrap();
        stats.get_misses = 1;
        stats.rx_bytes = 2 * 1024 * 1024;
        stats.tx_bytes = 1024;
        stats.start = Some(origin);
        stats.stop = Some(origin + Duration::from_secs(2));

        let text = Report(&stats).to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("#type"));
        assert!(lines[0].ends_with("99th"));
        assert!(lines[1].starts_with("read"));
        assert_eq!(lines[1].split_whitespace().count(), 9);
        assert!(lines[1].contains("250.0"));
        assert!(lines[2].starts_with("update"));
        assert!(text.contains("Total QPS = 2.5 (5 / 2.0s)"));
        assert!(text.contains("Misses = 1 (25.0%)"));
        assert!(text.contains("1.0 MB/s"));
    }

    #[test]
    fn test_empty_sampler_prints_placeholder() {
        let stats = ConnectionStats::new(false);
        let text = Report(&stats).to_string();

        assert!(text.contains("read    no samples"));
        assert!(text.contains("update  no samples"));
        assert!(text.contains("Total QPS = 0.0 (0 / 0.0s)"));
        assert!(text.contains("Misses = 0 (0.0%)"));
        assert!(text.contains("Queue depth = no samples"));
    }

    #[test]
    fn test_queue_depth_line() {
        let mut stats = ConnectionStats::new(false);
        for depth in [2, 2, 2, 2] {
            stats.log_op(depth).unwrap();
        }

        let text = Report(&stats).to_string();
        assert!(text.contains("Queue depth = 2.0 avg"), "{text}");
    }
}
