use colored::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Metrics handle shared between the authenticator and its caller
pub type SharedMetrics = Arc<Mutex<PerformanceMetrics>>;

/// Timed cryptographic operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    KeyGeneration,
    Sign,
    Verify,
    Rotation,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::KeyGeneration => "key_generation",
            Operation::Sign => "sign",
            Operation::Verify => "verify",
            Operation::Rotation => "rotation",
        }
    }
}

/// Performance metrics for key fob authentication operations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    /// Total keypair generations
    pub keygen_count: u64,
    /// Total time spent generating keypairs (microseconds)
    pub keygen_time_us: u64,

    pub sign_count: u64,
    pub sign_time_us: u64,

    pub verify_count: u64,
    pub verify_time_us: u64,

    /// Completed rotations, including archive and record writes
    pub rotation_count: u64,
    pub rotation_time_us: u64,

    /// Challenge-to-decision latency samples (microseconds)
    pub e2e_latency_samples: Vec<u64>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMetrics {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn record(&mut self, op: Operation, elapsed_us: u64) {
        let (count, total) = match op {
            Operation::KeyGeneration => (&mut self.keygen_count, &mut self.keygen_time_us),
            Operation::Sign => (&mut self.sign_count, &mut self.sign_time_us),
            Operation::Verify => (&mut self.verify_count, &mut self.verify_time_us),
            Operation::Rotation => (&mut self.rotation_count, &mut self.rotation_time_us),
        };
        *count += 1;
        *total += elapsed_us;
    }

    pub fn record_e2e(&mut self, elapsed_us: u64) {
        self.e2e_latency_samples.push(elapsed_us);
    }

    pub fn count(&self, op: Operation) -> u64 {
        match op {
            Operation::KeyGeneration => self.keygen_count,
            Operation::Sign => self.sign_count,
            Operation::Verify => self.verify_count,
            Operation::Rotation => self.rotation_count,
        }
    }

    fn average_us(count: u64, total_us: u64) -> f64 {
        if count == 0 {
            0.0
        } else {
            total_us as f64 / count as f64
        }
    }

    /// Summary statistics for reporting
    pub fn snapshot(&self, vehicle_id: &str) -> PerformanceSnapshot {
        let (avg_e2e, min_e2e, max_e2e) = if !self.e2e_latency_samples.is_empty() {
            let avg = self.e2e_latency_samples.iter().sum::<u64>() as f64
                / self.e2e_latency_samples.len() as f64;
            let min = *self.e2e_latency_samples.iter().min().unwrap_or(&0);
            let max = *self.e2e_latency_samples.iter().max().unwrap_or(&0);
            (avg, min, max)
        } else {
            (0.0, 0, 0)
        };

        PerformanceSnapshot {
            vehicle_id: vehicle_id.to_string(),
            keygen_count: self.keygen_count,
            keygen_avg_us: Self::average_us(self.keygen_count, self.keygen_time_us),
            sign_count: self.sign_count,
            sign_avg_us: Self::average_us(self.sign_count, self.sign_time_us),
            verify_count: self.verify_count,
            verify_avg_us: Self::average_us(self.verify_count, self.verify_time_us),
            rotation_count: self.rotation_count,
            rotation_avg_us: Self::average_us(self.rotation_count, self.rotation_time_us),
            e2e_latency_avg_us: avg_e2e,
            e2e_latency_min_us: min_e2e,
            e2e_latency_max_us: max_e2e,
            e2e_sample_count: self.e2e_latency_samples.len() as u64,
        }
    }

    /// Print performance statistics
    pub fn print_stats(&self, vehicle_id: &str) {
        println!(
            "\n{}",
            "═══════════════════════════════════════════════════════".bright_blue()
        );
        println!(
            "{} Key Fob Auth Performance Statistics for {}",
            "ℹ".bright_blue(),
            vehicle_id.bright_white().bold()
        );
        println!(
            "{}",
            "═══════════════════════════════════════════════════════".bright_blue()
        );

        let rows = [
            ("Key Generation:", self.keygen_count, self.keygen_time_us),
            ("Signing:       ", self.sign_count, self.sign_time_us),
            ("Verification:  ", self.verify_count, self.verify_time_us),
            ("Rotation:      ", self.rotation_count, self.rotation_time_us),
        ];
        for (label, count, total_us) in rows {
            if count > 0 {
                println!(
                    "{} {} ops, avg {:.2} μs/op",
                    label,
                    count,
                    Self::average_us(count, total_us)
                );
            }
        }

        if !self.e2e_latency_samples.is_empty() {
            let snapshot = self.snapshot(vehicle_id);
            println!(
                "\nChallenge-to-Decision Latency: {} samples",
                snapshot.e2e_sample_count
            );
            println!(
                "  Average: {:.2} μs ({:.3} ms)",
                snapshot.e2e_latency_avg_us,
                snapshot.e2e_latency_avg_us / 1000.0
            );
            println!(
                "  Min:     {} μs ({:.3} ms)",
                snapshot.e2e_latency_min_us,
                snapshot.e2e_latency_min_us as f64 / 1000.0
            );
            println!(
                "  Max:     {} μs ({:.3} ms)",
                snapshot.e2e_latency_max_us,
                snapshot.e2e_latency_max_us as f64 / 1000.0
            );
        }

        println!(
            "{}",
            "═══════════════════════════════════════════════════════".bright_blue()
        );
    }
}

/// Simplified performance snapshot for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub vehicle_id: String,
    pub keygen_count: u64,
    pub keygen_avg_us: f64,
    pub sign_count: u64,
    pub sign_avg_us: f64,
    pub verify_count: u64,
    pub verify_avg_us: f64,
    pub rotation_count: u64,
    pub rotation_avg_us: f64,
    pub e2e_latency_avg_us: f64,
    pub e2e_latency_min_us: u64,
    pub e2e_latency_max_us: u64,
    pub e2e_sample_count: u64,
}

/// Run `f`, charging its wall time to `op` when metrics are enabled.
///
/// A poisoned metrics lock drops the sample instead of failing the operation.
pub fn track<T>(metrics: Option<&SharedMetrics>, op: Operation, f: impl FnOnce() -> T) -> T {
    let start = metrics.map(|_| Instant::now());
    let result = f();

    if let (Some(start), Some(metrics)) = (start, metrics)
        && let Ok(mut m) = metrics.lock()
    {
        m.record(op, start.elapsed().as_micros() as u64);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_disabled_is_passthrough() {
        let value = track(None, Operation::Sign, || 42);
        assert_eq!(value, 42);
    }

    #[test]
    fn test_track_records_counts() {
        let metrics = PerformanceMetrics::shared();
        track(Some(&metrics), Operation::Sign, || ());
        track(Some(&metrics), Operation::Verify, || ());
        track(Some(&metrics), Operation::Verify, || ());

        let m = metrics.lock().unwrap();
        assert_eq!(m.count(Operation::Sign), 1);
        assert_eq!(m.count(Operation::Verify), 2);
        assert_eq!(m.count(Operation::Rotation), 0);
    }

    #[test]
    fn test_snapshot_averages() {
        let mut m = PerformanceMetrics::new();
        m.record(Operation::KeyGeneration, 100);
        m.record(Operation::KeyGeneration, 300);
        m.record_e2e(10);
        m.record_e2e(30);

        let snapshot = m.snapshot("V001");
        assert_eq!(snapshot.vehicle_id, "V001");
        assert_eq!(snapshot.keygen_count, 2);
        assert!((snapshot.keygen_avg_us - 200.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.sign_avg_us, 0.0);
        assert_eq!(snapshot.e2e_latency_min_us, 10);
        assert_eq!(snapshot.e2e_latency_max_us, 30);
        assert_eq!(snapshot.e2e_sample_count, 2);
    }

    #[test]
    fn test_poisoned_lock_drops_sample() {
        let metrics = PerformanceMetrics::shared();
        let poisoner = metrics.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert_eq!(track(Some(&metrics), Operation::Sign, || 7), 7);
    }
}
