use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Accumulates named wall-clock intervals and counters. Solvers accept one
/// as an optional hook; nothing in the library requires it.
#[derive(Default)]
pub struct Timer {
    intervals: Mutex<BTreeMap<String, (Duration, u64)>>,
    counters: Mutex<BTreeMap<String, i64>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time a closure under the given name.
    pub fn time<T, F: FnOnce() -> T>(&self, name: &str, f: F) -> T {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        let mut intervals = self.intervals.lock().unwrap();
        let entry = intervals.entry(name.to_string()).or_insert((Duration::ZERO, 0));
        entry.0 += elapsed;
        entry.1 += 1;
        result
    }

    /// Accumulate a named integer, e.g. an iteration count.
    pub fn add_count(&self, name: &str, value: i64) {
        *self.counters.lock().unwrap().entry(name.to_string()).or_insert(0) += value;
    }

    pub fn report(&self) -> String {
        let mut out = String::new();
        for (name, (total, calls)) in self.intervals.lock().unwrap().iter() {
            out += &format!("{}: {:?} over {} calls\n", name, total, calls);
        }
        for (name, value) in self.counters.lock().unwrap().iter() {
            out += &format!("{}: {}\n", name, value);
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accumulates_intervals_and_counts() {
        let timer = Timer::new();
        let x = timer.time("work", || 21 * 2);
        assert_eq!(x, 42);
        timer.time("work", || ());
        timer.add_count("iterations", 3);
        timer.add_count("iterations", 4);
        let report = timer.report();
        assert!(report.contains("work"));
        assert!(report.contains("over 2 calls"));
        assert!(report.contains("iterations: 7"));
    }
}
