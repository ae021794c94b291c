use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use tracing::debug;

use super::*;

const PS: [f64; 10] = [0., 50., 75., 90., 95., 97.5, 99., 99.9, 99.99, 100.];

// the number of `#` marks that represents 100% of the values in a
// Display bar.
const BAR_WIDTH: f64 = 20.;

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicU64 = AtomicU64::new(0);

/// A fixed-bucket histogram that can be written to and read from many
/// threads at once without locking.
///
/// Every aggregate is an independent atomic. A reader racing with writers
/// may see, for instance, `count` already bumped while `sum` is not, so
/// statistics taken under concurrent inserts are approximate.
///
/// `sum` and `sum_of_squares` are 64-bit and wrap silently on overflow.
/// `sum_of_squares` is the tighter limit: with values below 2^20 it holds
/// up to about 2^24 observations of the largest value, and a single value
/// above 2^32 already wraps it.
pub struct Histogram {
    buckets: [AtomicU64; BUCKET_COUNT],
    min: CachePadded<AtomicU64>,
    max: CachePadded<AtomicU64>,
    count: CachePadded<AtomicU64>,
    sum: CachePadded<AtomicU64>,
    sum_of_squares: CachePadded<AtomicU64>,
    bucket_map: BucketMap,
}

impl Default for Histogram {
    fn default() -> Histogram {
        Histogram::new()
    }
}

impl Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.write_str("Histogram[")?;

        for p in &PS {
            let res = self.percentile(*p);
            let line = format!("({} -> {}) ", p, res);
            f.write_str(&*line)?;
        }

        f.write_str("]")
    }
}

impl Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let count = self.count();
        let min = if count == 0 { 0 } else { self.min() };

        writeln!(
            f,
            "Count: {}  Average: {:.4}  StdDev: {:.2}",
            count,
            self.average(),
            self.standard_deviation()
        )?;
        writeln!(
            f,
            "Min: {}  Median: {:.4}  Max: {}",
            min,
            self.median(),
            self.max()
        )?;
        writeln!(f, "{}", "-".repeat(54))?;

        if count == 0 {
            return Ok(());
        }

        let mult = 100. / count as f64;
        let mut cumulative = 0;
        for index in 0..BUCKET_COUNT {
            let bucket = self.bucket_count_at(index);
            if bucket == 0 {
                continue;
            }
            cumulative += bucket;

            let marks = (BAR_WIDTH * bucket as f64 / count as f64 + 0.5) as usize;
            // every bucket but the first excludes its lower edge
            let open = if index == 0 { '[' } else { '(' };
            writeln!(
                f,
                "{} {:>7}, {:>7} ] {:>7} {:7.3}% {:7.3}% {}",
                open,
                self.bucket_map.lower_edge(index),
                self.bucket_map.bound(index),
                bucket,
                mult * bucket as f64,
                mult * cumulative as f64,
                "#".repeat(marks)
            )?;
        }

        Ok(())
    }
}

impl Histogram {
    /// Create an empty histogram, building its bucket map.
    pub fn new() -> Histogram {
        Histogram {
            buckets: [ZERO; BUCKET_COUNT],
            min: CachePadded::new(AtomicU64::new(u64::MAX)),
            max: CachePadded::new(AtomicU64::new(0)),
            count: CachePadded::new(AtomicU64::new(0)),
            sum: CachePadded::new(AtomicU64::new(0)),
            sum_of_squares: CachePadded::new(AtomicU64::new(0)),
            bucket_map: BucketMap::new(),
        }
    }

    /// Return to the freshly created state. Takes `&mut self`, so no
    /// insert or read can overlap it.
    pub fn reset(&mut self) {
        debug!(count = self.count(), "resetting histogram");
        *self = Histogram::new();
    }

    /// Record a value.
    #[inline]
    pub fn insert(&self, value: u64) {
        if cfg!(feature = "bypass") {
            return;
        }

        let index = self.bucket_map.index_of(value);
        self.buckets[index].fetch_add(1, Ordering::Relaxed);

        let mut current = self.min.load(Ordering::Relaxed);
        while value < current {
            match self.min.compare_exchange_weak(
                current,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut current = self.max.load(Ordering::Relaxed);
        while value > current {
            match self.max.compare_exchange_weak(
                current,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.sum_of_squares
            .fetch_add(value.wrapping_mul(value), Ordering::Relaxed);
    }

    /// The smallest recorded value, or `u64::MAX` before the first insert.
    pub fn min(&self) -> u64 {
        self.min.load(Ordering::Relaxed)
    }

    /// The largest recorded value, or 0 before the first insert.
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn sum_of_squares(&self) -> u64 {
        self.sum_of_squares.load(Ordering::Relaxed)
    }

    /// The number of values recorded in bucket `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= BUCKET_COUNT`.
    pub fn bucket_count_at(&self, index: usize) -> u64 {
        assert!(
            index < BUCKET_COUNT,
            "bucket index {} out of range for {} buckets",
            index,
            BUCKET_COUNT
        );
        self.buckets[index].load(Ordering::Relaxed)
    }

    /// The upper bound of bucket `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= BUCKET_COUNT`.
    pub fn bucket_upper_bound_at(&self, index: usize) -> u64 {
        self.bucket_map.bound(index)
    }

    pub fn num_buckets(&self) -> usize {
        BUCKET_COUNT
    }

    pub fn bucket_map(&self) -> &BucketMap {
        &self.bucket_map
    }

    /// The mean of all recorded values, or 0 when empty.
    pub fn average(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.;
        }
        self.sum() as f64 / count as f64
    }

    /// The population standard deviation, or 0 when empty.
    pub fn standard_deviation(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.;
        }
        let count = count as f64;
        let sum = self.sum() as f64;
        let sum_of_squares = self.sum_of_squares() as f64;

        let variance = (sum_of_squares * count - sum * sum) / (count * count);
        if variance <= 0. {
            0.
        } else {
            variance.sqrt()
        }
    }

    /// Estimate the value at percentile `p`, interpolating linearly within
    /// the bucket that holds it and clamping into the observed `[min, max]`.
    /// `p` is clamped into `[0, 100]`.
    pub fn percentile(&self, p: f64) -> f64 {
        let p = if p.is_nan() { 0. } else { p.max(0.).min(100.) };

        let threshold = self.count() as f64 * (p / 100.);
        let mut total = 0.;

        for index in 0..BUCKET_COUNT {
            let bucket = self.bucket_count_at(index) as f64;
            let before = total;
            total += bucket;

            if total >= threshold {
                let left = self.bucket_map.lower_edge(index) as f64;
                let right = self.bucket_map.bound(index) as f64;
                let pos = if bucket == 0. {
                    0.
                } else {
                    (threshold - before) / bucket
                };

                // min is raised first so that an empty histogram, whose
                // sentinels have min > max, still reports max.
                let mut r = left + pos * (right - left);
                let min = self.min() as f64;
                let max = self.max() as f64;
                if r < min {
                    r = min;
                }
                if r > max {
                    r = max;
                }
                return r;
            }
        }

        self.max() as f64
    }

    /// Shorthand for `percentile(50.)`.
    pub fn median(&self) -> f64 {
        self.percentile(50.)
    }

    /// Dump out some common percentiles.
    pub fn print_percentiles(&self) {
        println!("{:?}", self);
    }
}

#[test]
fn it_works() {
    let h = Histogram::new();
    h.insert(2);
    h.insert(2);
    h.insert(3);
    h.insert(3);
    h.insert(4);
    assert_eq!(h.count(), 5);
    assert_eq!(h.sum(), 14);
    assert_eq!(h.sum_of_squares(), 42);
    assert_eq!(h.min(), 2);
    assert_eq!(h.max(), 4);
    assert_eq!(h.bucket_count_at(1), 2);
    assert_eq!(h.bucket_count_at(2), 2);
    assert_eq!(h.bucket_count_at(3), 1);
    assert_eq!(h.percentile(0.), 2.);
    assert_eq!(h.percentile(100.), 4.);
    h.print_percentiles();
}

#[test]
fn empty() {
    let h = Histogram::default();
    assert_eq!(h.count(), 0);
    assert_eq!(h.min(), u64::MAX);
    assert_eq!(h.max(), 0);
    assert_eq!(h.average(), 0.);
    assert_eq!(h.standard_deviation(), 0.);
    assert_eq!(h.percentile(0.), 0.);
    assert_eq!(h.median(), 0.);
    assert_eq!(h.percentile(100.), 0.);
}

#[test]
fn single_value() {
    let h = Histogram::new();
    h.insert(1234);
    assert_eq!(h.count(), 1);
    assert_eq!(h.min(), 1234);
    assert_eq!(h.max(), 1234);
    assert_eq!(h.sum(), 1234);
    assert_eq!(h.sum_of_squares(), 1234 * 1234);
    assert_eq!(h.average(), 1234.);
    assert_eq!(h.standard_deviation(), 0.);
    for p in &[0., 0.1, 25., 50., 99.99, 100.] {
        assert_eq!(h.percentile(*p), 1234.);
    }
}

#[test]
fn count_matches_buckets() {
    let h = Histogram::new();
    for v in 0..5000_u64 {
        h.insert(v * 7919 % 100_003);
    }
    let total: u64 = (0..h.num_buckets()).map(|i| h.bucket_count_at(i)).sum();
    assert_eq!(total, h.count());
    assert_eq!(total, 5000);
}

#[test]
fn classification_on_insert() {
    let h = Histogram::new();
    let bound = h.bucket_upper_bound_at(20);
    h.insert(bound);
    assert_eq!(h.bucket_count_at(20), 1);
    h.insert(bound + 1);
    assert_eq!(h.bucket_count_at(21), 1);
}

#[test]
fn overflow_bucket() {
    let h = Histogram::new();
    let last = BUCKET_COUNT - 1;
    h.insert(u64::MAX);
    h.insert(h.bucket_upper_bound_at(last) + 1);
    assert_eq!(h.bucket_count_at(last), 2);
    assert_eq!(h.max(), u64::MAX);
    assert!(h.percentile(100.) <= h.bucket_upper_bound_at(last) as f64);
}

#[test]
fn standard_deviation() {
    let h = Histogram::new();
    for v in &[2_u64, 4, 4, 4, 5, 5, 7, 9] {
        h.insert(*v);
    }
    assert_eq!(h.average(), 5.);
    assert_eq!(h.standard_deviation(), 2.);

    let flat = Histogram::new();
    for _ in 0..1000 {
        flat.insert(3_000_000);
    }
    assert_eq!(flat.standard_deviation(), 0.);
}

#[test]
fn percentiles_are_monotonic() {
    let h = Histogram::new();
    for v in 0..100_000_u64 {
        h.insert(v * 3);
    }
    let mut last = h.percentile(0.);
    for step in 1..=1000 {
        let p = step as f64 / 10.;
        let current = h.percentile(p);
        assert!(last <= current, "p{} went from {} to {}", p, last, current);
        last = current;
    }
    assert_eq!(last, h.max() as f64);
}

#[test]
fn percentile_argument_is_clamped() {
    let h = Histogram::new();
    for v in 10..20_u64 {
        h.insert(v);
    }
    assert_eq!(h.percentile(-5.), h.percentile(0.));
    assert_eq!(h.percentile(250.), h.percentile(100.));
    assert_eq!(h.percentile(f64::NAN), h.percentile(0.));
}

#[test]
fn ten_million() {
    let h = Histogram::new();
    for v in 0..10_000_000_u64 {
        h.insert(v);
    }
    assert_eq!(h.count(), 10_000_000);
    assert_eq!(h.min(), 0);
    assert_eq!(h.max(), 9_999_999);
    assert!((h.average() - 4_999_999.5).abs() < 1e-6);

    let median = h.median();
    assert!((median - 5_000_000.).abs() <= 2., "median {}", median);
    let index = h.bucket_map().index_of(5_000_000);
    assert!(median > h.bucket_map().lower_edge(index) as f64);
    assert!(median <= h.bucket_upper_bound_at(index) as f64);

    assert_eq!(h.percentile(100.), 9_999_999.);
}

#[test]
fn reset_matches_fresh() {
    let values = [5_u64, 900, 17, 65_000, 3, 3, 1_000_000];

    let mut reused = Histogram::new();
    for v in 0..1000_u64 {
        reused.insert(v * 31);
    }
    reused.reset();
    assert_eq!(reused.count(), 0);
    assert_eq!(reused.min(), u64::MAX);
    assert_eq!(reused.max(), 0);

    let fresh = Histogram::new();
    for v in &values {
        reused.insert(*v);
        fresh.insert(*v);
    }

    assert_eq!(reused.count(), fresh.count());
    assert_eq!(reused.sum(), fresh.sum());
    assert_eq!(reused.sum_of_squares(), fresh.sum_of_squares());
    assert_eq!(reused.min(), fresh.min());
    assert_eq!(reused.max(), fresh.max());
    assert_eq!(reused.average(), fresh.average());
    assert_eq!(reused.standard_deviation(), fresh.standard_deviation());
    for p in &PS {
        assert_eq!(reused.percentile(*p), fresh.percentile(*p));
    }
    for i in 0..BUCKET_COUNT {
        assert_eq!(reused.bucket_count_at(i), fresh.bucket_count_at(i));
    }
}

#[test]
fn concurrent_inserts() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 100_000;

    let h = Histogram::new();
    crossbeam_utils::thread::scope(|s| {
        for t in 0..THREADS {
            let h = &h;
            s.spawn(move |_| {
                for v in t * PER_THREAD..(t + 1) * PER_THREAD {
                    h.insert(v);
                }
            });
        }
        s.spawn(|_| {
            for _ in 0..100 {
                let _ = h.median();
                let _ = h.standard_deviation();
            }
        });
    })
    .unwrap();

    let n = THREADS * PER_THREAD;
    assert_eq!(h.count(), n);
    assert_eq!(h.sum(), n * (n - 1) / 2);
    assert_eq!(h.min(), 0);
    assert_eq!(h.max(), n - 1);
    let total: u64 = (0..BUCKET_COUNT).map(|i| h.bucket_count_at(i)).sum();
    assert_eq!(total, n);
}

#[test]
#[should_panic]
fn upper_bound_out_of_range() {
    Histogram::new().bucket_upper_bound_at(BUCKET_COUNT);
}

#[test]
#[should_panic]
fn bucket_count_out_of_range() {
    Histogram::new().bucket_count_at(BUCKET_COUNT);
}

#[test]
fn display_rows_contain_their_bounds() {
    let h = Histogram::new();
    h.insert(2);
    assert_eq!(h.bucket_map().index_of(2), 1);
    assert_eq!(
        h.to_string().lines().nth(3),
        Some("(       1,       2 ]       1 100.000% 100.000% ####################")
    );
}

#[test]
fn display_report() {
    let h = Histogram::new();
    for v in &[1_u64, 1, 2, 5] {
        h.insert(*v);
    }
    let report = h.to_string();
    let mut lines = report.lines();
    assert_eq!(
        lines.next(),
        Some("Count: 4  Average: 2.2500  StdDev: 1.64")
    );
    assert!(lines.next().unwrap().starts_with("Min: 1  Median: "));
    assert_eq!(lines.next(), Some(&*"-".repeat(54)));
    assert_eq!(
        lines.next(),
        Some("[       0,       1 ]       2  50.000%  50.000% ##########")
    );
    assert_eq!(
        lines.next(),
        Some("(       1,       2 ]       1  25.000%  75.000% #####")
    );
    assert_eq!(
        lines.next(),
        Some("(       4,       6 ]       1  25.000% 100.000% #####")
    );
    assert_eq!(lines.next(), None);

    let debug = format!("{:?}", h);
    assert!(debug.starts_with("Histogram[(0 -> 1) "));
    assert!(debug.ends_with("(100 -> 5) ]"));
}
