//! The immutable table of bucket upper bounds shared by every histogram.
//!
//! Bounds start at 1 and 2, then grow by a factor of 1.5 per step. Every
//! generated bound is truncated to its two leading decimal digits, so the
//! table reads like `..., 870, 1300, 1900, 2900, ...` and stays within a
//! bounded relative error across the whole `u64` range.
use std::fmt::{self, Debug};

use tracing::{trace, warn};

/// The number of buckets (and bounds) in every histogram.
pub const BUCKET_COUNT: usize = 109;

const SEEDS: [u64; 2] = [1, 2];
const GROWTH: f64 = 1.5;

/// A strictly increasing table of `BUCKET_COUNT` bucket upper bounds.
#[derive(Clone, PartialEq, Eq)]
pub struct BucketMap {
    bounds: [u64; BUCKET_COUNT],
    min_bound: u64,
    max_bound: u64,
}

impl Default for BucketMap {
    fn default() -> BucketMap {
        BucketMap::new()
    }
}

impl Debug for BucketMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("BucketMap")
            .field("len", &BUCKET_COUNT)
            .field("min_bound", &self.min_bound)
            .field("max_bound", &self.max_bound)
            .finish()
    }
}

impl BucketMap {
    /// Build the bound table. Deterministic: every call yields the same
    /// table.
    pub fn new() -> BucketMap {
        let mut bounds = [0_u64; BUCKET_COUNT];
        let generated = fill_bounds(&mut bounds);
        if generated < BUCKET_COUNT {
            warn!(
                generated,
                expected = BUCKET_COUNT,
                "bucket bounds exhausted the u64 range early, padding with u64::MAX"
            );
        }

        let map = BucketMap {
            bounds,
            min_bound: bounds[0],
            max_bound: bounds[BUCKET_COUNT - 1],
        };
        trace!(
            buckets = BUCKET_COUNT,
            max_bound = map.max_bound,
            "built bucket map"
        );
        map
    }

    /// Index of the smallest bound that is `>= value`. Values beyond
    /// `max_bound` land in the last (overflow) bucket.
    #[inline]
    pub fn index_of(&self, value: u64) -> usize {
        if value > self.max_bound {
            return BUCKET_COUNT - 1;
        }
        self.bounds.partition_point(|&bound| bound < value)
    }

    /// The upper bound of bucket `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= BUCKET_COUNT`.
    #[inline]
    pub fn bound(&self, index: usize) -> u64 {
        assert!(
            index < BUCKET_COUNT,
            "bucket index {} out of range for {} buckets",
            index,
            BUCKET_COUNT
        );
        self.bounds[index]
    }

    /// The exclusive lower edge of bucket `index`: the previous bucket's
    /// upper bound, or 0 for the first bucket.
    #[inline]
    pub fn lower_edge(&self, index: usize) -> u64 {
        if index == 0 {
            0
        } else {
            self.bound(index - 1)
        }
    }

    /// All bounds, in increasing order.
    pub fn bounds(&self) -> &[u64] {
        &self.bounds
    }

    /// The first (smallest) bound.
    pub fn min_bound(&self) -> u64 {
        self.min_bound
    }

    /// The last (largest) bound.
    pub fn max_bound(&self) -> u64 {
        self.max_bound
    }

    /// Always `BUCKET_COUNT`.
    pub fn len(&self) -> usize {
        BUCKET_COUNT
    }

    /// Always false: a map holds `BUCKET_COUNT` bounds.
    pub fn is_empty(&self) -> bool {
        false
    }
}

// fills `bounds` with the growth sequence and returns how many slots the
// sequence produced before passing 2^64. Any slots left over are set to
// u64::MAX; this fallback never runs for BUCKET_COUNT and leaves the tail
// of the table equal rather than strictly increasing.
fn fill_bounds(bounds: &mut [u64]) -> usize {
    let mut len = 0;
    let mut next = 0.;
    for &seed in SEEDS.iter().take(bounds.len()) {
        bounds[len] = seed;
        next = seed as f64;
        len += 1;
    }
    while len < bounds.len() {
        next *= GROWTH;
        // u64::MAX rounds up to 2^64 as an f64, so anything past it
        // can no longer be represented.
        if next > u64::MAX as f64 {
            break;
        }
        bounds[len] = two_significant_digits(next as u64);
        len += 1;
    }

    let generated = len;
    for bound in &mut bounds[generated..] {
        *bound = u64::MAX;
    }
    generated
}

// keeps the leading two decimal digits of a value, zeroing the rest,
// so 172 becomes 170 and 1_234_567 becomes 1_200_000.
fn two_significant_digits(mut value: u64) -> u64 {
    let mut pow_of_ten = 1;
    while value / 10 > 10 {
        value /= 10;
        pow_of_ten *= 10;
    }
    value * pow_of_ten
}

#[test]
fn test_two_significant_digits() {
    assert_eq!(two_significant_digits(7), 7);
    assert_eq!(two_significant_digits(76), 76);
    assert_eq!(two_significant_digits(110), 110);
    assert_eq!(two_significant_digits(115), 110);
    assert_eq!(two_significant_digits(172), 170);
    assert_eq!(two_significant_digits(1_234_567), 1_200_000);
}

#[test]
fn bounds_are_strictly_increasing() {
    let map = BucketMap::new();
    for pair in map.bounds().windows(2) {
        assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
    }
    assert_eq!(map.min_bound(), 1);
    assert_eq!(map.max_bound(), map.bound(BUCKET_COUNT - 1));
    assert_eq!(map.max_bound(), *map.bounds().iter().max().unwrap());
}

#[test]
fn sequence_fills_every_slot() {
    // the growth sequence runs out of u64 exactly at BUCKET_COUNT, so no
    // padding is ever applied.
    let map = BucketMap::new();
    assert_eq!(map.max_bound(), 13_000_000_000_000_000_000);
    assert!(map.bound(BUCKET_COUNT - 2) < u64::MAX);
    assert_eq!(
        &map.bounds()[..16],
        &[1_u64, 2, 3, 4, 6, 10, 15, 22, 34, 51, 76, 110, 170, 250, 380, 580]
    );
}

#[test]
fn short_sequence_is_padded() {
    let mut bounds = [0_u64; BUCKET_COUNT + 3];
    assert_eq!(fill_bounds(&mut bounds), BUCKET_COUNT);
    assert_eq!(&bounds[..BUCKET_COUNT], BucketMap::new().bounds());
    assert_eq!(&bounds[BUCKET_COUNT..], &[u64::MAX; 3]);

    let mut bounds = [0_u64; 5];
    assert_eq!(fill_bounds(&mut bounds), 5);
    assert_eq!(bounds, [1_u64, 2, 3, 4, 6]);
}

#[test]
fn construction_is_deterministic() {
    assert_eq!(BucketMap::new(), BucketMap::default());
}

#[test]
fn classification() {
    let map = BucketMap::new();
    assert_eq!(map.index_of(0), 0);
    for (i, &bound) in map.bounds().iter().enumerate() {
        assert_eq!(map.index_of(bound), i);
        let next = if i == BUCKET_COUNT - 1 { i } else { i + 1 };
        assert_eq!(map.index_of(bound + 1), next);
    }
    assert_eq!(map.index_of(u64::MAX), BUCKET_COUNT - 1);
}

#[test]
fn lower_edges() {
    let map = BucketMap::new();
    assert_eq!(map.lower_edge(0), 0);
    assert_eq!(map.lower_edge(1), 1);
    assert_eq!(map.lower_edge(12), 110);
}

#[test]
#[should_panic]
fn bound_out_of_range() {
    BucketMap::new().bound(BUCKET_COUNT);
}
