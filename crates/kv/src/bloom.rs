//! Probabilistic existence hints with live compaction swap.
//!
//! Each partition carries at most two bloom filters: `main` serves reads,
//! `temp` is populated by an in-progress compaction and promoted once the
//! compaction completes. While both exist, every key insertion lands in
//! both so the promoted filter is complete.
//!
//! The per-filter sizing uses the standard formulas for `m` bits and `k`
//! hash functions from `(key_count, false_positive_prob)`, with double
//! hashing h_i(x) = h1(x) + i * h2(x) mod m derived from two independent
//! FNV-1a style seeds.

use driftkv_types::key::DocKey;

/// Lifecycle state of one bloom filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// The filter answers `true` to every query (never blocks a lookup).
    Disabled,
    /// The filter serves queries normally.
    Enabled,
    /// The filter is being rebuilt by compaction.
    Compacting,
}

impl FilterStatus {
    /// Human-readable status, as reported in stats.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterStatus::Disabled => "DISABLED",
            FilterStatus::Enabled => "ENABLED",
            FilterStatus::Compacting => "COMPACTING",
        }
    }
}

/// A sized bloom filter.
///
/// A negative answer is authoritative; a positive answer may be a false
/// positive at roughly the configured probability.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: usize,
    key_count: usize,
    status: FilterStatus,
}

impl BloomFilter {
    /// Creates a filter sized for `key_count` keys at the given false
    /// positive probability.
    pub fn new(key_count: usize, false_positive_prob: f64, status: FilterStatus) -> Self {
        let n = key_count.max(1) as f64;
        let p = false_positive_prob.clamp(1e-9, 0.999_999);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-(n * p.ln()) / (ln2 * ln2)).ceil() as usize).max(8);
        let num_hashes = (((num_bits as f64 / n) * ln2).round() as usize).max(1);
        Self {
            bits: vec![0u8; num_bits.div_ceil(8)],
            num_bits,
            num_hashes,
            key_count: 0,
            status,
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> FilterStatus {
        self.status
    }

    /// Changes the lifecycle state.
    pub fn set_status(&mut self, status: FilterStatus) {
        self.status = status;
    }

    /// Size of the bit array in bytes.
    pub fn filter_size(&self) -> usize {
        self.bits.len()
    }

    /// Number of keys added since creation.
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Adds a key to the filter.
    pub fn add_key(&mut self, key: &DocKey) {
        let (h1, h2) = hash_pair(key.data());
        for i in 0..self.num_hashes {
            let bit = bit_index(h1, h2, i, self.num_bits);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
        self.key_count += 1;
    }

    /// Tests whether a key might be in the set.
    ///
    /// A disabled filter never blocks a lookup and answers `true`.
    pub fn maybe_key_exists(&self, key: &DocKey) -> bool {
        if self.status == FilterStatus::Disabled {
            return true;
        }
        let (h1, h2) = hash_pair(key.data());
        for i in 0..self.num_hashes {
            let bit = bit_index(h1, h2, i, self.num_bits);
            if self.bits[bit / 8] & (1 << (bit % 8)) == 0 {
                return false;
            }
        }
        true
    }
}

/// Computes a double-hash pair from a key using FNV-1a style mixing with
/// two independent offset bases.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let mut h1: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in key {
        h1 ^= u64::from(b);
        h1 = h1.wrapping_mul(0x0100_0000_01b3);
    }

    let mut h2: u64 = 0x6c62_272e_07bb_0142;
    for &b in key {
        h2 ^= u64::from(b);
        h2 = h2.wrapping_mul(0x0100_0000_01b3);
    }

    (h1, h2)
}

/// Bit index of the i-th hash function via double hashing.
fn bit_index(h1: u64, h2: u64, i: usize, num_bits: usize) -> usize {
    (h1.wrapping_add((i as u64).wrapping_mul(h2)) % (num_bits as u64)) as usize
}

/// The main/temp filter pair of one partition.
///
/// All pair operations run under the partition's single filter mutex;
/// critical sections are short.
#[derive(Debug, Default)]
pub struct FilterPair {
    main: Option<BloomFilter>,
    temp: Option<BloomFilter>,
}

impl FilterPair {
    /// Creates an empty pair (no filters yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the main filter if neither filter exists yet.
    ///
    /// Returns false when a filter is already present (bucket creation
    /// and rebalance are the only expected callers).
    pub fn create(&mut self, key_count: usize, false_positive_prob: f64) -> bool {
        if self.main.is_some() || self.temp.is_some() {
            return false;
        }
        self.main = Some(BloomFilter::new(key_count, false_positive_prob, FilterStatus::Enabled));
        true
    }

    /// Begins a compaction rebuild: creates the temp filter in
    /// `Compacting` state and marks the main filter compacting too.
    pub fn init_temp(&mut self, key_count: usize, false_positive_prob: f64) {
        self.temp =
            Some(BloomFilter::new(key_count, false_positive_prob, FilterStatus::Compacting));
        if let Some(main) = self.main.as_mut() {
            main.set_status(FilterStatus::Compacting);
        }
    }

    /// Adds a key to the main filter, and to the temp filter while a
    /// compaction is rebuilding it.
    pub fn add_key(&mut self, key: &DocKey) {
        if let Some(main) = self.main.as_mut() {
            main.add_key(key);
        }
        if let Some(temp) = self.temp.as_mut() {
            temp.add_key(key);
        }
    }

    /// Adds a key only to the temp filter (compaction visitor).
    pub fn add_key_to_temp(&mut self, key: &DocKey) {
        if let Some(temp) = self.temp.as_mut() {
            temp.add_key(key);
        }
    }

    /// Queries the main filter.
    ///
    /// With no filter present every lookup is allowed through.
    pub fn maybe_key_exists(&self, key: &DocKey) -> bool {
        match self.main.as_ref() {
            Some(main) => main.maybe_key_exists(key),
            None => true,
        }
    }

    /// True when the temp filter exists and is usable for promotion.
    pub fn temp_available(&self) -> bool {
        matches!(
            self.temp.as_ref().map(BloomFilter::status),
            Some(FilterStatus::Compacting) | Some(FilterStatus::Enabled)
        )
    }

    /// Promotes the temp filter to main if it survived compaction.
    ///
    /// A temp filter that was disabled mid-compaction is discarded; the
    /// next compaction will build a fresh one.
    pub fn swap(&mut self) {
        match self.temp.take() {
            Some(mut promoted)
                if matches!(
                    promoted.status(),
                    FilterStatus::Compacting | FilterStatus::Enabled
                ) =>
            {
                promoted.set_status(FilterStatus::Enabled);
                self.main = Some(promoted);
            }
            _ => {}
        }
    }

    /// Drops both filters.
    pub fn clear(&mut self) {
        self.main = None;
        self.temp = None;
    }

    /// Applies a status to both filters.
    pub fn set_status(&mut self, status: FilterStatus) {
        if let Some(main) = self.main.as_mut() {
            main.set_status(status);
        }
        if let Some(temp) = self.temp.as_mut() {
            temp.set_status(status);
        }
    }

    /// Status string of the pair, preferring the main filter.
    pub fn status_string(&self) -> &'static str {
        match (&self.main, &self.temp) {
            (Some(main), _) => main.status().as_str(),
            (None, Some(temp)) => temp.status().as_str(),
            (None, None) => "DOESN'T EXIST",
        }
    }

    /// Bit-array size of the main filter, zero when absent.
    pub fn filter_size(&self) -> usize {
        self.main.as_ref().map(BloomFilter::filter_size).unwrap_or(0)
    }

    /// Keys added to the main filter, zero when absent.
    pub fn key_count(&self) -> usize {
        self.main.as_ref().map(BloomFilter::key_count).unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn key(k: &str) -> DocKey {
        DocKey::default_collection(k.as_bytes().to_vec())
    }

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(200, 0.01, FilterStatus::Enabled);
        let keys: Vec<DocKey> = (0..200).map(|i| key(&format!("key_{i}"))).collect();
        for k in &keys {
            filter.add_key(k);
        }
        for k in &keys {
            assert!(filter.maybe_key_exists(k), "inserted key must always be found");
        }
    }

    #[test]
    fn test_false_positive_rate_roughly_honoured() {
        let mut filter = BloomFilter::new(100, 0.01, FilterStatus::Enabled);
        for i in 0..100 {
            filter.add_key(&key(&format!("present_{i}")));
        }
        let mut false_positives = 0u32;
        let probes = 10_000u32;
        for i in 0..probes {
            if filter.maybe_key_exists(&key(&format!("absent_{i}"))) {
                false_positives += 1;
            }
        }
        let fpr = f64::from(false_positives) / f64::from(probes);
        assert!(fpr < 0.03, "false positive rate {fpr:.4} too far above target");
    }

    #[test]
    fn test_disabled_filter_answers_true() {
        let filter = BloomFilter::new(100, 0.01, FilterStatus::Disabled);
        assert!(filter.maybe_key_exists(&key("never-added")));
    }

    #[test]
    fn test_create_refuses_second_filter() {
        let mut pair = FilterPair::new();
        assert!(pair.create(100, 0.01));
        assert!(!pair.create(100, 0.01));
    }

    #[test]
    fn test_missing_filter_allows_lookup() {
        let pair = FilterPair::new();
        assert!(pair.maybe_key_exists(&key("anything")));
    }

    #[test]
    fn test_init_temp_marks_main_compacting() {
        let mut pair = FilterPair::new();
        pair.create(100, 0.01);
        pair.init_temp(100, 0.01);
        assert!(pair.temp_available());
        assert_eq!(pair.status_string(), "COMPACTING");
    }

    #[test]
    fn test_insertions_reach_both_filters_during_compaction() {
        let mut pair = FilterPair::new();
        pair.create(100, 0.01);
        pair.init_temp(100, 0.01);
        pair.add_key(&key("live-write"));
        pair.swap();
        // After promotion the temp filter (now main) must know the key.
        assert!(pair.maybe_key_exists(&key("live-write")));
        assert_eq!(pair.key_count(), 1);
    }

    #[test]
    fn test_swap_promotes_compacting_temp() {
        let mut pair = FilterPair::new();
        pair.create(100, 0.01);
        pair.init_temp(100, 0.01);
        pair.add_key_to_temp(&key("from-disk"));
        pair.swap();
        assert_eq!(pair.status_string(), "ENABLED");
        assert!(pair.maybe_key_exists(&key("from-disk")));
        assert!(!pair.temp_available());
    }

    #[test]
    fn test_swap_discards_disabled_temp() {
        let mut pair = FilterPair::new();
        pair.create(100, 0.01);
        pair.init_temp(100, 0.01);
        pair.set_status(FilterStatus::Disabled);
        pair.swap();
        // Temp was dropped; main is still the original (disabled) filter.
        assert!(!pair.temp_available());
        assert_eq!(pair.status_string(), "DISABLED");
    }

    #[test]
    fn test_clear_drops_both() {
        let mut pair = FilterPair::new();
        pair.create(100, 0.01);
        pair.init_temp(100, 0.01);
        pair.clear();
        assert_eq!(pair.status_string(), "DOESN'T EXIST");
        assert_eq!(pair.filter_size(), 0);
        assert_eq!(pair.key_count(), 0);
    }
}
