//! # Shard Partitioner
//!
//! Sorts a labeled dataset by label, carves the sorted order into fixed-size
//! shards and hands contiguous shard ranges to simulated clients.
//!
//! ```text
//!  dataset idx:   0  1  2  3  4  5  6  7 ...
//!  sorted by label → [s0: 250 idx][s1: 250 idx][s2] ... [s199]
//!  table (start, count): (1,10) (20,20) ... → client index set
//! ```
//!
//! Which ranges a client receives is pure data: a [`DistributionMode`]
//! resolves to a [`DistributionTable`], and the partitioner only walks the
//! table. Adding a mode means adding a table.
//!
//! Partitioning is fully deterministic. The label sort is stable, so equal
//! labels keep their dataset order and repeated runs yield identical sets.
//! Modes 1-3 hand every client the same ranges; shard reuse across clients
//! is only rejected when the partitioner is built with [`ShardPartitioner::strict`].

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dataset::Dataset;
use crate::error::{FedError, Result};

/// Ordered dataset indices owned by one client or test group
pub type IndexSet = Vec<usize>;

/// Default shard count for training partitions
pub const TRAIN_SHARDS: usize = 200;
/// Default shard count for the held-out test groups
pub const TEST_SHARDS: usize = 100;

const SKEW_COUNTS: [usize; 7] = [10, 20, 10, 5, 3, 1, 1];
const LOW_LABEL_STARTS: [usize; 7] = [1, 20, 40, 60, 80, 100, 120];
const HIGH_LABEL_STARTS: [usize; 7] = [180, 160, 140, 120, 100, 80, 60];
const NARROW_STARTS: [usize; 2] = [1, 2];
const NARROW_COUNTS: [usize; 2] = [1, 2];
// Dual-model start shards, in the order they pair with SKEW_COUNTS
const DUAL_CLIENT_0_STARTS: [usize; 7] = [160, 80, 100, 180, 120, 140, 60];
const DUAL_CLIENT_1_STARTS: [usize; 7] = [80, 1, 100, 20, 40, 120, 60];

const TEST_COUNTS: [usize; 7] = [5, 10, 5, 3, 2, 1, 1];
const TEST_GROUP_1_STARTS: [usize; 7] = [0, 10, 20, 30, 40, 50, 60];
const TEST_GROUP_2_STARTS: [usize; 7] = [90, 80, 70, 60, 50, 40, 30];

/// Shard geometry of one partitioning call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLayout {
    pub num_shards: usize,
    pub shard_size: usize,
}

impl ShardLayout {
    pub const fn new(num_shards: usize, shard_size: usize) -> Self {
        Self {
            num_shards,
            shard_size,
        }
    }

    /// Derive `shard_size` so that `num_shards` shards exactly cover `dataset_len`
    pub fn fit(num_shards: usize, dataset_len: usize) -> Result<Self> {
        if num_shards == 0 {
            return Err(FedError::Config("shard count must be non-zero".into()));
        }
        if dataset_len == 0 || dataset_len % num_shards != 0 {
            return Err(FedError::Config(format!(
                "{} samples cannot be split into {} equal shards",
                dataset_len, num_shards
            )));
        }
        Ok(Self::new(num_shards, dataset_len / num_shards))
    }

    /// Number of dataset items covered by all shards
    pub fn total(&self) -> usize {
        self.num_shards * self.shard_size
    }

    /// Sorted positions covered by `range`
    pub fn span(&self, range: ShardRange) -> Range<usize> {
        range.start * self.shard_size..(range.start + range.count) * self.shard_size
    }
}

/// `count` consecutive shards beginning at shard `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRange {
    pub start: usize,
    pub count: usize,
}

impl ShardRange {
    pub const fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

fn zip_ranges(starts: &[usize], counts: &[usize]) -> Vec<ShardRange> {
    starts
        .iter()
        .zip(counts)
        .map(|(&start, &count)| ShardRange::new(start, count))
        .collect()
}

/// Selects which static shard table builds the client index sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DistributionMode {
    /// Skew toward low labels
    LowLabelSkew = 1,
    /// Skew toward high labels
    HighLabelSkew = 2,
    /// Three shards near the start of the label order
    Narrow = 3,
    /// Two clients with mirrored skews; every other client is empty
    DualModel = 4,
}

impl DistributionMode {
    pub fn all() -> [DistributionMode; 4] {
        [
            DistributionMode::LowLabelSkew,
            DistributionMode::HighLabelSkew,
            DistributionMode::Narrow,
            DistributionMode::DualModel,
        ]
    }

    /// Resolve to the static assignment table
    pub fn table(self) -> DistributionTable {
        match self {
            DistributionMode::LowLabelSkew => {
                DistributionTable::shared(zip_ranges(&LOW_LABEL_STARTS, &SKEW_COUNTS))
            }
            DistributionMode::HighLabelSkew => {
                DistributionTable::shared(zip_ranges(&HIGH_LABEL_STARTS, &SKEW_COUNTS))
            }
            DistributionMode::Narrow => {
                DistributionTable::shared(zip_ranges(&NARROW_STARTS, &NARROW_COUNTS))
            }
            DistributionMode::DualModel => DistributionTable::per_client(vec![
                zip_ranges(&DUAL_CLIENT_0_STARTS, &SKEW_COUNTS),
                zip_ranges(&DUAL_CLIENT_1_STARTS, &SKEW_COUNTS),
            ]),
        }
    }
}

impl TryFrom<u8> for DistributionMode {
    type Error = FedError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DistributionMode::LowLabelSkew),
            2 => Ok(DistributionMode::HighLabelSkew),
            3 => Ok(DistributionMode::Narrow),
            4 => Ok(DistributionMode::DualModel),
            other => Err(FedError::Config(format!(
                "unrecognized data distribution mode {} (expected 1-4)",
                other
            ))),
        }
    }
}

impl From<DistributionMode> for u8 {
    fn from(mode: DistributionMode) -> u8 {
        mode as u8
    }
}

impl std::fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Assignment {
    /// Every client receives the same ranges
    Shared(Vec<ShardRange>),
    /// Client `i` receives entry `i`; clients past the end receive nothing
    PerClient(Vec<Vec<ShardRange>>),
}

/// Static `(start_shard, shard_count)` assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionTable {
    assignment: Assignment,
}

impl DistributionTable {
    pub fn shared(ranges: Vec<ShardRange>) -> Self {
        Self {
            assignment: Assignment::Shared(ranges),
        }
    }

    pub fn per_client(ranges: Vec<Vec<ShardRange>>) -> Self {
        Self {
            assignment: Assignment::PerClient(ranges),
        }
    }

    /// Ranges assigned to `client`, in concatenation order
    pub fn ranges_for(&self, client: usize) -> &[ShardRange] {
        match &self.assignment {
            Assignment::Shared(ranges) => ranges,
            Assignment::PerClient(lists) => lists.get(client).map_or(&[][..], Vec::as_slice),
        }
    }

    /// Every range must lie inside `[0, layout.num_shards)`
    pub fn validate(&self, layout: &ShardLayout) -> Result<()> {
        let all: Vec<&ShardRange> = match &self.assignment {
            Assignment::Shared(ranges) => ranges.iter().collect(),
            Assignment::PerClient(lists) => lists.iter().flatten().collect(),
        };
        for range in all {
            if range.end() > layout.num_shards {
                return Err(FedError::Config(format!(
                    "shard range {}..{} exceeds {} shards",
                    range.start,
                    range.end(),
                    layout.num_shards
                )));
            }
        }
        Ok(())
    }

    /// Total shard count handed to `client`
    pub fn shard_count(&self, client: usize) -> usize {
        self.ranges_for(client).iter().map(|r| r.count).sum()
    }
}

/// Mapping from client id (`0..num_users`) to its index set
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientIndexSets {
    sets: Vec<IndexSet>,
}

impl ClientIndexSets {
    pub fn new(sets: Vec<IndexSet>) -> Self {
        Self { sets }
    }

    pub fn get(&self, client: usize) -> Option<&[usize]> {
        self.sets.get(client).map(|s| s.as_slice())
    }

    pub fn num_clients(&self) -> usize {
        self.sets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.sets.iter().enumerate().map(|(i, s)| (i, s.as_slice()))
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.sets.iter().map(Vec::len).collect()
    }
}

/// Dataset indices `0..layout.total()` stably sorted by label
pub fn sort_by_label<D: Dataset + ?Sized>(dataset: &D, layout: &ShardLayout) -> Result<Vec<usize>> {
    if dataset.len() != layout.total() {
        return Err(FedError::Config(format!(
            "dataset has {} samples but {} shards of {} cover {}",
            dataset.len(),
            layout.num_shards,
            layout.shard_size,
            layout.total()
        )));
    }
    let labels = (0..layout.total())
        .map(|i| dataset.label(i))
        .collect::<Result<Vec<usize>>>()?;
    let mut order: Vec<usize> = (0..layout.total()).collect();
    order.sort_by_key(|&i| labels[i]);
    Ok(order)
}

/// Builds client and test-group index sets over one shard layout
#[derive(Debug, Clone, Copy)]
pub struct ShardPartitioner {
    layout: ShardLayout,
    strict: bool,
}

impl ShardPartitioner {
    pub fn new(layout: ShardLayout) -> Self {
        Self {
            layout,
            strict: false,
        }
    }

    /// Reject shards handed to more than one client in a single call
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn layout(&self) -> ShardLayout {
        self.layout
    }

    /// Client index sets for `num_users` clients under `mode`
    pub fn partition_train<D: Dataset + ?Sized>(
        &self,
        dataset: &D,
        num_users: usize,
        mode: DistributionMode,
    ) -> Result<ClientIndexSets> {
        self.partition_with_table(dataset, num_users, &mode.table())
    }

    /// Client index sets for an arbitrary table
    pub fn partition_with_table<D: Dataset + ?Sized>(
        &self,
        dataset: &D,
        num_users: usize,
        table: &DistributionTable,
    ) -> Result<ClientIndexSets> {
        table.validate(&self.layout)?;
        let sorted = sort_by_label(dataset, &self.layout)?;
        let mut owners: Vec<Option<usize>> = vec![None; self.layout.num_shards];

        let mut sets = Vec::with_capacity(num_users);
        for client in 0..num_users {
            if self.strict {
                claim_shards(&mut owners, client, table.ranges_for(client))?;
            }
            let set = self.gather(&sorted, table.ranges_for(client));
            debug!(client, samples = set.len(), "assigned shards");
            sets.push(set);
        }
        Ok(ClientIndexSets::new(sets))
    }

    /// The two held-out evaluation index sets
    pub fn partition_test<D: Dataset + ?Sized>(&self, dataset: &D) -> Result<(IndexSet, IndexSet)> {
        let group_1 = zip_ranges(&TEST_GROUP_1_STARTS, &TEST_COUNTS);
        let group_2 = zip_ranges(&TEST_GROUP_2_STARTS, &TEST_COUNTS);
        DistributionTable::per_client(vec![group_1.clone(), group_2.clone()]).validate(&self.layout)?;

        let sorted = sort_by_label(dataset, &self.layout)?;
        Ok((self.gather(&sorted, &group_1), self.gather(&sorted, &group_2)))
    }

    fn gather(&self, sorted: &[usize], ranges: &[ShardRange]) -> IndexSet {
        let capacity = ranges.iter().map(|r| r.count).sum::<usize>() * self.layout.shard_size;
        let mut set = Vec::with_capacity(capacity);
        for &range in ranges {
            set.extend_from_slice(&sorted[self.layout.span(range)]);
        }
        set
    }
}

fn claim_shards(owners: &mut [Option<usize>], client: usize, ranges: &[ShardRange]) -> Result<()> {
    for range in ranges {
        for shard in range.start..range.end() {
            match owners[shard] {
                Some(owner) if owner != client => {
                    return Err(FedError::Config(format!(
                        "shard {} assigned to both client {} and client {}",
                        shard, owner, client
                    )));
                }
                _ => owners[shard] = Some(client),
            }
        }
    }
    Ok(())
}

/// Training partition over the default 200-shard layout
pub fn partition_train<D: Dataset + ?Sized>(
    dataset: &D,
    num_users: usize,
    mode: DistributionMode,
) -> Result<ClientIndexSets> {
    let layout = ShardLayout::fit(TRAIN_SHARDS, dataset.len())?;
    ShardPartitioner::new(layout).partition_train(dataset, num_users, mode)
}

/// Test groups over the default 100-shard layout
pub fn partition_test<D: Dataset + ?Sized>(dataset: &D) -> Result<(IndexSet, IndexSet)> {
    let layout = ShardLayout::fit(TEST_SHARDS, dataset.len())?;
    ShardPartitioner::new(layout).partition_test(dataset)
}

/// Count of samples per label within `indices`
pub fn label_histogram<D: Dataset + ?Sized>(
    dataset: &D,
    indices: &[usize],
) -> Result<BTreeMap<usize, usize>> {
    let mut histogram = BTreeMap::new();
    for &i in indices {
        *histogram.entry(dataset.label(i)?).or_insert(0) += 1;
    }
    Ok(histogram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::InMemoryDataset;

    /// `n` samples with labels cycling through `classes`, feature = own index
    fn cyclic(n: usize, classes: usize) -> InMemoryDataset {
        let features = (0..n).map(|i| i as f32).collect();
        let labels = (0..n).map(|i| i % classes).collect();
        InMemoryDataset::new(features, labels, 1).unwrap()
    }

    #[test]
    fn test_sort_is_stable() {
        let ds = cyclic(12, 3);
        let order = sort_by_label(&ds, &ShardLayout::new(4, 3)).unwrap();
        assert_eq!(order, vec![0, 3, 6, 9, 1, 4, 7, 10, 2, 5, 8, 11]);
    }

    #[test]
    fn test_sizes_match_table_for_shared_modes() {
        let layout = ShardLayout::new(TRAIN_SHARDS, 2);
        let ds = cyclic(layout.total(), 10);
        let partitioner = ShardPartitioner::new(layout);

        for mode in [
            DistributionMode::LowLabelSkew,
            DistributionMode::HighLabelSkew,
            DistributionMode::Narrow,
        ] {
            let table = mode.table();
            let sets = partitioner.partition_train(&ds, 5, mode).unwrap();
            assert_eq!(sets.num_clients(), 5);
            for (client, set) in sets.iter() {
                assert_eq!(set.len(), layout.shard_size * table.shard_count(client));
            }
        }
    }

    #[test]
    fn test_dual_model_fills_two_clients_only() {
        let layout = ShardLayout::new(TRAIN_SHARDS, 1);
        let ds = cyclic(layout.total(), 10);
        let sets = ShardPartitioner::new(layout)
            .partition_train(&ds, 6, DistributionMode::DualModel)
            .unwrap();

        assert_eq!(sets.get(0).unwrap().len(), 50);
        assert_eq!(sets.get(1).unwrap().len(), 50);
        for client in 2..6 {
            assert!(sets.get(client).unwrap().is_empty());
        }
    }

    #[test]
    fn test_concatenation_follows_table_order() {
        let layout = ShardLayout::new(TRAIN_SHARDS, 1);
        // Labels equal to index: sorted order is the identity
        let ds = InMemoryDataset::new(vec![0.0; 200], (0..200).collect(), 1).unwrap();
        let sets = ShardPartitioner::new(layout)
            .partition_train(&ds, 1, DistributionMode::Narrow)
            .unwrap();
        assert_eq!(sets.get(0).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let layout = ShardLayout::new(TRAIN_SHARDS, 3);
        let ds = cyclic(layout.total(), 7);
        let p = ShardPartitioner::new(layout);
        let a = p.partition_train(&ds, 3, DistributionMode::HighLabelSkew).unwrap();
        let b = p.partition_train(&ds, 3, DistributionMode::HighLabelSkew).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        assert!(matches!(DistributionMode::try_from(0), Err(FedError::Config(_))));
        assert!(matches!(DistributionMode::try_from(5), Err(FedError::Config(_))));
        assert_eq!(DistributionMode::try_from(4).unwrap(), DistributionMode::DualModel);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let ds = cyclic(199, 10);
        let err = ShardPartitioner::new(ShardLayout::new(TRAIN_SHARDS, 1))
            .partition_train(&ds, 2, DistributionMode::LowLabelSkew)
            .unwrap_err();
        assert!(matches!(err, FedError::Config(_)));
    }

    #[test]
    fn test_table_outside_layout_rejected() {
        // Mode 1 reaches shard 121; 100 shards is too few
        let layout = ShardLayout::new(100, 1);
        let ds = cyclic(100, 10);
        let err = ShardPartitioner::new(layout)
            .partition_train(&ds, 1, DistributionMode::LowLabelSkew)
            .unwrap_err();
        assert!(matches!(err, FedError::Config(_)));
    }

    #[test]
    fn test_permissive_mode_reuses_shards() {
        let layout = ShardLayout::new(TRAIN_SHARDS, 1);
        let ds = cyclic(layout.total(), 10);
        let sets = ShardPartitioner::new(layout)
            .partition_train(&ds, 3, DistributionMode::LowLabelSkew)
            .unwrap();
        assert_eq!(sets.get(0), sets.get(2));
    }

    #[test]
    fn test_strict_mode_rejects_reuse() {
        let layout = ShardLayout::new(TRAIN_SHARDS, 1);
        let ds = cyclic(layout.total(), 10);
        let strict = ShardPartitioner::new(layout).strict(true);

        assert!(strict.partition_train(&ds, 1, DistributionMode::LowLabelSkew).is_ok());
        assert!(matches!(
            strict.partition_train(&ds, 2, DistributionMode::LowLabelSkew),
            Err(FedError::Config(_))
        ));
    }

    #[test]
    fn test_partition_test_sizes() {
        let ds = cyclic(TEST_SHARDS * 100, 10);
        let (g1, g2) = partition_test(&ds).unwrap();
        let expected = 100 * TEST_COUNTS.iter().sum::<usize>();
        assert_eq!(g1.len(), expected);
        assert_eq!(g2.len(), expected);
        assert_eq!(expected, 2700);
    }

    #[test]
    fn test_test_groups_skew_in_opposite_directions() {
        let ds = cyclic(TEST_SHARDS * 100, 10);
        let (g1, g2) = partition_test(&ds).unwrap();
        let mean = |set: &[usize]| {
            set.iter().map(|&i| ds.label(i).unwrap() as f64).sum::<f64>() / set.len() as f64
        };
        assert!(mean(&g1) < mean(&g2));
    }

    #[test]
    fn test_fit_layout() {
        assert_eq!(ShardLayout::fit(200, 50_000).unwrap(), ShardLayout::new(200, 250));
        assert_eq!(ShardLayout::fit(100, 10_000).unwrap(), ShardLayout::new(100, 100));
        assert!(ShardLayout::fit(200, 50_001).is_err());
        assert!(ShardLayout::fit(0, 10).is_err());
    }

    #[test]
    fn test_label_histogram() {
        let ds = cyclic(10, 3);
        let hist = label_histogram(&ds, &[0, 3, 1, 2]).unwrap();
        assert_eq!(hist.get(&0), Some(&2));
        assert_eq!(hist.get(&1), Some(&1));
        assert_eq!(hist.get(&2), Some(&1));
    }
}
