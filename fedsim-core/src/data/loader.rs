//! # Loader Factory
//!
//! Batched iteration over whole datasets or partitioned views. Loaders built
//! by the factory always use batches of [`LOADER_BATCH_SIZE`] in dataset
//! order; only the local trainer asks for its own batch size and order.

use super::dataset::{Dataset, Sample};
use super::partition::{ClientIndexSets, DistributionMode, ShardLayout, ShardPartitioner};
use super::view::DatasetView;
use crate::config::RunConfig;
use crate::error::{FedError, Result};

/// Batch size of every factory-built loader
pub const LOADER_BATCH_SIZE: usize = 64;

/// Consecutive samples borrowed from a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<'a> {
    pub samples: Vec<Sample<'a>>,
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Iterator over batches of a dataset, visiting positions in `order`
pub struct Batches<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'a, D: Dataset + ?Sized> Batches<'a, D> {
    /// Sequential batches: positions `0..len`
    pub fn sequential(dataset: &'a D, batch_size: usize) -> Self {
        Self::with_order(dataset, (0..dataset.len()).collect(), batch_size)
    }

    /// Batches following an explicit position order (e.g. a shuffle)
    pub fn with_order(dataset: &'a D, order: Vec<usize>, batch_size: usize) -> Self {
        Self {
            dataset,
            order,
            batch_size: batch_size.max(1),
            cursor: 0,
        }
    }
}

impl<'a, D: Dataset + ?Sized> Iterator for Batches<'a, D> {
    type Item = Result<Batch<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let positions = &self.order[self.cursor..end];
        self.cursor = end;

        let dataset = self.dataset;
        let samples = positions
            .iter()
            .map(|&p| dataset.item(p))
            .collect::<Result<Vec<_>>>();
        Some(samples.map(|samples| Batch { samples }))
    }
}

/// What a loader iterates: a whole dataset or one index-set view of it
#[derive(Debug, Clone)]
pub enum LoaderSource<'a, D: Dataset + ?Sized> {
    Full(&'a D),
    Split(DatasetView<'a, D>),
}

impl<D: Dataset + ?Sized> Dataset for LoaderSource<'_, D> {
    fn len(&self) -> usize {
        match self {
            LoaderSource::Full(d) => d.len(),
            LoaderSource::Split(v) => v.len(),
        }
    }

    fn item(&self, index: usize) -> Result<Sample<'_>> {
        match self {
            LoaderSource::Full(d) => d.item(index),
            LoaderSource::Split(v) => v.item(index),
        }
    }

    fn feature_dim(&self) -> usize {
        match self {
            LoaderSource::Full(d) => d.feature_dim(),
            LoaderSource::Split(v) => v.feature_dim(),
        }
    }

    fn label(&self, index: usize) -> Result<usize> {
        match self {
            LoaderSource::Full(d) => d.label(index),
            LoaderSource::Split(v) => v.label(index),
        }
    }
}

/// Fixed-batch, unshuffled loader
#[derive(Debug, Clone)]
pub struct DataLoader<'a, D: Dataset + ?Sized> {
    source: LoaderSource<'a, D>,
    batch_size: usize,
}

impl<'a, D: Dataset + ?Sized> DataLoader<'a, D> {
    pub fn new(source: LoaderSource<'a, D>) -> Self {
        Self {
            source,
            batch_size: LOADER_BATCH_SIZE,
        }
    }

    pub fn source(&self) -> &LoaderSource<'a, D> {
        &self.source
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of samples behind the loader
    pub fn num_samples(&self) -> usize {
        self.source.len()
    }

    pub fn num_batches(&self) -> usize {
        self.num_samples().div_ceil(self.batch_size)
    }

    pub fn iter(&self) -> Batches<'_, LoaderSource<'a, D>> {
        Batches::sequential(&self.source, self.batch_size)
    }
}

/// Builds train/test loaders from the run configuration
#[derive(Debug, Clone)]
pub struct LoaderFactory {
    iid: bool,
    num_users: usize,
    which_user: usize,
    mode: DistributionMode,
    train_shards: usize,
    test_shards: usize,
    strict: bool,
}

impl LoaderFactory {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Ok(Self {
            iid: config.iid,
            num_users: config.num_users,
            which_user: config.which_user,
            mode: config.distribution_mode()?,
            train_shards: config.train_shards,
            test_shards: config.test_shards,
            strict: config.strict_shards,
        })
    }

    /// Partitioner over the training set's shard layout
    pub fn train_partitioner(&self, dataset_len: usize) -> Result<ShardPartitioner> {
        let layout = ShardLayout::fit(self.train_shards, dataset_len)?;
        Ok(ShardPartitioner::new(layout).strict(self.strict))
    }

    /// Client index sets for the training set
    pub fn client_sets<D: Dataset + ?Sized>(&self, dataset: &D) -> Result<ClientIndexSets> {
        self.train_partitioner(dataset.len())?
            .partition_train(dataset, self.num_users, self.mode)
    }

    /// Data a client trains on.
    ///
    /// Under IID the client partition is ignored and the whole dataset is
    /// returned; under non-IID the client's own index set is wrapped in a view.
    pub fn client_source<'a, D: Dataset + ?Sized>(
        &self,
        dataset: &'a D,
        groups: &ClientIndexSets,
        client: usize,
    ) -> Result<LoaderSource<'a, D>> {
        if self.iid {
            return Ok(LoaderSource::Full(dataset));
        }
        let indices = groups.get(client).ok_or_else(|| {
            FedError::Config(format!(
                "client {} outside partition of {} clients",
                client,
                groups.num_clients()
            ))
        })?;
        Ok(LoaderSource::Split(DatasetView::new(dataset, indices)))
    }

    /// Training loader for the configured (1-based) `which_user`
    pub fn train_loader<'a, D: Dataset + ?Sized>(&self, dataset: &'a D) -> Result<DataLoader<'a, D>> {
        if self.iid {
            return Ok(DataLoader::new(LoaderSource::Full(dataset)));
        }
        if self.which_user == 0 || self.which_user > self.num_users {
            return Err(FedError::Config(format!(
                "which_user {} outside 1..={}",
                self.which_user, self.num_users
            )));
        }
        let groups = self.client_sets(dataset)?;
        let source = self.client_source(dataset, &groups, self.which_user - 1)?;
        Ok(DataLoader::new(source))
    }

    /// Whole-dataset test loader
    pub fn test_loader_iid<'a, D: Dataset + ?Sized>(&self, dataset: &'a D) -> DataLoader<'a, D> {
        DataLoader::new(LoaderSource::Full(dataset))
    }

    /// Loaders over the two held-out test groups
    pub fn test_loader_niid<'a, D: Dataset + ?Sized>(
        &self,
        dataset: &'a D,
    ) -> Result<(DataLoader<'a, D>, DataLoader<'a, D>)> {
        let layout = ShardLayout::fit(self.test_shards, dataset.len())?;
        let (group_1, group_2) = ShardPartitioner::new(layout).partition_test(dataset)?;
        Ok((
            DataLoader::new(LoaderSource::Split(DatasetView::new(dataset, group_1))),
            DataLoader::new(LoaderSource::Split(DatasetView::new(dataset, group_2))),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::InMemoryDataset;
    use crate::data::partition::TRAIN_SHARDS;

    fn cyclic(n: usize, classes: usize) -> InMemoryDataset {
        let features = (0..n).map(|i| i as f32).collect();
        let labels = (0..n).map(|i| i % classes).collect();
        InMemoryDataset::new(features, labels, 1).unwrap()
    }

    fn config(iid: bool) -> RunConfig {
        RunConfig {
            iid,
            num_users: 4,
            which_user: 2,
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_batches_cover_dataset_in_order() {
        let ds = cyclic(150, 10);
        let batches: Vec<Batch> = Batches::sequential(&ds, LOADER_BATCH_SIZE)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![64, 64, 22]);
        assert_eq!(batches[1].samples[0].features, &[64.0]);
    }

    #[test]
    fn test_iid_train_loader_ignores_partition() {
        // Known discrepancy: IID loaders see every sample, not one client's share
        let ds = cyclic(TRAIN_SHARDS * 2, 10);
        let factory = LoaderFactory::from_config(&config(true)).unwrap();
        let loader = factory.train_loader(&ds).unwrap();
        assert_eq!(loader.num_samples(), ds.len());
        assert_eq!(loader.batch_size(), LOADER_BATCH_SIZE);
    }

    #[test]
    fn test_niid_train_loader_restricts_to_user() {
        let ds = cyclic(TRAIN_SHARDS * 2, 10);
        let factory = LoaderFactory::from_config(&config(false)).unwrap();
        let loader = factory.train_loader(&ds).unwrap();

        // Mode 1 assigns 50 shards of 2 samples
        assert_eq!(loader.num_samples(), 100);
        assert_eq!(loader.num_batches(), 2);
    }

    #[test]
    fn test_which_user_is_one_based() {
        let ds = cyclic(TRAIN_SHARDS, 10);
        let mut cfg = config(false);
        cfg.which_user = 0;
        let factory = LoaderFactory::from_config(&cfg).unwrap();
        assert!(matches!(factory.train_loader(&ds), Err(FedError::Config(_))));
    }

    #[test]
    fn test_test_loaders() {
        let ds = cyclic(10_000, 10);
        let factory = LoaderFactory::from_config(&config(false)).unwrap();

        assert_eq!(factory.test_loader_iid(&ds).num_samples(), 10_000);

        let (d1, d2) = factory.test_loader_niid(&ds).unwrap();
        assert_eq!(d1.num_samples(), 2700);
        assert_eq!(d2.num_samples(), 2700);
        assert_eq!(d1.iter().count(), 43);
    }
}
