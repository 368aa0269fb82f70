//! # Data
//!
//! Datasets, index-set views, the shard partitioner and batch loaders.

pub mod dataset;
pub mod loader;
pub mod partition;
pub mod source;
pub mod view;

pub use dataset::{Dataset, InMemoryDataset, Sample};
pub use loader::{Batch, Batches, DataLoader, LoaderFactory, LoaderSource, LOADER_BATCH_SIZE};
pub use partition::{
    label_histogram, partition_test, partition_train, sort_by_label, ClientIndexSets,
    DistributionMode, DistributionTable, IndexSet, ShardLayout, ShardPartitioner, ShardRange,
    TEST_SHARDS, TRAIN_SHARDS,
};
pub use source::{DatasetPair, SyntheticSpec};
pub use view::DatasetView;
