use std::future::Future;

use config::shared::CounterConfig;
use futures::{Stream, TryStreamExt, stream};

use crate::error::DumpResult;
use crate::types::{Params, Row};

/// A partitioned counter store drained by dump runs.
///
/// Reads are lazy and batched. Deletion happens per partition inside a counter transaction that
/// the engine opens only after the relational side has committed.
///
/// A run lists its partitions once, reads exactly those through [`partition_data`] and later
/// deletes exactly those, so a partition created while the run is in flight is left for the next
/// run.
///
/// [`partition_data`]: CounterSource::partition_data
pub trait CounterSource: Sync {
    type Transaction: CounterTransaction + Send;

    /// Returns the counter name.
    fn name(&self) -> &str;

    /// Returns the rows of every partition selected by `args`, in batches.
    ///
    /// Each row holds the partition values, the group values and the counter value.
    fn data<'a>(
        &'a self,
        args: &'a Params,
    ) -> impl Stream<Item = DumpResult<Vec<Row>>> + Send + 'a {
        stream::once(self.partitions(args))
            .map_ok(move |partitions| self.partition_data(partitions))
            .try_flatten()
    }

    /// Returns the rows of exactly `partitions`, as listed by [`CounterSource::partitions`], in
    /// batches.
    fn partition_data(
        &self,
        partitions: Vec<Params>,
    ) -> impl Stream<Item = DumpResult<Vec<Row>>> + Send + '_;

    /// Returns the descriptors of the partitions selected by `args`.
    fn partitions(&self, args: &Params) -> impl Future<Output = DumpResult<Vec<Params>>> + Send;

    /// Opens a transaction used for partition deletes.
    fn begin(&self) -> impl Future<Output = DumpResult<Self::Transaction>> + Send;

    /// Queues deletion of the partition described by `partition` in `transaction`.
    fn delete_partition(
        &self,
        partition: &Params,
        transaction: &mut Self::Transaction,
    ) -> impl Future<Output = DumpResult<()>> + Send;
}

/// A pending set of counter deletions.
pub trait CounterTransaction {
    /// Applies every queued deletion atomically.
    fn commit(self) -> impl Future<Output = DumpResult<()>> + Send;
}

/// Names of the keys making up a hash counter.
///
/// A counter is split into partitions by `partition_keys`, each partition holds one integer per
/// distinct combination of `group_keys`. Rows read from the counter carry both sets of keys plus
/// the counter value under `value_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterLayout {
    pub name: String,
    pub group_keys: Vec<String>,
    pub partition_keys: Vec<String>,
    pub value_field: String,
}

impl CounterLayout {
    pub const DEFAULT_VALUE_FIELD: &'static str = "value";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_keys: Vec::new(),
            partition_keys: Vec::new(),
            value_field: Self::DEFAULT_VALUE_FIELD.to_string(),
        }
    }

    pub fn group_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn partition_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn value_field(mut self, field: impl Into<String>) -> Self {
        self.value_field = field.into();
        self
    }

    /// Returns the partition key entries of `params`.
    pub fn partition_of(&self, params: &Params) -> Params {
        params.select(self.partition_keys.iter().map(String::as_str))
    }

    /// Returns the group key entries of `params`.
    pub fn group_of(&self, params: &Params) -> Params {
        params.select(self.group_keys.iter().map(String::as_str))
    }

    /// Builds the row for one counter entry.
    pub fn row(&self, partition: &Params, group: &Params, value: i64) -> Row {
        let mut row = partition.merged(group);
        row.insert(self.value_field.clone(), value);
        row
    }
}

impl From<&CounterConfig> for CounterLayout {
    fn from(config: &CounterConfig) -> Self {
        CounterLayout::new(config.name.clone())
            .group_keys(config.group_keys.iter().cloned())
            .partition_keys(config.partition_keys.iter().cloned())
            .value_field(config.value_field.clone())
    }
}
