use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt, stream};
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::counter::{CounterLayout, CounterSource, CounterTransaction};
use crate::error::{DumpResult, ErrorKind};
use crate::types::{Params, Row};

/// Default number of rows per batch returned by [`MemoryCounter::data`].
const DEFAULT_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Default)]
struct Inner {
    /// Counter values by partition, then by group.
    partitions: BTreeMap<Params, BTreeMap<Params, i64>>,
}

/// In-memory hash counter for tests and development.
///
/// Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryCounter {
    layout: CounterLayout,
    batch_size: usize,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCounter {
    pub fn new(layout: CounterLayout) -> Self {
        Self {
            layout,
            batch_size: DEFAULT_BATCH_SIZE,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn layout(&self) -> &CounterLayout {
        &self.layout
    }

    /// Adds one to the counter entry identified by `params`.
    pub async fn increment(&self, params: &Params) -> DumpResult<()> {
        self.increment_by(params, 1).await
    }

    /// Adds `by` to the counter entry identified by `params`.
    ///
    /// `params` must hold every partition and group key of the layout.
    pub async fn increment_by(&self, params: &Params, by: i64) -> DumpResult<()> {
        let partition = self.layout.partition_of(params);
        let group = self.layout.group_of(params);

        if partition.len() != self.layout.partition_keys.len()
            || group.len() != self.layout.group_keys.len()
        {
            bail!(
                ErrorKind::MissingField,
                "Counter increment is missing a partition or group key",
                format!("counter `{}` got {params:?}", self.layout.name)
            );
        }

        let mut inner = self.inner.lock().await;
        *inner
            .partitions
            .entry(partition)
            .or_default()
            .entry(group)
            .or_default() += by;

        Ok(())
    }

    /// Returns the current value of the entry identified by `params`.
    pub async fn value(&self, params: &Params) -> Option<i64> {
        let partition = self.layout.partition_of(params);
        let group = self.layout.group_of(params);

        let inner = self.inner.lock().await;
        inner.partitions.get(&partition)?.get(&group).copied()
    }

    /// Returns the number of counter entries across all partitions.
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.partitions.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn rows(&self, partitions: &[Params]) -> Vec<Row> {
        let inner = self.inner.lock().await;

        inner
            .partitions
            .iter()
            .filter(|(stored, _)| partitions.iter().any(|partition| stored.matches(partition)))
            .flat_map(|(partition, groups)| {
                groups
                    .iter()
                    .map(|(group, value)| self.layout.row(partition, group, *value))
            })
            .collect()
    }
}

impl CounterSource for MemoryCounter {
    type Transaction = MemoryCounterTransaction;

    fn name(&self) -> &str {
        &self.layout.name
    }

    fn partition_data(
        &self,
        partitions: Vec<Params>,
    ) -> impl Stream<Item = DumpResult<Vec<Row>>> + Send + '_ {
        let batch_size = self.batch_size;

        stream::once(async move { self.rows(&partitions).await }).flat_map(move |rows| {
            let mut rows = rows.into_iter().peekable();
            let mut batches = Vec::new();
            while rows.peek().is_some() {
                batches.push(Ok(rows.by_ref().take(batch_size).collect::<Vec<_>>()));
            }

            stream::iter(batches)
        })
    }

    async fn partitions(&self, args: &Params) -> DumpResult<Vec<Params>> {
        let filter = self.layout.partition_of(args);
        let inner = self.inner.lock().await;

        Ok(inner
            .partitions
            .keys()
            .filter(|partition| partition.matches(&filter))
            .cloned()
            .collect())
    }

    async fn begin(&self) -> DumpResult<MemoryCounterTransaction> {
        Ok(MemoryCounterTransaction {
            inner: self.inner.clone(),
            layout: self.layout.clone(),
            pending: Vec::new(),
        })
    }

    async fn delete_partition(
        &self,
        partition: &Params,
        transaction: &mut MemoryCounterTransaction,
    ) -> DumpResult<()> {
        let partition = self.layout.partition_of(partition);
        if partition.len() != self.layout.partition_keys.len() {
            bail!(
                ErrorKind::InvalidData,
                "Partition descriptor is missing partition keys",
                format!("counter `{}` got {partition:?}", self.layout.name)
            );
        }

        transaction.pending.push(partition);

        Ok(())
    }
}

/// Deletions queued on a [`MemoryCounter`], applied on commit.
#[derive(Debug)]
pub struct MemoryCounterTransaction {
    inner: Arc<Mutex<Inner>>,
    layout: CounterLayout,
    pending: Vec<Params>,
}

impl CounterTransaction for MemoryCounterTransaction {
    async fn commit(self) -> DumpResult<()> {
        let mut inner = self.inner.lock().await;

        for pending in &self.pending {
            // Stored partitions may hold text where the descriptor holds typed values.
            let stored = inner
                .partitions
                .keys()
                .find(|partition| partition.matches(pending))
                .cloned();

            if let Some(stored) = stored {
                inner.partitions.remove(&stored);
            }
        }

        debug!(
            counter = %self.layout.name,
            partitions = self.pending.len(),
            "deleted counter partitions"
        );

        Ok(())
    }
}
