use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::Stream;

use crate::bail;
use crate::counter::{CounterSource, CounterTransaction};
use crate::error::{DumpResult, ErrorKind};
use crate::types::{Params, Row};

/// Counter source wrapper failing deletion or its commit on demand.
///
/// Counts every `delete_partition` call, including failed ones.
#[derive(Debug, Clone)]
pub struct FaultyCounter<C> {
    inner: C,
    fail_delete: bool,
    fail_commit: bool,
    delete_calls: Arc<AtomicUsize>,
}

impl<C> FaultyCounter<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            fail_delete: false,
            fail_commit: false,
            delete_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

impl<C> CounterSource for FaultyCounter<C>
where
    C: CounterSource,
{
    type Transaction = FaultyCounterTransaction<C::Transaction>;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn partition_data(
        &self,
        partitions: Vec<Params>,
    ) -> impl Stream<Item = DumpResult<Vec<Row>>> + Send + '_ {
        self.inner.partition_data(partitions)
    }

    async fn partitions(&self, args: &Params) -> DumpResult<Vec<Params>> {
        self.inner.partitions(args).await
    }

    async fn begin(&self) -> DumpResult<Self::Transaction> {
        Ok(FaultyCounterTransaction {
            inner: self.inner.begin().await?,
            fail_commit: self.fail_commit,
        })
    }

    async fn delete_partition(
        &self,
        partition: &Params,
        transaction: &mut Self::Transaction,
    ) -> DumpResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete {
            bail!(
                ErrorKind::CounterQueryFailed,
                "Partition delete rejected by the faulty counter",
                format!("{partition:?}")
            );
        }

        self.inner
            .delete_partition(partition, &mut transaction.inner)
            .await
    }
}

pub struct FaultyCounterTransaction<T> {
    inner: T,
    fail_commit: bool,
}

impl<T> CounterTransaction for FaultyCounterTransaction<T>
where
    T: CounterTransaction + Send,
{
    async fn commit(self) -> DumpResult<()> {
        if self.fail_commit {
            bail!(
                ErrorKind::CounterQueryFailed,
                "Commit rejected by the faulty counter"
            );
        }

        self.inner.commit().await
    }
}
