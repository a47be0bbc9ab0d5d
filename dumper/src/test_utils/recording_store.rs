use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{DumpResult, ErrorKind};
use crate::store::{RelationalStore, StoreTransaction};

#[derive(Debug, Default)]
struct Inner {
    committed: Vec<Vec<String>>,
    rolled_back: Vec<Vec<String>>,
}

/// Relational store that records the statements of every transaction instead of running them.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    inner: Arc<Mutex<Inner>>,
    fail_on: Option<String>,
    fail_commit: bool,
    fail_rollback: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every statement containing `pattern`.
    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on = Some(pattern.into());
        self
    }

    /// Fails every commit.
    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Fails every rollback.
    pub fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    /// Statements of committed transactions, one entry per transaction.
    pub async fn committed(&self) -> Vec<Vec<String>> {
        self.inner.lock().await.committed.clone()
    }

    /// Statements of rolled back transactions, one entry per transaction.
    pub async fn rolled_back(&self) -> Vec<Vec<String>> {
        self.inner.lock().await.rolled_back.clone()
    }

    /// Every committed statement, in order.
    pub async fn statements(&self) -> Vec<String> {
        self.inner.lock().await.committed.concat()
    }
}

impl RelationalStore for RecordingStore {
    type Transaction = RecordingTransaction;

    async fn begin(&self) -> DumpResult<RecordingTransaction> {
        Ok(RecordingTransaction {
            store: self.clone(),
            statements: Vec::new(),
        })
    }
}

pub struct RecordingTransaction {
    store: RecordingStore,
    statements: Vec<String>,
}

impl StoreTransaction for RecordingTransaction {
    async fn execute(&mut self, sql: &str) -> DumpResult<u64> {
        if let Some(pattern) = &self.store.fail_on
            && sql.contains(pattern.as_str())
        {
            bail!(
                ErrorKind::RelationalQueryFailed,
                "Statement rejected by the recording store",
                sql.to_string()
            );
        }

        self.statements.push(sql.to_string());

        Ok(0)
    }

    async fn commit(self) -> DumpResult<()> {
        if self.store.fail_commit {
            bail!(
                ErrorKind::RelationalQueryFailed,
                "Commit rejected by the recording store"
            );
        }

        let mut inner = self.store.inner.lock().await;
        inner.committed.push(self.statements);

        Ok(())
    }

    async fn rollback(self) -> DumpResult<()> {
        if self.store.fail_rollback {
            bail!(
                ErrorKind::RelationalConnectionFailed,
                "Rollback rejected by the recording store"
            );
        }

        let mut inner = self.store.inner.lock().await;
        inner.rolled_back.push(self.statements);

        Ok(())
    }
}
