use std::future::Future;

use crate::error::DumpResult;

/// A relational store receiving merged counter data.
///
/// Every run works inside one transaction: the staging buffer, all destination merges and the
/// hook statements either commit together or not at all.
pub trait RelationalStore {
    type Transaction: StoreTransaction + Send;

    /// Opens a new transaction.
    fn begin(&self) -> impl Future<Output = DumpResult<Self::Transaction>> + Send;
}

/// An open transaction on a [`RelationalStore`].
pub trait StoreTransaction {
    /// Executes a statement built from literals and returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> impl Future<Output = DumpResult<u64>> + Send;

    fn commit(self) -> impl Future<Output = DumpResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = DumpResult<()>> + Send;
}
