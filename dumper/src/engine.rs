//! Orchestration of a dump run.
//!
//! A run stages the counter rows selected by the run arguments into a temporary table, merges
//! that table into every destination and commits, then deletes the drained partitions from the
//! counter. The relational commit always happens before any counter data is deleted.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;

use futures::TryStreamExt;
use metrics::{counter, histogram};
use postgres::schema::TableName;
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};

use crate::counter::{CounterSource, CounterTransaction};
use crate::destination::Destination;
use crate::dump_error;
use crate::error::{DumpError, DumpResult, ErrorKind};
use crate::failpoints::{
    PROCESS__BEFORE_SOURCE_COMMIT, PROCESS__BEFORE_SOURCE_DELETE, dump_fail_point,
};
use crate::metrics::{
    DUMP_ROWS_STAGED_TOTAL, DUMP_RUN_DURATION_SECONDS, DUMP_RUNS_COMPLETED_TOTAL,
    DUMP_RUNS_FAILED_TOTAL, ERROR_KIND_LABEL, JOB_LABEL,
};
use crate::schema::{Field, FieldSchema, FieldType};
use crate::store::{RelationalStore, StoreTransaction};
use crate::types::{Params, Row, Value};

/// Prefix of the default staging table name.
const STAGING_TABLE_PREFIX: &str = "tmp_";

/// Lifecycle hook invoked with the run context.
pub type Hook = Arc<dyn Fn(&mut RunContext) -> DumpResult<()> + Send + Sync>;

/// Hook invoked for every row before it is staged.
pub type RowHook = Arc<dyn Fn(&RunContext, &mut Row) -> DumpResult<()> + Send + Sync>;

/// Phases of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpPhase {
    Idle,
    Staging,
    Merging,
    DeletingSource,
    Committed,
    Failed,
}

impl DumpPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DumpPhase::Idle => "idle",
            DumpPhase::Staging => "staging",
            DumpPhase::Merging => "merging",
            DumpPhase::DeletingSource => "deleting_source",
            DumpPhase::Committed => "committed",
            DumpPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for DumpPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one run, handed to lifecycle hooks.
#[derive(Debug, Clone)]
pub struct RunContext {
    job: String,
    phase: DumpPhase,
    args: Params,
    common_params: Params,
    rows_processed: u64,
    partitions: Vec<Params>,
    deleted_partitions: Vec<Params>,
    statements: Vec<String>,
}

impl RunContext {
    fn new(job: &str, args: Params) -> Self {
        Self {
            job: job.to_string(),
            phase: DumpPhase::Idle,
            args,
            common_params: Params::new(),
            rows_processed: 0,
            partitions: Vec::new(),
            deleted_partitions: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn phase(&self) -> DumpPhase {
        self.phase
    }

    /// Arguments the run was started with.
    pub fn args(&self) -> &Params {
        &self.args
    }

    /// Parameters merged over every staged row and bound into destination conditions.
    pub fn common_params(&self) -> &Params {
        &self.common_params
    }

    pub fn common_params_mut(&mut self) -> &mut Params {
        &mut self.common_params
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.common_params.insert(key, value);
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    /// Counter partitions drained by this run.
    ///
    /// Listed once before `before_merge` runs. Only these partitions are staged and deleted.
    pub fn partitions(&self) -> &[Params] {
        &self.partitions
    }

    /// Partitions deleted from the counter, filled in before `after_delete` runs.
    pub fn deleted_partitions(&self) -> &[Params] {
        &self.deleted_partitions
    }

    /// Queues a statement to run in the relational transaction once the current hook returns.
    ///
    /// Only honoured by `before_merge` and `after_merge`.
    pub fn execute(&mut self, sql: impl Into<String>) {
        self.statements.push(sql.into());
    }

    fn take_statements(&mut self) -> Vec<String> {
        std::mem::take(&mut self.statements)
    }
}

#[derive(Default, Clone)]
struct Hooks {
    before_merge: Option<Hook>,
    prepare_row: Option<RowHook>,
    after_merge: Option<Hook>,
    after_delete: Option<Hook>,
}

/// Builder for [`Engine`].
#[derive(Clone)]
pub struct EngineBuilder {
    name: String,
    fields: Vec<Field>,
    destinations: Vec<Destination>,
    temp_table_name: Option<String>,
    inherit_args: bool,
    hooks: Hooks,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("destinations", &self.destinations)
            .field("temp_table_name", &self.temp_table_name)
            .field("inherit_args", &self.inherit_args)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            destinations: Vec::new(),
            temp_table_name: None,
            inherit_args: true,
            hooks: Hooks::default(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(Field::new(name, field_type));
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Adds a destination. Destinations are merged in the order they are added.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Overrides the staging table name, `tmp_<job>` by default.
    pub fn temp_table_name(mut self, name: impl Into<String>) -> Self {
        self.temp_table_name = Some(name.into());
        self
    }

    /// Whether the run arguments seed the common parameters. On by default.
    pub fn inherit_args(mut self, inherit_args: bool) -> Self {
        self.inherit_args = inherit_args;
        self
    }

    pub fn before_merge<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext) -> DumpResult<()> + Send + Sync + 'static,
    {
        self.hooks.before_merge = Some(Arc::new(hook));
        self
    }

    pub fn prepare_row<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RunContext, &mut Row) -> DumpResult<()> + Send + Sync + 'static,
    {
        self.hooks.prepare_row = Some(Arc::new(hook));
        self
    }

    pub fn after_merge<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext) -> DumpResult<()> + Send + Sync + 'static,
    {
        self.hooks.after_merge = Some(Arc::new(hook));
        self
    }

    pub fn after_delete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext) -> DumpResult<()> + Send + Sync + 'static,
    {
        self.hooks.after_delete = Some(Arc::new(hook));
        self
    }

    /// Validates the schema and every destination, then binds the engine to `store`.
    pub fn build<S: RelationalStore>(self, store: S) -> DumpResult<Engine<S>> {
        let schema = FieldSchema::new(self.fields)?;
        for destination in &self.destinations {
            destination.validate(&schema)?;
        }

        let staging = TableName::unqualified(
            self.temp_table_name
                .unwrap_or_else(|| format!("{STAGING_TABLE_PREFIX}{}", self.name)),
        );

        Ok(Engine {
            name: self.name,
            schema,
            destinations: self.destinations,
            staging,
            inherit_args: self.inherit_args,
            hooks: self.hooks,
            store,
        })
    }
}

/// Drains a counter into relational destinations.
///
/// An engine assumes at most one run in flight per partition set; concurrent runs over the same
/// partitions must be prevented by the caller.
pub struct Engine<S> {
    name: String,
    schema: FieldSchema,
    destinations: Vec<Destination>,
    staging: TableName,
    inherit_args: bool,
    hooks: Hooks,
    store: S,
}

impl<S> fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("destinations", &self.destinations)
            .field("staging", &self.staging)
            .field("inherit_args", &self.inherit_args)
            .finish_non_exhaustive()
    }
}

impl<S: RelationalStore> Engine<S> {
    pub fn builder(name: impl Into<String>) -> EngineBuilder {
        EngineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn staging_table(&self) -> &TableName {
        &self.staging
    }

    /// Runs one dump of the partitions of `counter` selected by `args`.
    ///
    /// Returns the number of rows staged. Failures before the relational commit leave both
    /// stores untouched. Failures while deleting counter data are reported as
    /// [`ErrorKind::PartialCommit`]; the merged data is durable and a retry is safe.
    pub async fn process<C: CounterSource>(&self, counter: &C, args: Params) -> DumpResult<u64> {
        let span = info_span!(
            "dump",
            job = %self.name,
            counter = counter.name(),
            phase = field::Empty
        );
        let started = Instant::now();

        let result = self.run(counter, args, &span).instrument(span.clone()).await;

        histogram!(DUMP_RUN_DURATION_SECONDS, JOB_LABEL => self.name.clone())
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => {
                counter!(DUMP_RUNS_COMPLETED_TOTAL, JOB_LABEL => self.name.clone()).increment(1);
            }
            Err(err) => {
                counter!(
                    DUMP_RUNS_FAILED_TOTAL,
                    JOB_LABEL => self.name.clone(),
                    ERROR_KIND_LABEL => format!("{:?}", err.kind()),
                )
                .increment(1);
            }
        }

        result
    }

    async fn run<C: CounterSource>(
        &self,
        counter: &C,
        args: Params,
        span: &Span,
    ) -> DumpResult<u64> {
        let mut context = RunContext::new(&self.name, args);
        if self.inherit_args {
            context.common_params = context.args.clone();
        }

        info!("starting dump run");

        let mut transaction = self.store.begin().await?;
        if let Err(err) = self
            .stage_and_merge(counter, &mut context, &mut transaction, span)
            .await
        {
            enter_phase(span, &mut context, DumpPhase::Failed);
            if let Err(rollback_err) = transaction.rollback().await {
                warn!(error = %rollback_err, "failed to roll back dump transaction");
                return Err(DumpError::from(vec![err, rollback_err]));
            }

            return Err(err);
        }
        transaction.commit().await?;

        info!(
            rows = context.rows_processed,
            destinations = self.destinations.len(),
            "merged counter data"
        );

        if let Err(err) = self.delete_source(counter, &mut context, span).await {
            enter_phase(span, &mut context, DumpPhase::Failed);
            error!(error = %err, "counter data was merged but could not be deleted");

            return Err(dump_error!(
                ErrorKind::PartialCommit,
                "Counter data was merged but not deleted",
                format!("job `{}`, args {:?}", self.name, context.args),
                source: err
            ));
        }

        enter_phase(span, &mut context, DumpPhase::Committed);
        info!(
            rows = context.rows_processed,
            partitions = context.deleted_partitions.len(),
            "dump run completed"
        );

        Ok(context.rows_processed)
    }

    async fn stage_and_merge<C: CounterSource>(
        &self,
        counter: &C,
        context: &mut RunContext,
        transaction: &mut S::Transaction,
        span: &Span,
    ) -> DumpResult<()> {
        let staging = self.staging.as_quoted_identifier();

        enter_phase(span, context, DumpPhase::Staging);
        transaction
            .execute(&format!(
                "CREATE TEMP TABLE {staging} ({}) ON COMMIT DROP",
                self.schema.column_definitions()
            ))
            .await?;

        context.partitions = counter.partitions(&context.args).await?;
        debug!(partitions = context.partitions.len(), "listed counter partitions");
        run_hook(self.hooks.before_merge.as_ref(), context, transaction).await?;

        let mut batches = pin!(counter.partition_data(context.partitions.clone()));
        while let Some(batch) = batches.try_next().await? {
            if batch.is_empty() {
                continue;
            }

            let mut values = Vec::with_capacity(batch.len());
            for row in batch {
                // Common parameters win over row values.
                let mut row = row.merged(&context.common_params);
                if let Some(prepare_row) = &self.hooks.prepare_row {
                    prepare_row(context, &mut row)?;
                }
                values.push(self.schema.encode_row(&row)?);
            }

            let staged = values.len() as u64;
            transaction
                .execute(&format!(
                    "INSERT INTO {staging} ({}) VALUES {}",
                    self.schema.column_list(),
                    values.join(", ")
                ))
                .await?;

            context.rows_processed += staged;
            counter!(DUMP_ROWS_STAGED_TOTAL, JOB_LABEL => self.name.clone()).increment(staged);
            debug!(rows = staged, total = context.rows_processed, "staged batch");
        }

        transaction.execute(&format!("ANALYZE {staging}")).await?;

        enter_phase(span, context, DumpPhase::Merging);
        for destination in &self.destinations {
            let sql = destination.merge_sql(&self.schema, &self.staging, &context.common_params)?;
            let affected = transaction.execute(&sql).await?;
            debug!(target = %destination.target(), rows = affected, "merged destination");
        }
        run_hook(self.hooks.after_merge.as_ref(), context, transaction).await?;

        transaction.execute(&format!("DROP TABLE {staging}")).await?;

        Ok(())
    }

    async fn delete_source<C: CounterSource>(
        &self,
        counter: &C,
        context: &mut RunContext,
        span: &Span,
    ) -> DumpResult<()> {
        enter_phase(span, context, DumpPhase::DeletingSource);
        dump_fail_point(PROCESS__BEFORE_SOURCE_DELETE)?;

        let mut transaction = counter.begin().await?;
        for partition in context.partitions.clone() {
            let descriptor = context.args.merged(&partition);
            counter.delete_partition(&descriptor, &mut transaction).await?;
            context.deleted_partitions.push(partition);
        }

        if let Some(after_delete) = &self.hooks.after_delete {
            after_delete(context)?;

            let ignored = context.take_statements();
            if !ignored.is_empty() {
                warn!(
                    statements = ignored.len(),
                    "statements queued after the relational commit are ignored"
                );
            }
        }

        dump_fail_point(PROCESS__BEFORE_SOURCE_COMMIT)?;
        transaction.commit().await?;

        debug!(
            partitions = context.deleted_partitions.len(),
            "deleted counter partitions"
        );

        Ok(())
    }
}

fn enter_phase(span: &Span, context: &mut RunContext, phase: DumpPhase) {
    context.phase = phase;
    span.record("phase", phase.as_str());
    debug!(%phase, "entering dump phase");
}

/// Invokes `hook` and executes the statements it queued.
async fn run_hook<T: StoreTransaction>(
    hook: Option<&Hook>,
    context: &mut RunContext,
    transaction: &mut T,
) -> DumpResult<()> {
    let Some(hook) = hook else {
        return Ok(());
    };

    hook(context)?;
    for statement in context.take_statements() {
        transaction.execute(&statement).await?;
    }

    Ok(())
}
