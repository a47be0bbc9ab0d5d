use std::collections::BTreeMap;

use config::shared::{DestinationConfig, JobConfig};
use postgres::schema::TableName;
use tracing::info;

use crate::bail;
use crate::counter::CounterSource;
use crate::destination::Destination;
use crate::engine::{Engine, EngineBuilder};
use crate::error::{DumpResult, ErrorKind};
use crate::schema::Field;
use crate::store::RelationalStore;
use crate::types::Params;

/// Named engines sharing one relational store.
pub struct JobRegistry<S> {
    jobs: BTreeMap<String, Engine<S>>,
}

impl<S> Default for JobRegistry<S> {
    fn default() -> Self {
        Self {
            jobs: BTreeMap::new(),
        }
    }
}

impl<S: RelationalStore> JobRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one engine per job, each with its own handle on `store`.
    pub fn from_config(jobs: &[JobConfig], store: S) -> DumpResult<Self>
    where
        S: Clone,
    {
        let mut registry = Self::new();
        for job in jobs {
            registry.register(engine_builder(job)?.build(store.clone())?)?;
        }

        Ok(registry)
    }

    /// Adds `engine` under its name.
    pub fn register(&mut self, engine: Engine<S>) -> DumpResult<()> {
        if self.jobs.contains_key(engine.name()) {
            bail!(
                ErrorKind::ConfigError,
                "A job with this name is already registered",
                engine.name()
            );
        }

        self.jobs.insert(engine.name().to_string(), engine);

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Engine<S>> {
        self.jobs.get(name)
    }

    /// Job names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs the job called `name` against `counter`.
    pub async fn process<C: CounterSource>(
        &self,
        name: &str,
        counter: &C,
        args: Params,
    ) -> DumpResult<u64> {
        let Some(engine) = self.get(name) else {
            bail!(ErrorKind::UnknownJob, "No job is registered under this name", name);
        };

        info!(job = name, "processing job");
        engine.process(counter, args).await
    }
}

/// Turns a job definition into an engine builder.
///
/// Field types are parsed here so an unknown type fails before any store is touched. Hooks can
/// be added to the returned builder.
pub fn engine_builder(job: &JobConfig) -> DumpResult<EngineBuilder> {
    let fields = job
        .fields
        .iter()
        .map(|field| {
            field
                .field_type
                .parse()
                .map(|field_type| Field::new(field.name.clone(), field_type))
        })
        .collect::<DumpResult<Vec<_>>>()?;

    let mut builder = EngineBuilder::new(job.name.clone())
        .fields(fields)
        .inherit_args(job.inherit_args);
    if let Some(temp_table_name) = &job.temp_table_name {
        builder = builder.temp_table_name(temp_table_name.clone());
    }

    for destination in &job.destinations {
        builder = builder.destination(destination_from_config(destination));
    }

    Ok(builder)
}

fn destination_from_config(config: &DestinationConfig) -> Destination {
    let target = TableName::new(config.schema.clone(), config.table.clone());

    let mut destination = Destination::new(target, config.take.iter().cloned())
        .key_fields(config.key_fields.iter().cloned())
        .increment_fields(config.increment_fields.iter().cloned())
        .text_increment_fields(config.text_increment_fields.iter().cloned())
        .group_by(config.group_by.iter().cloned());

    for (field, source) in &config.map {
        destination = destination.map(field.clone(), source);
    }
    for condition in &config.conditions {
        destination = destination.condition(condition.clone());
    }
    for condition in &config.source_conditions {
        destination = destination.source_condition(condition.clone());
    }
    if let Some(matching_expr) = &config.matching_expr {
        destination = destination.matching_expr(matching_expr.clone());
    }
    if let Some(value_delimiter) = &config.value_delimiter {
        destination = destination.value_delimiter(value_delimiter.clone());
    }

    destination
}
