use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use config::shared::RedisConfig;
use fred::clients::Transaction;
use fred::prelude::{
    ClientLike, EventInterface, HashesInterface, KeysInterface, Pool, ReconnectPolicy, Server,
    ServerConfig, TransactionInterface,
};
use fred::types::config::UnresponsiveConfig;
use fred::types::{Builder, Key};
use futures::future::join_all;
use futures::{Stream, stream};
use secrecy::ExposeSecret;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

use crate::bail;
use crate::counter::{CounterLayout, CounterSource, CounterTransaction};
use crate::error::{DumpError, DumpResult, ErrorKind};
use crate::types::{Params, Row};

/// Separator between the parts of counter keys and hash fields.
const SEPARATOR: char = ':';

/// Escapes separators and itself inside key and field parts.
const ESCAPE: char = '\\';

/// Number of keys requested per `SCAN` page.
const SCAN_PAGE_SIZE: u32 = 100;

const POOL_SIZE: usize = 2;

/// Hash counter stored in Redis.
///
/// Each partition is one hash under `[<namespace>:]<counter>:<p1>:<p2>...` whose fields are the
/// group values joined as `<g1>:<g2>...` and whose values are integers. A `:` or `\` inside a
/// value is escaped with a backslash.
#[derive(Clone)]
pub struct RedisHashCounter {
    client: Pool,
    layout: CounterLayout,
    namespace: Option<String>,
    batch_size: usize,
}

impl RedisHashCounter {
    /// Connects a client pool to the instance described by `config`.
    pub async fn connect(
        config: &RedisConfig,
        layout: CounterLayout,
        batch_size: usize,
    ) -> DumpResult<Self> {
        let pool = Builder::default_centralized()
            .with_config(|redis_config| {
                redis_config.password = config
                    .password
                    .as_ref()
                    .map(|password| password.expose_secret().to_string());
                redis_config.username = config.username.clone();
                redis_config.server = ServerConfig::Centralized {
                    server: Server::new(config.host.clone(), config.port),
                };
            })
            .with_connection_config(|config| {
                config.internal_command_timeout = Duration::from_secs(5);
                config.reconnect_on_auth_error = true;
                config.unresponsive = UnresponsiveConfig {
                    max_timeout: Some(Duration::from_secs(10)),
                    interval: Duration::from_secs(3),
                };
            })
            .with_performance_config(|config| {
                config.default_command_timeout = Duration::from_secs(5);
            })
            .set_policy(ReconnectPolicy::new_exponential(0, 1, 2000, 5))
            .build_pool(POOL_SIZE)?;

        for client in pool.clients() {
            let mut error_rx = client.error_rx();
            let mut reconnect_rx = client.reconnect_rx();

            tokio::spawn(async move {
                loop {
                    match error_rx.recv().await {
                        Ok((error, server)) => {
                            error!(?server, "redis counter client error: {error:?}");
                        }
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });

            tokio::spawn(async move {
                loop {
                    match reconnect_rx.recv().await {
                        Ok(server) => debug!("redis counter client connected to {server:?}"),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });
        }

        let handles = pool.connect_pool();
        pool.wait_for_connect().await?;

        tokio::spawn(async move {
            let _results = join_all(handles).await;
        });

        Ok(Self::from_pool(pool, layout, config.namespace.clone(), batch_size))
    }

    /// Wraps an already connected pool.
    pub fn from_pool(
        client: Pool,
        layout: CounterLayout,
        namespace: Option<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            layout,
            namespace,
            batch_size: batch_size.max(1),
        }
    }

    /// Adds `by` to the entry identified by `params`.
    pub async fn increment_by(&self, params: &Params, by: i64) -> DumpResult<i64> {
        let partition = self.layout.partition_of(params);
        let group = self.layout.group_of(params);
        if group.len() != self.layout.group_keys.len() {
            bail!(
                ErrorKind::MissingField,
                "Counter increment is missing a group key",
                format!("counter `{}` got {params:?}", self.layout.name)
            );
        }

        let key = self.partition_key(&partition)?;
        let field = join_values(&self.layout.group_keys, &group);

        Ok(self.client.hincrby(key, field, by).await?)
    }

    fn prefix(&self) -> String {
        key_prefix(self.namespace.as_deref(), &self.layout.name)
    }

    fn partition_key(&self, partition: &Params) -> DumpResult<String> {
        let partition = self.layout.partition_of(partition);
        if partition.len() != self.layout.partition_keys.len() {
            bail!(
                ErrorKind::InvalidData,
                "Partition descriptor is missing partition keys",
                format!("counter `{}` got {partition:?}", self.layout.name)
            );
        }

        let prefix = self.prefix();
        if self.layout.partition_keys.is_empty() {
            return Ok(prefix);
        }

        Ok(format!(
            "{prefix}{SEPARATOR}{}",
            join_values(&self.layout.partition_keys, &partition)
        ))
    }

    /// Returns the descriptor of every partition key matching `args`.
    async fn scan_partitions(&self, args: &Params) -> DumpResult<Vec<Params>> {
        let prefix = self.prefix();
        let pattern = partition_pattern(&prefix, &self.layout.partition_keys, args);

        let mut cursor = "0".to_string();
        let mut partitions = Vec::new();
        loop {
            let (next_cursor, keys): (String, Vec<Key>) = self
                .client
                .scan_page(cursor, pattern.clone(), Some(SCAN_PAGE_SIZE), None)
                .await?;

            for key in keys {
                let Some(key) = key.into_string() else {
                    continue;
                };
                if let Some(partition) =
                    parse_partition_key(&prefix, &self.layout.partition_keys, &key)
                {
                    partitions.push(partition);
                }
            }

            cursor = next_cursor;
            if cursor == "0" {
                break;
            }
        }

        partitions.sort();
        partitions.dedup();

        debug!(
            counter = %self.layout.name,
            %pattern,
            partitions = partitions.len(),
            "scanned counter partitions"
        );

        Ok(partitions)
    }

    async fn read_partition(&self, key: &str, partition: &Params) -> DumpResult<Vec<Row>> {
        let hash: HashMap<String, String> = self.client.hgetall(key).await?;

        let mut rows = Vec::with_capacity(hash.len());
        for (field, value) in hash {
            let group = parse_group_field(&self.layout.group_keys, &field).ok_or_else(|| {
                DumpError::from((
                    ErrorKind::InvalidData,
                    "Counter field does not match the group keys",
                    format!("key `{key}` field `{field}`"),
                ))
            })?;
            let value: i64 = value.parse().map_err(|err| {
                DumpError::from((
                    ErrorKind::ConversionError,
                    "Counter value is not an integer",
                    format!("key `{key}` field `{field}` value `{value}`"),
                ))
                .with_source(err)
            })?;

            rows.push(self.layout.row(partition, &group, value));
        }

        Ok(rows)
    }

    /// Reads partitions until a full batch is buffered or every partition has been read.
    async fn next_batch(&self, mut state: ReadState) -> DumpResult<Option<(Vec<Row>, ReadState)>> {
        loop {
            if state.buffer.len() >= self.batch_size {
                let batch = state.buffer.drain(..self.batch_size).collect();
                return Ok(Some((batch, state)));
            }

            match state.partitions.pop_front() {
                Some(partition) => {
                    let key = self.partition_key(&partition)?;
                    let rows = self.read_partition(&key, &partition).await?;
                    state.buffer.extend(rows);
                }
                None if state.buffer.is_empty() => return Ok(None),
                None => {
                    let batch = std::mem::take(&mut state.buffer);
                    return Ok(Some((batch, state)));
                }
            }
        }
    }
}

struct ReadState {
    partitions: VecDeque<Params>,
    buffer: Vec<Row>,
}

impl CounterSource for RedisHashCounter {
    type Transaction = RedisCounterTransaction;

    fn name(&self) -> &str {
        &self.layout.name
    }

    fn partition_data(
        &self,
        partitions: Vec<Params>,
    ) -> impl Stream<Item = DumpResult<Vec<Row>>> + Send + '_ {
        let initial = ReadState {
            partitions: partitions.into(),
            buffer: Vec::new(),
        };

        stream::try_unfold(initial, move |state| self.next_batch(state))
    }

    async fn partitions(&self, args: &Params) -> DumpResult<Vec<Params>> {
        self.scan_partitions(args).await
    }

    async fn begin(&self) -> DumpResult<RedisCounterTransaction> {
        Ok(RedisCounterTransaction {
            transaction: self.client.next_connected().multi(),
            queued: 0,
        })
    }

    async fn delete_partition(
        &self,
        partition: &Params,
        transaction: &mut RedisCounterTransaction,
    ) -> DumpResult<()> {
        let key = self.partition_key(partition)?;
        transaction.transaction.del::<(), _>(key).await?;
        transaction.queued += 1;

        Ok(())
    }
}

/// A `MULTI` block of partition deletes, sent on commit.
pub struct RedisCounterTransaction {
    transaction: Transaction,
    queued: usize,
}

impl CounterTransaction for RedisCounterTransaction {
    async fn commit(self) -> DumpResult<()> {
        if self.queued == 0 {
            return Ok(());
        }

        self.transaction.exec::<()>(true).await?;
        debug!(partitions = self.queued, "deleted counter partitions");

        Ok(())
    }
}

/// Returns the key prefix shared by every partition of `counter`.
fn key_prefix(namespace: Option<&str>, counter: &str) -> String {
    match namespace {
        Some(namespace) => format!("{namespace}{SEPARATOR}{counter}"),
        None => counter.to_string(),
    }
}

/// Joins the escaped text form of `params[key]` for each key, in order.
///
/// Callers ensure every key is present.
fn join_values(keys: &[String], params: &Params) -> String {
    keys.iter()
        .map(|key| {
            params
                .get(key)
                .map(|value| escape_part(&value.to_string()))
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

fn escape_part(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c == SEPARATOR || c == ESCAPE {
            escaped.push(ESCAPE);
        }
        escaped.push(c);
    }

    escaped
}

/// Splits `text` on unescaped separators and unescapes each part.
fn split_parts(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut part = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => part.push(chars.next().unwrap_or(ESCAPE)),
            SEPARATOR => parts.push(std::mem::take(&mut part)),
            c => part.push(c),
        }
    }
    parts.push(part);

    parts
}

/// Builds the `SCAN` pattern for the partitions of `prefix` selected by `args`.
///
/// Partition keys absent from `args` match any value.
fn partition_pattern(prefix: &str, partition_keys: &[String], args: &Params) -> String {
    let mut pattern = escape_glob(prefix);
    for key in partition_keys {
        pattern.push(SEPARATOR);
        match args.get(key) {
            Some(value) => pattern.push_str(&escape_glob(&escape_part(&value.to_string()))),
            None => pattern.push('*'),
        }
    }

    pattern
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

/// Parses a partition key back into its descriptor.
///
/// Returns `None` for keys that do not belong to `prefix` or have the wrong number of parts.
fn parse_partition_key(prefix: &str, partition_keys: &[String], key: &str) -> Option<Params> {
    if partition_keys.is_empty() {
        return (key == prefix).then(Params::new);
    }

    let rest = key.strip_prefix(prefix)?.strip_prefix(SEPARATOR)?;
    parse_parts(partition_keys, rest)
}

/// Parses a hash field into the group values it encodes.
fn parse_group_field(group_keys: &[String], field: &str) -> Option<Params> {
    if group_keys.is_empty() {
        return Some(Params::new());
    }

    parse_parts(group_keys, field)
}

fn parse_parts(keys: &[String], text: &str) -> Option<Params> {
    let parts = split_parts(text);
    if parts.len() != keys.len() {
        return None;
    }

    Some(
        keys.iter()
            .zip(parts)
            .map(|(key, part)| (key.clone(), part))
            .collect(),
    )
}
