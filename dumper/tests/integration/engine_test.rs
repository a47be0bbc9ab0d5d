use chrono::NaiveDate;
use dumper::counter::CounterLayout;
use dumper::counter::memory::MemoryCounter;
use dumper::destination::Destination;
use dumper::engine::{Engine, EngineBuilder};
use dumper::error::ErrorKind;
use dumper::schema::FieldType;
use dumper::store::postgres::PgStore;
use dumper::test_utils::database::TestDatabase;
use dumper::types::{Params, Value};
use postgres::schema::TableName;
use telemetry::tracing::init_test_tracing;

const SCHEMA: &str = "
    create table stats_by_days (record_id bigint, column_id bigint, stats_day date, hits bigint);
    create table stats_totals (record_id bigint, column_id bigint, hits bigint);
    create table stats_agg_totals (record_id bigint, hits bigint);
";

fn record_hits() -> MemoryCounter {
    MemoryCounter::new(
        CounterLayout::new("record_hits")
            .group_keys(["record_id", "column_id"])
            .partition_keys(["stats_day"])
            .value_field("hits"),
    )
    .with_batch_size(2)
}

async fn hit(counter: &MemoryCounter, stats_day: &str, record_id: i64, column_id: i64) {
    let params = Params::new()
        .with("stats_day", stats_day)
        .with("record_id", record_id)
        .with("column_id", column_id);
    counter.increment(&params).await.unwrap();
}

async fn seed_day(counter: &MemoryCounter, stats_day: &str) {
    hit(counter, stats_day, 1, 100).await;
    hit(counter, stats_day, 1, 200).await;
    hit(counter, stats_day, 1, 200).await;
    hit(counter, stats_day, 2, 100).await;
}

fn record_stats() -> EngineBuilder {
    Engine::<PgStore>::builder("record_stats")
        .field("record_id", FieldType::Integer)
        .field("column_id", FieldType::Integer)
        .field("stats_day", FieldType::Date)
        .field("hits", FieldType::Integer)
        .inherit_args(false)
        .before_merge(|context| {
            let Some(Value::String(day)) = context.args().get("stats_day").cloned() else {
                return Ok(());
            };
            let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")?;
            context.set_param("stats_day", day);
            Ok(())
        })
        .destination(
            Destination::new(
                TableName::unqualified("stats_by_days"),
                ["record_id", "column_id", "stats_day", "hits"],
            )
            .key_fields(["record_id", "column_id", "stats_day"])
            .increment_fields(["hits"])
            .condition("target.stats_day = :stats_day"),
        )
        .destination(
            Destination::new(
                TableName::unqualified("stats_totals"),
                ["record_id", "column_id", "hits"],
            )
            .key_fields(["record_id", "column_id"])
            .increment_fields(["hits"]),
        )
        .destination(
            Destination::new(TableName::unqualified("stats_agg_totals"), ["record_id", "hits"])
                .key_fields(["record_id"])
                .increment_fields(["hits"])
                .map("hits", "sum(hits)")
                .group_by(["record_id"]),
        )
}

async fn fetch<T>(database: &TestDatabase, sql: &str) -> Vec<T>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
{
    sqlx::query_as::<_, T>(sql)
        .fetch_all(&database.pool)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn counters_are_merged_into_every_destination() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    database.execute(SCHEMA).await;

    let engine = record_stats().build(database.store()).unwrap();
    let counter = record_hits();
    seed_day(&counter, "2015-01-19").await;
    seed_day(&counter, "2015-01-20").await;

    for day in ["2015-01-19", "2015-01-20"] {
        let rows = engine
            .process(&counter, Params::new().with("stats_day", day))
            .await
            .unwrap();
        assert_eq!(rows, 3);
    }

    let by_days: Vec<(i64, i64, String, i64)> = fetch(
        &database,
        "select record_id, column_id, stats_day::text, hits from stats_by_days order by 3, 1, 2",
    )
    .await;
    assert_eq!(
        by_days,
        vec![
            (1, 100, "2015-01-19".to_string(), 1),
            (1, 200, "2015-01-19".to_string(), 2),
            (2, 100, "2015-01-19".to_string(), 1),
            (1, 100, "2015-01-20".to_string(), 1),
            (1, 200, "2015-01-20".to_string(), 2),
            (2, 100, "2015-01-20".to_string(), 1),
        ]
    );

    let totals: Vec<(i64, i64, i64)> = fetch(
        &database,
        "select record_id, column_id, hits from stats_totals order by 1, 2",
    )
    .await;
    assert_eq!(totals, vec![(1, 100, 2), (1, 200, 4), (2, 100, 2)]);

    let agg_totals: Vec<(i64, i64)> = fetch(
        &database,
        "select record_id, hits from stats_agg_totals order by 1",
    )
    .await;
    assert_eq!(agg_totals, vec![(1, 6), (2, 2)]);

    assert!(counter.is_empty().await);

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_destination_leaves_no_trace() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    database.execute(SCHEMA).await;

    let engine = record_stats()
        .destination(
            Destination::new(TableName::unqualified("missing_totals"), ["record_id", "hits"])
                .key_fields(["record_id"])
                .increment_fields(["hits"]),
        )
        .build(database.store())
        .unwrap();
    let counter = record_hits();
    seed_day(&counter, "2015-01-19").await;

    let err = engine
        .process(&counter, Params::new().with("stats_day", "2015-01-19"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RelationalQueryFailed);

    for table in ["stats_by_days", "stats_totals", "stats_agg_totals"] {
        let count: Vec<(i64,)> = fetch(&database, &format!("select count(*) from {table}")).await;
        assert_eq!(count, vec![(0,)], "{table} must be empty");
    }
    let staging: Vec<(i64,)> = fetch(
        &database,
        "select count(*) from pg_class where relname = 'tmp_record_stats'",
    )
    .await;
    assert_eq!(staging, vec![(0,)]);
    assert_eq!(counter.len().await, 3);

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_field_fails_before_any_destination_is_touched() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    database.execute(SCHEMA).await;

    let engine = record_stats()
        .field("referers", FieldType::String)
        .build(database.store())
        .unwrap();
    let counter = record_hits();
    seed_day(&counter, "2015-01-19").await;

    let err = engine
        .process(&counter, Params::new().with("stats_day", "2015-01-19"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingField);

    let totals: Vec<(i64,)> = fetch(&database, "select count(*) from stats_totals").await;
    assert_eq!(totals, vec![(0,)]);
    assert_eq!(counter.len().await, 3);

    database.cleanup().await;
}
