use dumper::counter::CounterLayout;
use dumper::counter::memory::MemoryCounter;
use dumper::destination::Destination;
use dumper::engine::Engine;
use dumper::schema::FieldType;
use dumper::store::postgres::PgStore;
use dumper::test_utils::database::TestDatabase;
use dumper::types::{Params, Value};
use postgres::schema::TableName;
use telemetry::tracing::init_test_tracing;

async fn fetch<T>(database: &TestDatabase, sql: &str) -> Vec<T>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
{
    sqlx::query_as::<_, T>(sql)
        .fetch_all(&database.pool)
        .await
        .unwrap()
}

fn daily_hits() -> MemoryCounter {
    MemoryCounter::new(
        CounterLayout::new("daily_hits")
            .group_keys(["id"])
            .partition_keys(["day"])
            .value_field("hits"),
    )
}

fn daily_engine(database: &TestDatabase) -> Engine<PgStore> {
    Engine::<PgStore>::builder("daily_hits")
        .field("id", FieldType::Integer)
        .field("day", FieldType::Date)
        .field("hits", FieldType::Integer)
        .destination(
            Destination::new(TableName::unqualified("daily_hits"), ["id", "day", "hits"])
                .key_fields(["id", "day"])
                .increment_fields(["hits"]),
        )
        .build(database.store())
        .unwrap()
}

async fn hit(counter: &MemoryCounter, id: i64, day: &str) {
    counter
        .increment(&Params::new().with("id", id).with("day", day))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_increments_merge_into_one_row() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    database
        .execute("create table daily_hits (id bigint, day date, hits bigint)")
        .await;
    let engine = daily_engine(&database);
    let counter = daily_hits();

    hit(&counter, 1, "2024-01-01").await;
    hit(&counter, 1, "2024-01-01").await;
    engine
        .process(&counter, Params::new().with("day", "2024-01-01"))
        .await
        .unwrap();

    let rows: Vec<(i64, String, i64)> =
        fetch(&database, "select id, day::text, hits from daily_hits").await;
    assert_eq!(rows, vec![(1, "2024-01-01".to_string(), 2)]);

    // A later run for the same key updates the existing row.
    hit(&counter, 1, "2024-01-01").await;
    engine
        .process(&counter, Params::new().with("day", "2024-01-01"))
        .await
        .unwrap();

    let rows: Vec<(i64, String, i64)> =
        fetch(&database, "select id, day::text, hits from daily_hits").await;
    assert_eq!(rows, vec![(1, "2024-01-01".to_string(), 3)]);

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disjoint_days_produce_distinct_rows() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    database
        .execute("create table daily_hits (id bigint, day date, hits bigint)")
        .await;
    let engine = daily_engine(&database);
    let counter = daily_hits();

    for day in ["2024-01-01", "2024-01-02"] {
        hit(&counter, 1, day).await;
        engine
            .process(&counter, Params::new().with("day", day))
            .await
            .unwrap();
    }

    let rows: Vec<(i64, String, i64)> = fetch(
        &database,
        "select id, day::text, hits from daily_hits order by day",
    )
    .await;
    assert_eq!(
        rows,
        vec![
            (1, "2024-01-01".to_string(), 1),
            (1, "2024-01-02".to_string(), 1),
        ]
    );

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn matching_expression_treats_null_as_empty() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    database
        .execute(
            "create table record_referers (record_id bigint, referer text, hits bigint);
             insert into record_referers values (1, null, 5);",
        )
        .await;

    let engine = Engine::<PgStore>::builder("record_referers")
        .field("record_id", FieldType::Integer)
        .field("referer", FieldType::String)
        .field("hits", FieldType::Integer)
        .prepare_row(|_, row| {
            if row.get("referer") == Some(&Value::from("")) {
                row.insert("referer", Value::Null);
            }
            Ok(())
        })
        .destination(
            Destination::new(
                TableName::unqualified("record_referers"),
                ["record_id", "referer", "hits"],
            )
            .increment_fields(["hits"])
            .matching_expr(
                "source.record_id = target.record_id \
                 AND COALESCE(source.referer, '') = COALESCE(target.referer, '')",
            ),
        )
        .build(database.store())
        .unwrap();

    let counter = MemoryCounter::new(
        CounterLayout::new("record_referers")
            .group_keys(["record_id", "referer"])
            .value_field("hits"),
    );
    counter
        .increment_by(&Params::new().with("record_id", 1).with("referer", ""), 2)
        .await
        .unwrap();
    counter
        .increment_by(
            &Params::new().with("record_id", 1).with("referer", "example.com"),
            1,
        )
        .await
        .unwrap();

    engine.process(&counter, Params::new()).await.unwrap();

    let rows: Vec<(i64, Option<String>, i64)> = fetch(
        &database,
        "select record_id, referer, hits from record_referers order by referer nulls first",
    )
    .await;
    assert_eq!(
        rows,
        vec![(1, None, 7), (1, Some("example.com".to_string()), 1)]
    );

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn string_increments_prepend_new_values() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    database
        .execute(
            "create table record_sources (record_id bigint, referers text);
             insert into record_sources values (1, 'a.com');",
        )
        .await;

    let engine = Engine::<PgStore>::builder("record_sources")
        .field("record_id", FieldType::Integer)
        .field("referers", FieldType::String)
        .field("hits", FieldType::Integer)
        .destination(
            Destination::new(
                TableName::unqualified("record_sources"),
                ["record_id", "referers"],
            )
            .key_fields(["record_id"])
            .increment_fields(["referers"])
            .value_delimiter("|"),
        )
        .build(database.store())
        .unwrap();

    let counter = MemoryCounter::new(
        CounterLayout::new("record_sources")
            .group_keys(["record_id", "referers"])
            .value_field("hits"),
    );
    for (record_id, referers) in [(1, "b.com"), (2, "c.com")] {
        counter
            .increment(
                &Params::new()
                    .with("record_id", record_id)
                    .with("referers", referers),
            )
            .await
            .unwrap();
    }

    engine.process(&counter, Params::new()).await.unwrap();

    let rows: Vec<(i64, String)> = fetch(
        &database,
        "select record_id, referers from record_sources order by record_id",
    )
    .await;
    assert_eq!(
        rows,
        vec![(1, "b.com|a.com".to_string()), (2, "c.com".to_string())]
    );

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn aggregated_text_increments_concatenate() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    database
        .execute(
            "create table record_referers_agg (record_id bigint, referers text, hits bigint);
             insert into record_referers_agg values (1, 'a.com', 4);",
        )
        .await;

    let engine = Engine::<PgStore>::builder("record_referers_agg")
        .field("record_id", FieldType::Integer)
        .field("referer", FieldType::String)
        .field("hits", FieldType::Integer)
        .destination(
            Destination::new(
                TableName::unqualified("record_referers_agg"),
                ["record_id", "referers", "hits"],
            )
            .key_fields(["record_id"])
            .increment_fields(["referers", "hits"])
            .text_increment_fields(["referers"])
            .map("referers", "string_agg(referer, '|' order by referer)")
            .map("hits", "sum(hits)")
            .group_by(["record_id"]),
        )
        .build(database.store())
        .unwrap();

    let counter = MemoryCounter::new(
        CounterLayout::new("record_referers_agg")
            .group_keys(["record_id", "referer"])
            .value_field("hits"),
    );
    for (referer, hits) in [("b.com", 2), ("c.com", 3)] {
        counter
            .increment_by(
                &Params::new().with("record_id", 1).with("referer", referer),
                hits,
            )
            .await
            .unwrap();
    }

    engine.process(&counter, Params::new()).await.unwrap();

    let rows: Vec<(i64, String, i64)> = fetch(
        &database,
        "select record_id, referers, hits from record_referers_agg",
    )
    .await;
    assert_eq!(rows, vec![(1, "b.com|c.com,a.com".to_string(), 9)]);

    database.cleanup().await;
}
