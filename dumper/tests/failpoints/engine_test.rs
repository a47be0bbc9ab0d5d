use dumper::counter::CounterLayout;
use dumper::counter::memory::MemoryCounter;
use dumper::destination::Destination;
use dumper::engine::Engine;
use dumper::error::ErrorKind;
use dumper::failpoints::{PROCESS__BEFORE_SOURCE_COMMIT, PROCESS__BEFORE_SOURCE_DELETE};
use dumper::schema::FieldType;
use dumper::store::postgres::PgStore;
use dumper::test_utils::database::TestDatabase;
use dumper::test_utils::failpoints::ConfiguredFailScenario;
use dumper::types::Params;
use postgres::schema::TableName;
use telemetry::tracing::init_test_tracing;

async fn setup() -> (TestDatabase, Engine<PgStore>, MemoryCounter) {
    let database = TestDatabase::spawn().await;
    database
        .execute("create table daily_hits (id bigint, day date, hits bigint)")
        .await;

    let engine = Engine::<PgStore>::builder("daily_hits")
        .field("id", FieldType::Integer)
        .field("day", FieldType::Date)
        .field("hits", FieldType::Integer)
        .destination(
            Destination::new(TableName::unqualified("daily_hits"), ["id", "day", "hits"])
                .key_fields(["id", "day"])
                .increment_fields(["hits"]),
        )
        .build(database.store())
        .unwrap();

    let counter = MemoryCounter::new(
        CounterLayout::new("daily_hits")
            .group_keys(["id"])
            .partition_keys(["day"])
            .value_field("hits"),
    );
    counter
        .increment_by(&Params::new().with("id", 1).with("day", "2024-01-01"), 4)
        .await
        .unwrap();

    (database, engine, counter)
}

async fn merged_hits(database: &TestDatabase) -> Vec<(i64, i64)> {
    sqlx::query_as::<_, (i64, i64)>("select id, hits from daily_hits")
        .fetch_all(&database.pool)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn fault_before_source_delete_keeps_merged_and_counter_data() {
    init_test_tracing();
    let _scenario = ConfiguredFailScenario::setup(&[(PROCESS__BEFORE_SOURCE_DELETE, "return")]);
    let (database, engine, counter) = setup().await;

    let err = engine
        .process(&counter, Params::new().with("day", "2024-01-01"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialCommit);

    assert_eq!(merged_hits(&database).await, vec![(1, 4)]);
    assert_eq!(counter.len().await, 1);

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn fault_before_source_commit_keeps_counter_data() {
    init_test_tracing();
    let _scenario = ConfiguredFailScenario::setup(&[(PROCESS__BEFORE_SOURCE_COMMIT, "return")]);
    let (database, engine, counter) = setup().await;

    let err = engine
        .process(&counter, Params::new().with("day", "2024-01-01"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialCommit);

    assert_eq!(merged_hits(&database).await, vec![(1, 4)]);
    assert_eq!(counter.len().await, 1);

    database.cleanup().await;
}
