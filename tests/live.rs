//! Properties that need a real postgres server.
//!
//! Configured through the `PG*`/`DATABASE_URL` environment, and ignored by
//! default so the suite stays runnable without a database:
//!
//! ```text
//! PGHOST=localhost PGUSER=postgres cargo test -- --ignored
//! ```
use postwire::{Connection, Done, PgValue};
use time::macros::datetime;

async fn connect() -> Connection {
    Connection::connect_env().await.expect("postgres reachable via PG* env")
}

/// Unique object name so parallel test runs don't collide.
fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", std::process::id())
}

async fn round_trip(conn: &Connection, cast: &str, value: PgValue) {
    let rows = conn
        .query(&format!("SELECT $1::{cast}"), std::slice::from_ref(&value))
        .await
        .unwrap_or_else(|e| panic!("{cast}: {e}"));
    assert_eq!(rows.single_value().unwrap(), &value, "{cast}");
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn scalar_round_trips() {
    let conn = connect().await;

    round_trip(&conn, "bool", PgValue::Bool(true)).await;
    round_trip(&conn, "bool", PgValue::Bool(false)).await;
    round_trip(&conn, "int2", PgValue::I16(i16::MIN)).await;
    round_trip(&conn, "int2", PgValue::I16(i16::MAX)).await;
    round_trip(&conn, "int4", PgValue::I32(-7100)).await;
    round_trip(&conn, "int8", PgValue::I64(i64::MIN)).await;
    round_trip(&conn, "int8", PgValue::I64(i64::MAX)).await;
    round_trip(&conn, "float4", PgValue::F32(1.5)).await;
    round_trip(&conn, "float8", PgValue::F64(-0.1)).await;
    round_trip(&conn, "text", PgValue::Text("héllo\nworld".into())).await;
    round_trip(&conn, "varchar", PgValue::Text("varlen".into())).await;
    round_trip(&conn, "name", PgValue::Text("some_name".into())).await;
    round_trip(&conn, "bytea", PgValue::Bytes(vec![0, 1, 2, 255].into())).await;
    round_trip(&conn, "oid", PgValue::I32(12345)).await;
    round_trip(&conn, "json", PgValue::Json(serde_json::json!({"a": [1, null, "x"]}))).await;
    round_trip(&conn, "jsonb", PgValue::Json(serde_json::json!([true, 0.5]))).await;
    round_trip(&conn, "timestamp", PgValue::Timestamp(datetime!(2024-05-05 12:34:56.123456)))
        .await;
    round_trip(
        &conn,
        "timestamptz",
        PgValue::TimestampTz(datetime!(1999-12-31 23:59:59.999999 UTC)),
    )
    .await;

    // void has no value at all
    let rows = conn.query("SELECT pg_sleep(0)", &[]).await.unwrap();
    assert_eq!(rows.single_value().unwrap(), &PgValue::Null);

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn binary_and_text_forms_agree() {
    let conn = connect().await;

    let rows = conn
        .query("SELECT $1::int8::text", &[PgValue::I64(i64::MAX)])
        .await
        .unwrap();
    assert_eq!(rows.single_value().unwrap().as_str(), Some("9223372036854775807"));

    let rows = conn.query("SELECT '123'::int4", &[]).await.unwrap();
    assert_eq!(rows.single_value().unwrap(), &PgValue::I32(123));

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn array_round_trips() {
    let conn = connect().await;

    round_trip(&conn, "int4[]", PgValue::Array(vec![1.into(), PgValue::Null, 3.into()])).await;
    round_trip(&conn, "text[]", PgValue::Array(vec![])).await;

    // three dimensions with NULLs
    let cube = PgValue::Array(vec![
        PgValue::Array(vec![
            PgValue::Array(vec![1.into(), PgValue::Null]),
            PgValue::Array(vec![3.into(), 4.into()]),
        ]),
        PgValue::Array(vec![
            PgValue::Array(vec![5.into(), 6.into()]),
            PgValue::Array(vec![PgValue::Null, 8.into()]),
        ]),
    ]);
    round_trip(&conn, "int4[]", cube).await;

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn bpchar_pads_and_truncates() {
    let conn = connect().await;

    let rows = conn.query("SELECT 'shrt'::char(5)", &[]).await.unwrap();
    assert_eq!(rows.single_value().unwrap().as_str(), Some("shrt "));

    let rows = conn.query("SELECT 'too long'::char(5)", &[]).await.unwrap();
    assert_eq!(rows.single_value().unwrap().as_str(), Some("too l"));

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn enums_domains_and_composites() {
    let conn = connect().await;
    let mood = unique("postwire_mood");
    let posint = unique("postwire_posint");
    let pair = unique("postwire_pair");

    conn.query(&format!("CREATE TYPE {mood} AS ENUM ('sad', 'ok', 'happy')"), &[])
        .await
        .unwrap();
    conn.query(&format!("CREATE DOMAIN {posint} AS int4 CHECK (VALUE > 0)"), &[])
        .await
        .unwrap();
    conn.query(&format!("CREATE TYPE {pair} AS (a int4, b text)"), &[])
        .await
        .unwrap();

    // the catalogue predates the DDL; pick up the new rows
    conn.reload_types().await.unwrap();

    let result = async {
        round_trip(&conn, &mood, PgValue::Text("happy".into())).await;
        round_trip(&conn, &posint, PgValue::I32(7)).await;
        round_trip(
            &conn,
            &pair,
            PgValue::Record(vec![PgValue::I32(1), PgValue::Text("x".into())]),
        )
        .await;
        round_trip(&conn, &pair, PgValue::Record(vec![PgValue::Null, PgValue::Null])).await;

        let rows = conn
            .query(&format!("SELECT ROW(2, 'y')::{pair}"), &[])
            .await
            .unwrap();
        assert_eq!(
            rows.single_value().unwrap(),
            &PgValue::Record(vec![PgValue::I32(2), PgValue::Text("y".into())]),
        );
    };
    result.await;

    for sql in [
        format!("DROP TYPE {pair}"),
        format!("DROP DOMAIN {posint}"),
        format!("DROP TYPE {mood}"),
    ] {
        conn.query(&sql, &[]).await.unwrap();
    }
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn streaming_and_cancellation() {
    let conn = connect().await;

    let mut stream = conn.query_stream("SELECT generate_series(1, 100)", &[]).await.unwrap();
    let mut sum = 0i64;
    let mut count = 0u32;
    while let Some(row) = stream.next().await {
        sum += row.unwrap()[0].as_i64().unwrap();
        count += 1;
    }
    assert_eq!((sum, count), (5050, 100));

    // breaking off mid-stream leaves the connection usable
    let mut stream = conn.query_stream("SELECT generate_series(1, 100)", &[]).await.unwrap();
    for _ in 0..10 {
        stream.next().await.unwrap().unwrap();
    }
    drop(stream);

    let rows = conn.query("SELECT 42", &[]).await.unwrap();
    assert_eq!(rows.single_value().unwrap(), &PgValue::I32(42));

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn error_recovery_and_completion_info() {
    let conn = connect().await;

    let err = conn.query("SELEKT 42", &[]).await.unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("syntax error"));

    let rows = conn.query("SELECT 42", &[]).await.unwrap();
    assert_eq!(rows.single_value().unwrap(), &PgValue::I32(42));
    assert_eq!(rows.completion().unwrap().rows_affected(), Some(1));

    let stream = conn.query_stream("SELECT 42", &[]).await.unwrap();
    let buffered = stream.buffer().await.unwrap();
    assert_eq!(buffered.completion().unwrap().rows_affected(), Some(1));

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn prepared_statements_reuse_and_do_not_leak() {
    let conn = connect().await;

    let stmt = conn.prepare("SELECT $1 + 100").await.unwrap();
    for expected in [101i32, 102, 103] {
        let rows = stmt.execute(&[PgValue::I32(expected - 100)]).await.unwrap();
        assert_eq!(rows.single_value().unwrap().as_i32(), Some(expected));
    }
    stmt.close().await.unwrap();

    let rows = conn
        .query("SELECT count(*)::int4 FROM pg_prepared_statements", &[])
        .await
        .unwrap();
    assert_eq!(rows.single_value().unwrap(), &PgValue::I32(0));

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn notifications_cross_connection() {
    let listener_conn = connect().await;
    let notifier = connect().await;
    let channel = unique("postwire_events");

    let mut listener = listener_conn.listen(&channel).await.unwrap();

    notifier
        .query(
            "SELECT pg_notify($1, $2)",
            &[PgValue::Text(channel.clone()), PgValue::Text("payload".into())],
        )
        .await
        .unwrap();

    let n = listener.recv().await.unwrap();
    assert_eq!(n.channel(), channel);
    assert_eq!(n.payload(), "payload");
    assert_eq!(n.process_id(), notifier.backend_pid());

    listener.unlisten().await.unwrap();
    notifier.close().await.unwrap();
    listener_conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn notifications_same_connection() {
    let conn = connect().await;
    let channel = unique("postwire_self");

    let mut listener = conn.listen(&channel).await.unwrap();
    conn.query(&format!("NOTIFY \"{channel}\", 'p'"), &[]).await.unwrap();

    let n = listener.recv().await.unwrap();
    assert_eq!(n.payload(), "p");
    assert_eq!(n.process_id(), conn.backend_pid());

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running postgres"]
async fn server_initiated_disconnect_resolves_done() {
    let victim = connect().await;
    let killer = connect().await;

    killer
        .query("SELECT pg_terminate_backend($1)", &[PgValue::I32(victim.backend_pid())])
        .await
        .unwrap();

    let done = victim.done().await;
    let Done::Error(err) = done else {
        panic!("expected error termination");
    };
    assert!(
        err.to_string().contains("terminating connection due to administrator command"),
        "{err}"
    );

    killer.close().await.unwrap();
}
