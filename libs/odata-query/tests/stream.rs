#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Queries over asynchronous record streams.

mod common;

use std::time::Duration;

use futures::stream;
use odata_edm::Record;
use odata_query::{Error, ExecutionError, ODataConfig, QuerySettings};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn rows() -> impl futures::Stream<Item = Result<Record, ExecutionError>> {
    stream::iter(common::customers().into_iter().map(Ok))
}

#[tokio::test]
async fn stream_results_match_in_memory_results() {
    let engine = common::engine(ODataConfig::default());
    let target = engine.entity_set("Customers").unwrap();
    let cancel = CancellationToken::new();

    let streamed = engine
        .execute_stream(&target, "$filter=Books/$count eq 1", rows(), &cancel, None)
        .await
        .unwrap();
    let eager = engine
        .execute(&target, "$filter=Books/$count eq 1", &common::customers())
        .unwrap();
    assert_eq!(common::ids(&streamed), common::ids(&eager));
    assert_eq!(common::ids(&streamed), vec![1, 3]);
}

#[tokio::test]
async fn cancelled_token_stops_the_query() {
    let engine = common::engine(ODataConfig::default());
    let target = engine.entity_set("Customers").unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .execute_stream(&target, "", stream::pending(), &cancel, None)
        .await
        .unwrap_err();
    assert_eq!(err, Error::Execution(ExecutionError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn slow_stream_times_out() {
    let engine = common::engine(ODataConfig::default());
    let target = engine.entity_set("Customers").unwrap();
    let cancel = CancellationToken::new();
    let limit = Duration::from_millis(250);

    let err = engine
        .execute_stream(&target, "", stream::pending(), &cancel, Some(limit))
        .await
        .unwrap_err();
    assert_eq!(err, Error::Execution(ExecutionError::TimedOut(limit)));
}

#[tokio::test]
async fn source_errors_surface() {
    let engine = common::engine(ODataConfig::default());
    let target = engine.entity_set("Customers").unwrap();
    let cancel = CancellationToken::new();
    let failing = stream::iter(vec![Err(ExecutionError::Source("connection reset".to_owned()))]);

    let err = engine
        .execute_stream(&target, "", failing, &cancel, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("connection reset"));
}

#[tokio::test]
#[traced_test]
async fn truncation_is_logged() {
    let engine = common::engine(ODataConfig {
        query: QuerySettings {
            page_size: Some(1),
            ..QuerySettings::default()
        },
        ..ODataConfig::default()
    });
    let target = engine.entity_set("Customers").unwrap();
    let cancel = CancellationToken::new();

    let result = engine
        .execute_stream(&target, "", rows(), &cancel, None)
        .await
        .unwrap();
    assert_eq!(common::ids(&result), vec![1]);
    assert!(logs_contain("result truncated by server page size"));
}
