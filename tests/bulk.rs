mod common;

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use es_bulk_writer::conf::BulkConfig;
use es_bulk_writer::models::cluster_error::ClusterErrorKind;
use es_bulk_writer::{BulkError, BulkOutcome, BulkWriter, EsClient, ItemOutcome, Record, RetryPolicy, TransportError};

use common::{connect, connection, requests, start_node, BulkEcho};

fn records() -> Vec<Record> {
    vec![
        Record::new(r#"{"id":1,"name":"Jack","age":23}"#),
        Record::with_id("5", r#"{"id":2,"name":"Jack1","age":30}"#),
        Record::with_id("2", r#"{"id":3,"name":"Jack3","age":32}"#),
    ]
}

async fn mount_bulk(server: &MockServer, conflicts: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("content-type", "application/x-ndjson"))
        .respond_with(BulkEcho::new(conflicts))
        .mount(server)
        .await;
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_millis(10))
}

#[tokio::test]
async fn empty_input_is_a_no_op() {
    let server = start_node("8.11.1").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let writer = BulkWriter::new(connect(&server).await);

    let outcome = writer.insert("orders", "_doc", &[]).await.unwrap();

    assert_eq!(outcome, BulkOutcome::NoOp);
}

#[tokio::test]
async fn results_align_with_input_positions() {
    let server = start_node("8.11.1").await;
    mount_bulk(&server, &["2"]).await;
    let writer = BulkWriter::new(connect(&server).await);

    let outcome = writer.insert("orders", "_doc", &records()).await.unwrap();

    let items = outcome.items();
    assert_eq!(items.len(), 3);
    assert!(items[0].is_success());
    assert!(items[0].get_id().unwrap().starts_with("auto-"));
    assert!(items[1].is_success());
    assert_eq!(items[1].get_id(), Some("5"));
    assert_eq!(items[2].get_id(), Some("2"));
    assert_eq!(items[2].get_status(), 409);
    assert!(matches!(
        items[2].get_outcome(),
        ItemOutcome::Failure { kind: ClusterErrorKind::VersionConflict, .. }
    ));
    assert_eq!(outcome.failures(), 1);
}

#[tokio::test]
async fn typeless_cluster_gets_no_type_in_actions() {
    let server = start_node("8.11.1").await;
    mount_bulk(&server, &[]).await;
    let writer = BulkWriter::new(connect(&server).await);

    writer.insert("orders", "order", &records()).await.unwrap();

    let bulk = requests(&[&server], "POST", "/_bulk").await;
    let body = String::from_utf8(bulk[0].body.clone()).unwrap();
    let action: Value = serde_json::from_str(body.lines().next().unwrap()).unwrap();
    assert_eq!(action, json!({ "index": { "_index": "orders" } }));
}

#[tokio::test]
async fn legacy_cluster_gets_type_in_actions() {
    let server = start_node("6.8.23").await;
    mount_bulk(&server, &[]).await;
    let writer = BulkWriter::new(connect(&server).await);

    writer.insert("orders", "order", &records()).await.unwrap();

    let bulk = requests(&[&server], "POST", "/_bulk").await;
    let body = String::from_utf8(bulk[0].body.clone()).unwrap();
    let actions: Vec<Value> = body
        .lines()
        .step_by(2)
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(actions[0], json!({ "index": { "_index": "orders", "_type": "order" } }));
    assert_eq!(
        actions[2],
        json!({ "index": { "_index": "orders", "_type": "order", "_id": "2" } })
    );
}

#[tokio::test]
async fn overloaded_cluster_is_retried() {
    let server = start_node("8.11.1").await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "type": "es_rejected_execution_exception", "reason": "rejected execution of bulk" },
            "status": 429
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_bulk(&server, &[]).await;
    let writer = BulkWriter::new(connect(&server).await).with_retry(quick_retry());

    let outcome = writer.insert("orders", "_doc", &records()).await.unwrap();

    assert_eq!(outcome.items().len(), 3);
    assert_eq!(requests(&[&server], "POST", "/_bulk").await.len(), 2);
}

#[tokio::test]
async fn retries_are_bounded() {
    let server = start_node("8.11.1").await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;
    let writer = BulkWriter::new(connect(&server).await).with_retry(quick_retry());

    let result = writer.insert("orders", "_doc", &records()).await;

    assert!(matches!(result, Err(BulkError::Rejected { status: 503, .. })));
}

#[tokio::test]
async fn cluster_block_is_classified_and_not_retried() {
    let server = start_node("8.11.1").await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "root_cause": [],
                "type": "cluster_block_exception",
                "reason": "index [orders] blocked by: [FORBIDDEN/12/index read-only / allow delete (api)];"
            },
            "status": 403
        })))
        .expect(1)
        .mount(&server)
        .await;
    let writer = BulkWriter::new(connect(&server).await).with_retry(quick_retry());

    match writer.insert("orders", "_doc", &records()).await {
        Err(BulkError::Rejected { kind, status, reason }) => {
            assert_eq!(kind, ClusterErrorKind::ClusterBlock);
            assert_eq!(status, 403);
            assert!(reason.contains("read-only"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn invalid_record_is_rejected_locally() {
    let server = start_node("8.11.1").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let writer = BulkWriter::new(connect(&server).await);
    let mut input = records();
    input.insert(1, Record::with_id("9", ""));

    let result = writer.insert("orders", "_doc", &input).await;

    assert!(matches!(result, Err(BulkError::InvalidRecord { position: 1, .. })));
}

#[tokio::test]
async fn short_response_is_misaligned() {
    let server = start_node("8.11.1").await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "took": 1,
            "errors": false,
            "items": [ { "index": { "_index": "orders", "_id": "a", "status": 201, "result": "created" } } ]
        })))
        .mount(&server)
        .await;
    let writer = BulkWriter::new(connect(&server).await);

    let result = writer.insert("orders", "_doc", &records()).await;

    assert!(matches!(
        result,
        Err(BulkError::MisalignedResponse { expected: 3, actual: 1 })
    ));
}

#[tokio::test]
async fn batched_insert_keeps_global_order() {
    let server = start_node("8.11.1").await;
    mount_bulk(&server, &["4"]).await;
    let config: BulkConfig = serde_json::from_value(json!({ "batch_size": 2 })).unwrap();
    let writer = BulkWriter::with_config(connect(&server).await, &config);
    let input: Vec<Record> = (0..5)
        .map(|i| Record::with_id(&i.to_string(), &format!(r#"{{"n":{}}}"#, i)))
        .collect();

    let outcome = writer.insert_batched("orders", "_doc", &input).await.unwrap();

    let ids: Vec<&str> = outcome.items().iter().filter_map(|item| item.get_id()).collect();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    assert!(!outcome.items()[4].is_success());
    assert_eq!(requests(&[&server], "POST", "/_bulk").await.len(), 3);
}

#[tokio::test]
async fn padded_id_is_sent_verbatim() {
    let server = start_node("8.11.1").await;
    mount_bulk(&server, &[]).await;
    let writer = BulkWriter::new(connect(&server).await);

    let outcome = writer
        .insert("orders", "_doc", &[Record::with_id(" 2 ", r#"{"name":"Jack"}"#)])
        .await
        .unwrap();

    let bulk = requests(&[&server], "POST", "/_bulk").await;
    let body = String::from_utf8(bulk[0].body.clone()).unwrap();
    let action: Value = serde_json::from_str(body.lines().next().unwrap()).unwrap();
    assert_eq!(action["index"]["_id"], " 2 ");
    assert_eq!(outcome.items()[0].get_id(), Some(" 2 "));
}

#[tokio::test]
async fn timed_out_bulk_request_is_not_resent() {
    let server = start_node("8.11.1").await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let config = connection(&[&server]).with_request_timeout(Duration::from_millis(200));
    let client = EsClient::connect(&config).await.unwrap();
    let writer = BulkWriter::new(client).with_retry(quick_retry());

    let result = writer.insert("orders", "_doc", &[Record::new(r#"{"name":"Jack"}"#)]).await;

    assert!(matches!(
        result,
        Err(BulkError::Transport(TransportError::Timeout(_)))
    ));
    assert_eq!(requests(&[&server], "POST", "/_bulk").await.len(), 1);
}

#[tokio::test]
async fn failed_batch_reports_records_already_written() {
    let server = start_node("8.11.1").await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(body_string_contains(r#""_id":"2""#))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "type": "cluster_block_exception", "reason": "index [orders] blocked" },
            "status": 403
        })))
        .mount(&server)
        .await;
    mount_bulk(&server, &[]).await;
    let config: BulkConfig = serde_json::from_value(json!({ "batch_size": 2 })).unwrap();
    let writer = BulkWriter::with_config(connect(&server).await, &config);
    let input: Vec<Record> = (0..5)
        .map(|i| Record::with_id(&i.to_string(), &format!(r#"{{"n":{}}}"#, i)))
        .collect();

    match writer.insert_batched("orders", "_doc", &input).await {
        Err(BulkError::BatchFailed { batch, written, source }) => {
            assert_eq!(batch, 1);
            let ids: Vec<&str> = written.iter().filter_map(|item| item.get_id()).collect();
            assert_eq!(ids, vec!["0", "1"]);
            assert!(matches!(
                *source,
                BulkError::Rejected { kind: ClusterErrorKind::ClusterBlock, .. }
            ));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(requests(&[&server], "POST", "/_bulk").await.len(), 2);
}
