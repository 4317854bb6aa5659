//! Integration tests for the stream consumer against the in-memory log.

use futures::StreamExt;
use shardflow_consumer::{
    BackoffConfig, ChannelObserver, LogError, LogOperation, MemoryLog, ShardEvent,
    StreamConsumer, StreamConsumerConfig, StreamError,
};
use shardflow_protocol::{
    AttributeValue, ChangeKind, ChangeRecord, Checkpoint, IteratorPolicy, Item, ItemChange,
};
use shardflow_testkit::fixtures::{by_shard, init_tracing, TestStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, sleep_until, timeout, Instant};

const STREAM: &str = "orders";

/// A stream of `shards` shards, each holding `records` numbered records.
fn seeded(shards: usize, records: usize) -> TestStream {
    TestStream::named(STREAM, shards).with_records(records)
}

fn value(record: &ChangeRecord) -> u32 {
    let bytes = record.payload.as_bytes().unwrap();
    u32::from_be_bytes(bytes[..4].try_into().unwrap())
}

fn encode(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

fn trim_horizon() -> StreamConsumerConfig {
    StreamConsumerConfig::new(IteratorPolicy::TrimHorizon)
}

async fn next_failure(events: &mut UnboundedReceiver<ShardEvent>) -> ShardEvent {
    loop {
        let event = events.recv().await.unwrap();
        if matches!(event, ShardEvent::Failed { .. }) {
            return event;
        }
    }
}

#[tokio::test]
async fn trim_horizon_reads_pre_inserted_records_in_order() {
    init_tracing();
    let stream = seeded(1, 5);

    let consumer = stream.consumer(trim_horizon()).unwrap();
    consumer.ready().await.unwrap();

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(value(&consumer.next().await.unwrap()));
    }
    assert_eq!(received, vec![0, 1, 2, 3, 4]);

    consumer.close().await;
}

#[tokio::test]
async fn record_limit_bounds_batches_not_throughput() {
    let stream = seeded(1, 5);

    let consumer = stream
        .consumer(trim_horizon().with_get_records_limit(1))
        .unwrap();
    consumer.ready().await.unwrap();

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(value(&consumer.next().await.unwrap()));
    }
    assert_eq!(received, vec![0, 1, 2, 3, 4]);
    let calls = stream
        .log
        .call_count(LogOperation::GetRecords, Some(&stream.shards[0]));
    assert!(calls >= 5);
    assert!(consumer.stats().polls >= 5);

    consumer.close().await;
}

#[tokio::test(start_paused = true)]
async fn latest_skips_existing_records() {
    let stream = seeded(1, 5);

    let consumer = stream
        .consumer(StreamConsumerConfig::new(IteratorPolicy::Latest))
        .unwrap();
    consumer.ready().await.unwrap();

    let raced = timeout(Duration::from_secs(3), consumer.next()).await;
    assert!(raced.is_err(), "LATEST must not replay existing records");

    consumer.close().await;
}

#[tokio::test(start_paused = true)]
async fn latest_delivers_new_writes() {
    let stream = seeded(1, 2);

    let consumer = stream
        .consumer(StreamConsumerConfig::new(IteratorPolicy::Latest))
        .unwrap();
    consumer.ready().await.unwrap();

    stream.put(&stream.shards[0], encode(42));
    let record = timeout(Duration::from_secs(10), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value(&record), 42);

    consumer.close().await;
}

#[tokio::test]
async fn next_before_ready_waits_for_startup() {
    init_tracing();
    let stream = seeded(2, 1);
    stream.log.set_latency(Duration::from_millis(50));

    let consumer = stream.consumer(trim_horizon()).unwrap();
    let record = timeout(Duration::from_secs(5), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert!(stream.shards.contains(&record.shard_id));
    assert_eq!(value(&record), 0);
    assert_eq!(consumer.ready().await, Ok(()));

    consumer.close().await;
    assert_eq!(consumer.active_pollers(), 0);
}

#[tokio::test]
async fn failed_shard_does_not_stop_healthy_shards() {
    init_tracing();
    let stream = seeded(2, 3);
    let shards = &stream.shards;
    stream.log.inject_fault(
        LogOperation::GetRecords,
        Some(shards[0].clone()),
        LogError::ShardGone(shards[0].clone()),
    );

    let (observer, mut events) = ChannelObserver::new();
    let consumer = StreamConsumer::start_with_observer(
        Arc::clone(&stream.log),
        STREAM,
        trim_horizon(),
        Arc::new(observer),
    )
    .unwrap();
    consumer.ready().await.unwrap();

    for expected in 0..3 {
        let record = consumer.next().await.unwrap();
        assert_eq!(record.shard_id, shards[1]);
        assert_eq!(value(&record), expected);
    }

    match next_failure(&mut events).await {
        ShardEvent::Failed { shard_id, error } => {
            assert_eq!(shard_id, shards[0]);
            assert!(matches!(error, LogError::ShardGone(_)));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(consumer.stats().shards_failed, 1);

    consumer.close().await;
}

#[tokio::test(start_paused = true)]
async fn expired_iterator_fails_only_that_shard() {
    let stream = TestStream::named(STREAM, 2);
    let shards = &stream.shards;

    let (observer, mut events) = ChannelObserver::new();
    let config = StreamConsumerConfig::new(IteratorPolicy::Latest).with_poll_backoff(
        BackoffConfig::new(Duration::from_millis(100), Duration::from_millis(100), 1.0),
    );
    let consumer = StreamConsumer::start_with_observer(
        Arc::clone(&stream.log),
        STREAM,
        config,
        Arc::new(observer),
    )
    .unwrap();
    consumer.ready().await.unwrap();

    stream.log.expire_iterators(&shards[0]);
    match next_failure(&mut events).await {
        ShardEvent::Failed { shard_id, error } => {
            assert_eq!(shard_id, shards[0]);
            assert_eq!(error, LogError::ExpiredIterator);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // No reacquire: the shard stays failed while its sibling keeps reading.
    stream.put(&shards[1], encode(7));
    let record = timeout(Duration::from_secs(5), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.shard_id, shards[1]);
    assert_eq!(value(&record), 7);
    assert_eq!(consumer.active_pollers(), 1);
    assert_eq!(
        stream
            .log
            .call_count(LogOperation::GetShardIterator, Some(&shards[0])),
        1
    );

    consumer.close().await;
}

#[tokio::test]
async fn gone_shard_at_iterator_acquisition_still_becomes_ready() {
    let stream = seeded(2, 1);
    stream.log.inject_fault(
        LogOperation::GetShardIterator,
        Some(stream.shards[1].clone()),
        LogError::ShardGone(stream.shards[1].clone()),
    );

    let consumer = stream.consumer(trim_horizon()).unwrap();
    consumer.ready().await.unwrap();

    let record = consumer.next().await.unwrap();
    assert_eq!(record.shard_id, stream.shards[0]);
    consumer.close().await;
}

#[tokio::test]
async fn missing_stream_rejects_readiness_and_ends_sequence() {
    let log = Arc::new(MemoryLog::new());
    let consumer = StreamConsumer::start(log, "no-such-table", StreamConsumerConfig::default())
        .unwrap();

    let err = consumer.ready().await.unwrap_err();
    assert!(matches!(
        err,
        StreamError::Discovery {
            source: LogError::NotFound(_),
            ..
        }
    ));
    assert!(consumer.next().await.is_none());
    consumer.close().await;
}

#[tokio::test]
async fn per_shard_order_is_preserved_when_merged() {
    let stream = seeded(4, 25);
    stream.close_all();

    let config = trim_horizon()
        .with_get_records_limit(7)
        .with_buffer_capacity(5);
    let consumer = stream.consumer(config).unwrap();
    consumer.ready().await.unwrap();

    let records: Vec<_> = consumer.records().collect().await;
    assert_eq!(records.len(), 100);

    let grouped = by_shard(&records);
    assert_eq!(grouped.len(), 4);
    for sequence in grouped.values() {
        assert_eq!(sequence.len(), 25);
        assert!(sequence.windows(2).all(|w| w[0] < w[1]));
    }

    // All shards closed: the sequence ended on its own.
    assert!(consumer.next().await.is_none());
    assert_eq!(consumer.active_pollers(), 0);
    assert_eq!(consumer.stats().shards_exhausted, 4);
    consumer.close().await;
}

#[tokio::test]
async fn buffer_never_exceeds_capacity() {
    let stream = seeded(3, 20);

    let consumer = stream
        .consumer(trim_horizon().with_buffer_capacity(4))
        .unwrap();
    consumer.ready().await.unwrap();

    sleep(Duration::from_millis(50)).await;
    assert!(consumer.buffered() <= 4);
    assert!(consumer.stats().records_published <= 4);

    for _ in 0..60 {
        assert!(consumer.buffered() <= 4);
        consumer.next().await.unwrap();
    }
    assert_eq!(consumer.stats().records_delivered, 60);
    consumer.close().await;
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped_and_resets_on_data() {
    let stream = TestStream::named(STREAM, 1);
    let shard = stream.shards[0].clone();

    let config = StreamConsumerConfig::new(IteratorPolicy::Latest).with_poll_backoff(
        BackoffConfig::new(Duration::from_millis(100), Duration::from_millis(400), 2.0),
    );
    let start = Instant::now();
    let consumer = stream.consumer(config).unwrap();
    consumer.ready().await.unwrap();
    let calls = || stream.log.call_count(LogOperation::GetRecords, Some(&shard));

    // Idle polls at 0, 100, 300, 700, then every 400ms once capped.
    sleep_until(start + Duration::from_millis(1050)).await;
    let before = calls();
    sleep_until(start + Duration::from_millis(5050)).await;
    assert_eq!(calls() - before, 10);

    // Data resets the streak: the next idle poll comes after `initial`.
    stream.put(&shard, encode(1));
    consumer.next().await.unwrap();
    sleep_until(start + Duration::from_millis(5150)).await;
    let after_data = calls();
    sleep_until(start + Duration::from_millis(5250)).await;
    assert_eq!(calls(), after_data + 1);

    consumer.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_is_prompt_and_idempotent() {
    let stream = seeded(3, 0);

    let config = StreamConsumerConfig::new(IteratorPolicy::Latest).with_poll_backoff(
        BackoffConfig::new(Duration::from_secs(30), Duration::from_secs(30), 1.0),
    );
    let consumer = stream.consumer(config).unwrap();
    consumer.ready().await.unwrap();
    assert_eq!(consumer.active_pollers(), 3);

    let started = Instant::now();
    consumer.close().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(consumer.active_pollers(), 0);
    assert!(consumer.is_closed());

    let stats = consumer.stats();
    consumer.close().await;
    assert_eq!(consumer.stats(), stats);
    assert_eq!(consumer.active_pollers(), 0);
    assert!(consumer.next().await.is_none());
    assert!(consumer.next().await.is_none());
}

#[tokio::test]
async fn close_during_slow_discovery_is_prompt() {
    let stream = seeded(1, 1);
    stream.log.set_latency(Duration::from_secs(30));

    let consumer = stream.consumer(trim_horizon()).unwrap();
    sleep(Duration::from_millis(20)).await;

    timeout(Duration::from_secs(1), consumer.close())
        .await
        .expect("close waited on discovery");
    assert_eq!(consumer.ready().await, Err(StreamError::Closed));
    assert_eq!(consumer.active_pollers(), 0);
    assert!(consumer.next().await.is_none());
}

#[tokio::test]
async fn close_abandons_in_flight_reads() {
    let stream = TestStream::named(STREAM, 2);

    let config = StreamConsumerConfig::new(IteratorPolicy::Latest).with_poll_backoff(
        BackoffConfig::new(Duration::from_millis(5), Duration::from_millis(5), 1.0),
    );
    let consumer = stream.consumer(config).unwrap();
    consumer.ready().await.unwrap();
    assert_eq!(consumer.active_pollers(), 2);

    // Every poller is now parked inside a slow `get_records`.
    stream.log.set_latency(Duration::from_secs(30));
    sleep(Duration::from_millis(100)).await;

    timeout(Duration::from_secs(1), consumer.close())
        .await
        .expect("close waited on an in-flight read");
    assert_eq!(consumer.active_pollers(), 0);
}

#[tokio::test]
async fn close_wakes_a_waiting_reader() {
    let stream = seeded(1, 0);
    let consumer = Arc::new(
        stream
            .consumer(StreamConsumerConfig::new(IteratorPolicy::Latest))
            .unwrap(),
    );
    consumer.ready().await.unwrap();

    let reader = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.next().await })
    };
    sleep(Duration::from_millis(20)).await;
    consumer.close().await;

    assert!(reader.await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn rediscovery_picks_up_child_shards() {
    let stream = seeded(1, 1);

    let config = trim_horizon().with_rediscovery_interval(Duration::from_millis(500));
    let consumer = stream.consumer(config).unwrap();
    consumer.ready().await.unwrap();
    assert_eq!(value(&consumer.next().await.unwrap()), 0);

    let child = stream.log.split_shard(STREAM, &stream.shards[0]).unwrap();
    stream.put(&child, encode(9));

    let record = timeout(Duration::from_secs(5), consumer.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.shard_id, child);
    assert_eq!(value(&record), 9);
    assert_eq!(consumer.known_shards(), 2);
    assert!(consumer.stats().rediscovery_passes >= 1);

    consumer.close().await;
}

#[tokio::test]
async fn checkpoint_resumes_after_last_delivered_record() {
    let stream = seeded(1, 5);

    let first = stream.consumer(trim_horizon()).unwrap();
    first.ready().await.unwrap();
    for _ in 0..3 {
        first.next().await.unwrap();
    }
    let checkpoint = first.positions();
    first.close().await;

    let restored = Checkpoint::decode(&checkpoint.encode().unwrap()).unwrap();
    let second = stream
        .consumer(trim_horizon().with_checkpoint(restored))
        .unwrap();
    second.ready().await.unwrap();

    assert_eq!(value(&second.next().await.unwrap()), 3);
    assert_eq!(value(&second.next().await.unwrap()), 4);
    second.close().await;
}

#[tokio::test]
async fn item_changes_pass_through() {
    let stream = TestStream::named(STREAM, 1);

    let mut keys = Item::new();
    keys.insert("id".into(), AttributeValue::from("order-1"));
    let mut image = keys.clone();
    image.insert("total".into(), AttributeValue::from(25i64));
    stream.put_item(
        &stream.shards[0],
        ItemChange::insert(keys.clone(), image.clone()),
    );

    let consumer = stream.consumer(trim_horizon()).unwrap();
    consumer.ready().await.unwrap();

    let record = consumer.next().await.unwrap();
    let change = record.payload.as_item().unwrap();
    assert_eq!(change.kind, ChangeKind::Insert);
    assert_eq!(change.keys, keys);
    assert_eq!(change.new_image.as_ref(), Some(&image));
    consumer.close().await;
}
