use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use refdata_bus_core::{BusMessage, InMemoryBus, MessagingBus};
use refdata_codec::{Codec, RmpCodec};
use refdata_entities::Currency;
use refdata_executor::{CommandExecutor, ConsumerFactory, TypedEntityHandler};
use refdata_stream_core::{ProducerMessage, StreamConsumer, StreamProducer};
use refdata_stream_memory::MemoryBroker;
use refdata_types::{
    cmd_action, topics, CommandResponse, CommandStatus, Deactivate, Upsert, HEADER_CMD_ACTION, HEADER_CORR_ID,
    HEADER_RESPONSE_TOPIC,
};

struct BrokerConsumerFactory {
    broker: MemoryBroker,
}

#[async_trait]
impl ConsumerFactory for BrokerConsumerFactory {
    async fn new_consumer(&self, group_id: &str) -> Box<dyn StreamConsumer> {
        Box::new(self.broker.consumer(group_id))
    }
}

fn new_executor(
    broker: &MemoryBroker,
    group_id: &str,
    producer_id: &str,
    bus: Arc<dyn MessagingBus>,
) -> (CommandExecutor<RmpCodec>, Arc<AtomicBool>) {
    let running = Arc::new(AtomicBool::new(true));
    let executor = CommandExecutor::new(
        RmpCodec,
        vec![Box::new(TypedEntityHandler::<Currency>::new())],
        Box::new(broker.consumer(group_id)),
        Arc::new(broker.producer(producer_id)),
        Arc::new(BrokerConsumerFactory { broker: broker.clone() }),
        bus,
        Arc::new(AtomicBool::new(false)),
        running.clone(),
    );
    (executor, running)
}

async fn send_command(
    broker: &MemoryBroker,
    action: &str,
    corr_id: Uuid,
    response_topic: &str,
    payload: Vec<u8>,
) {
    let msg = ProducerMessage::new(topics::command_topic("Currency"), corr_id.to_string(), payload.into())
        .with_header(HEADER_CMD_ACTION, action)
        .with_header(HEADER_CORR_ID, corr_id.to_string())
        .with_header(HEADER_RESPONSE_TOPIC, response_topic);
    broker.producer("writer").send(msg).await.unwrap();
}

fn currency() -> Currency {
    Currency { ccy_id: "USD".to_string(), name: "US Dollar".to_string(), decimal_places: 2, settlement_days: 2 }
}

/// Runs `executor.run()` for a short window then flips `running` false and
/// joins, returning whatever `run()` resolved to.
async fn run_briefly(
    mut executor: CommandExecutor<RmpCodec>,
    running: Arc<AtomicBool>,
) -> Result<(), refdata_executor::ExecutorError> {
    let handle = tokio::spawn(async move {
        let result = executor.run().await;
        (executor, result)
    });
    tokio::time::sleep(Duration::from_millis(120)).await;
    running.store(false, Ordering::SeqCst);
    let (_, result) = handle.await.unwrap();
    result
}

fn subscribe_responses(bus: &InMemoryBus, subject: &str) -> Arc<std::sync::Mutex<Vec<CommandResponse>>> {
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_clone = received.clone();
    std::mem::forget(bus.subscribe(
        subject,
        Arc::new(move |msg: BusMessage| {
            let response: CommandResponse = RmpCodec.decode(&msg.payload).unwrap();
            received_clone.lock().unwrap().push(response);
        }),
    ));
    received
}

#[tokio::test]
async fn upsert_of_a_new_entity_is_accepted_and_published() {
    let broker = MemoryBroker::new();
    let bus = InMemoryBus::new(64);
    let responses = subscribe_responses(&bus, "ARQ.Resp.test1");
    let corr_id = Uuid::new_v4();
    let target = Uuid::new_v4();
    let cmd = Upsert { target_uuid: target, data: currency(), updated_by: "alice".to_string(), expected_version: 0 };
    send_command(&broker, cmd_action::UPSERT, corr_id, "ARQ.Resp.test1", RmpCodec.encode(&cmd).unwrap()).await;

    let (mut executor, running) = new_executor(&broker, "g-s1", "p-s1", Arc::new(bus));
    executor.start().await.unwrap();
    run_briefly(executor, running).await.unwrap();

    assert_eq!(broker.topic_len(&topics::update_topic("Currency")).await, 1);
    let got = responses.lock().unwrap().clone();
    assert_eq!(got, vec![CommandResponse { corr_id, status: CommandStatus::Success, message: None }]);
}

#[tokio::test]
async fn second_upsert_with_correct_expected_version_bumps_to_two() {
    let broker = MemoryBroker::new();
    let bus = InMemoryBus::new(64);
    let responses = subscribe_responses(&bus, "ARQ.Resp.test2");
    let target = Uuid::new_v4();
    let first = Upsert { target_uuid: target, data: currency(), updated_by: "alice".to_string(), expected_version: 0 };
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test2", RmpCodec.encode(&first).unwrap()).await;
    let mut updated = currency();
    updated.decimal_places = 4;
    let second = Upsert { target_uuid: target, data: updated, updated_by: "bob".to_string(), expected_version: 1 };
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test2", RmpCodec.encode(&second).unwrap()).await;

    // Both commands land in the same poll batch: the second must observe
    // the first's still-uncommitted version bump via the batch's staged
    // output, not just the last-committed VersionStore.
    let (mut executor, running) = new_executor(&broker, "g-s2", "p-s2", Arc::new(bus));
    executor.start().await.unwrap();
    run_briefly(executor, running).await.unwrap();

    assert_eq!(broker.topic_len(&topics::update_topic("Currency")).await, 2);
    let got = responses.lock().unwrap().clone();
    assert_eq!(got.iter().filter(|r| r.status == CommandStatus::Success).count(), 2);
}

#[tokio::test]
async fn upsert_with_stale_expected_version_is_rejected_and_writes_nothing() {
    let broker = MemoryBroker::new();
    let bus = InMemoryBus::new(64);
    let responses = subscribe_responses(&bus, "ARQ.Resp.test3");
    let target = Uuid::new_v4();
    let first = Upsert { target_uuid: target, data: currency(), updated_by: "alice".to_string(), expected_version: 0 };
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test3", RmpCodec.encode(&first).unwrap()).await;
    let stale = Upsert { target_uuid: target, data: currency(), updated_by: "carol".to_string(), expected_version: 0 };
    let corr_id = Uuid::new_v4();
    send_command(&broker, cmd_action::UPSERT, corr_id, "ARQ.Resp.test3", RmpCodec.encode(&stale).unwrap()).await;

    let (mut executor, running) = new_executor(&broker, "g-s3", "p-s3", Arc::new(bus));
    executor.start().await.unwrap();
    run_briefly(executor, running).await.unwrap();

    assert_eq!(broker.topic_len(&topics::update_topic("Currency")).await, 1);
    let got = responses.lock().unwrap().clone();
    let rejection = got.iter().find(|r| r.corr_id == corr_id).expect("rejection response published");
    assert_eq!(rejection.status, CommandStatus::Rejected);
    assert!(rejection.message.as_ref().unwrap().contains("current=1"));
    assert!(rejection.message.as_ref().unwrap().contains("expected=0"));
}

#[tokio::test]
async fn deactivate_after_upsert_preserves_data_and_flips_is_active() {
    let broker = MemoryBroker::new();
    let bus: Arc<dyn MessagingBus> = Arc::new(InMemoryBus::new(64));
    let target = Uuid::new_v4();
    let upsert = Upsert { target_uuid: target, data: currency(), updated_by: "alice".to_string(), expected_version: 0 };
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test4", RmpCodec.encode(&upsert).unwrap()).await;
    let mut updated = currency();
    updated.decimal_places = 4;
    let upsert2 = Upsert { target_uuid: target, data: updated.clone(), updated_by: "bob".to_string(), expected_version: 1 };
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test4", RmpCodec.encode(&upsert2).unwrap()).await;

    let deactivate: Deactivate<Currency> =
        Deactivate { target_uuid: target, updated_by: "dave".to_string(), expected_version: 2, _entity: std::marker::PhantomData };
    send_command(&broker, cmd_action::DEACTIVATE, Uuid::new_v4(), "ARQ.Resp.test4", RmpCodec.encode(&deactivate).unwrap()).await;

    let (mut executor, running) = new_executor(&broker, "g-s4", "p-s4", bus);
    executor.start().await.unwrap();
    run_briefly(executor, running).await.unwrap();

    assert_eq!(broker.topic_len(&topics::update_topic("Currency")).await, 3);

    let mut consumer = broker.consumer("g-s4-reader");
    consumer.assign(&[(topics::update_topic("Currency"), 0), (topics::update_topic("Currency"), 1), (topics::update_topic("Currency"), 2), (topics::update_topic("Currency"), 3)]).await.unwrap();
    let mut records = Vec::new();
    for _ in 0..20 {
        if let refdata_stream_core::PollOutcome::Messages(batch) = consumer.poll(Duration::from_millis(5), true).await.unwrap() {
            for msg in batch {
                records.push(RmpCodec.decode::<refdata_types::Record<Currency>>(&msg.payload).unwrap());
            }
        }
        if records.len() == 3 {
            break;
        }
    }
    let last = records.iter().max_by_key(|r| r.header.version).unwrap();
    assert_eq!(last.header.version, 3);
    assert!(!last.header.is_active);
    assert_eq!(last.data, updated);
}

#[tokio::test]
async fn unknown_command_action_is_routed_to_dlq_with_no_response() {
    let broker = MemoryBroker::new();
    let bus = InMemoryBus::new(64);
    let responses = subscribe_responses(&bus, "ARQ.Resp.test5");
    let corr_id = Uuid::new_v4();
    send_command(&broker, "Frobnicate", corr_id, "ARQ.Resp.test5", vec![1, 2, 3]).await;

    let (mut executor, running) = new_executor(&broker, "g-s5", "p-s5", Arc::new(bus));
    executor.start().await.unwrap();
    run_briefly(executor, running).await.unwrap();

    assert_eq!(broker.topic_len(&topics::update_topic("Currency")).await, 0);
    assert_eq!(broker.topic_len(&topics::dlq_topic(&topics::command_topic("Currency"))).await, 1);
    assert!(responses.lock().unwrap().is_empty());
}

#[tokio::test]
async fn redelivered_duplicate_upsert_changes_version_exactly_once() {
    let broker = MemoryBroker::new();
    let bus = InMemoryBus::new(64);
    let responses = subscribe_responses(&bus, "ARQ.Resp.test6");
    let target = Uuid::new_v4();
    let cmd = Upsert { target_uuid: target, data: currency(), updated_by: "alice".to_string(), expected_version: 0 };
    let encoded = RmpCodec.encode(&cmd).unwrap();
    // Two deliveries of logically the same command land in one poll batch,
    // as a redelivery after a crash between the update send and the
    // consumer offset commit would. Cross-partition ordering within a
    // batch is not guaranteed, so either delivery may win; exactly one
    // must, never both.
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test6", encoded.clone()).await;
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test6", encoded).await;

    let (mut executor, running) = new_executor(&broker, "g-s6", "p-s6", Arc::new(bus));
    executor.start().await.unwrap();
    run_briefly(executor, running).await.unwrap();

    assert_eq!(broker.topic_len(&topics::update_topic("Currency")).await, 1);
    let got = responses.lock().unwrap().clone();
    assert_eq!(got.len(), 2);
    assert_eq!(got.iter().filter(|r| r.status == CommandStatus::Success).count(), 1);
    assert_eq!(got.iter().filter(|r| r.status == CommandStatus::Rejected).count(), 1);
}

#[tokio::test]
async fn a_fresh_consumer_group_hydrates_state_from_the_update_log() {
    let broker = MemoryBroker::new();
    let bus: Arc<dyn MessagingBus> = Arc::new(InMemoryBus::new(64));
    let target = Uuid::new_v4();
    let upsert = Upsert { target_uuid: target, data: currency(), updated_by: "alice".to_string(), expected_version: 0 };
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test7", RmpCodec.encode(&upsert).unwrap()).await;
    let mut updated = currency();
    updated.decimal_places = 4;
    let upsert2 = Upsert { target_uuid: target, data: updated, updated_by: "bob".to_string(), expected_version: 1 };
    send_command(&broker, cmd_action::UPSERT, Uuid::new_v4(), "ARQ.Resp.test7", RmpCodec.encode(&upsert2).unwrap()).await;

    let (mut executor, running) = new_executor(&broker, "g-s7-writer", "p-s7-writer", bus.clone());
    executor.start().await.unwrap();
    run_briefly(executor, running).await.unwrap();

    // A brand new consumer group joining from scratch must hydrate its
    // VersionStore from the update log before it is ready to serve.
    let (mut executor2, running2) = new_executor(&broker, "g-s7-fresh", "p-s7-fresh", bus);
    executor2.start().await.unwrap();
    let handle = tokio::spawn(async move {
        let result = executor2.run().await;
        (executor2, result)
    });
    tokio::time::sleep(Duration::from_millis(120)).await;
    running2.store(false, Ordering::SeqCst);
    let (executor2, result) = handle.await.unwrap();
    result.unwrap();

    assert!(executor2.is_ready());
    assert_eq!(executor2.tracked_entity_count(), 1);
}
