// Block producer lifecycle tests
use agc_chain::consensus::{BlockProducer, ProducerConfig, ProducerState};
use agc_chain::{
    Address, ChainError, ExecutionEngine, Ledger, Policy, Transaction, Validator, ValidatorRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

fn addr(seed: &str) -> Address {
    Address::from_public_key(seed.as_bytes())
}

fn batch_channel(capacity: usize) -> (mpsc::Sender<Vec<Transaction>>, mpsc::Receiver<Vec<Transaction>>) {
    mpsc::channel(capacity)
}

async fn producer(interval_ms: u64, announcement_capacity: usize) -> (Arc<Ledger>, Arc<BlockProducer>) {
    let ledger = Arc::new(Ledger::new());
    let validators = Arc::new(ValidatorRegistry::new());
    validators
        .add_validator(Validator::new(addr("validator"), vec![1; 32], Policy::MIN_VALIDATOR_STAKE, 0.0))
        .await
        .unwrap();
    let producer = BlockProducer::new(
        ledger.clone(),
        validators,
        Arc::new(ExecutionEngine::new()),
        ProducerConfig {
            block_interval: Duration::from_millis(interval_ms),
            announcement_capacity,
        },
    );
    (ledger, Arc::new(producer))
}

#[tokio::test]
async fn test_heights_are_monotonic_and_linked() {
    let (_, producer) = producer(10, 64).await;
    let mut blocks = producer.subscribe().await;
    let (_batches, rx) = batch_channel(1);

    producer.start(addr("validator"), rx).await.unwrap();
    let mut received = Vec::new();
    while received.len() < 5 {
        received.push(blocks.recv().await.unwrap());
    }
    producer.stop().await.unwrap();

    for pair in received.windows(2) {
        assert_eq!(pair[1].height(), pair[0].height() + 1);
        assert_eq!(*pair[1].previous_hash(), pair[0].hash());
    }
    assert_eq!(received[0].height(), 1);
}

#[tokio::test]
async fn test_empty_ticks_still_produce_blocks() {
    let (ledger, producer) = producer(10, 64).await;
    let mut blocks = producer.subscribe().await;
    let (_batches, rx) = batch_channel(1);

    producer.start(addr("validator"), rx).await.unwrap();
    let block = blocks.recv().await.unwrap();
    producer.stop().await.unwrap();

    assert!(block.transactions().is_empty());
    assert!(ledger.get_account(&addr("validator")).await.balance >= Policy::BLOCK_REWARD);
}

#[tokio::test]
async fn test_batches_are_consumed_in_order() {
    let (ledger, producer) = producer(10, 64).await;
    ledger.set_balance(addr("a"), 100).await;
    let mut blocks = producer.subscribe().await;
    let (batches, rx) = batch_channel(4);

    batches
        .send(vec![Transaction::transfer(addr("a"), addr("b"), 60, 0, 1)])
        .await
        .unwrap();
    batches
        .send(vec![Transaction::transfer(addr("a"), addr("c"), 60, 1, 1)])
        .await
        .unwrap();

    producer.start(addr("validator"), rx).await.unwrap();
    let first = blocks.recv().await.unwrap();
    let second = blocks.recv().await.unwrap();
    producer.stop().await.unwrap();

    assert_eq!(first.transactions().len(), 1);
    // Insufficient balance: dropped, not requeued
    assert!(second.transactions().is_empty());
    assert_eq!(ledger.get_account(&addr("b")).await.balance, 60);
    assert_eq!(ledger.get_account(&addr("c")).await.balance, 0);
}

#[tokio::test]
async fn test_no_blocks_after_stop() {
    let (_, producer) = producer(10, 64).await;
    let mut blocks = producer.subscribe().await;
    let (_batches, rx) = batch_channel(1);

    producer.start(addr("validator"), rx).await.unwrap();
    blocks.recv().await.unwrap();
    producer.stop().await.unwrap();
    let height = producer.height().await;

    // Drain what was announced before stop, then the channel is closed
    loop {
        match blocks.recv().await {
            Ok(block) => assert!(block.height() <= height),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(producer.height().await, height);
    assert_eq!(producer.state().await, ProducerState::Idle);
}

#[tokio::test]
async fn test_slow_subscriber_does_not_stall_production() {
    let (_, producer) = producer(5, 2).await;
    let mut slow = producer.subscribe().await;
    let (_batches, rx) = batch_channel(1);

    producer.start(addr("validator"), rx).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    producer.stop().await.unwrap();

    assert!(producer.height().await > 2);
    assert!(matches!(slow.recv().await, Err(RecvError::Lagged(_))));
}

#[tokio::test]
async fn test_restart_after_stop() {
    let (_, producer) = producer(10, 64).await;

    let (_first, rx) = batch_channel(1);
    producer.start(addr("validator"), rx).await.unwrap();
    let (_second, rx2) = batch_channel(1);
    assert!(matches!(
        producer.start(addr("validator"), rx2).await,
        Err(ChainError::Lifecycle(_))
    ));
    producer.stop().await.unwrap();

    let mut blocks = producer.subscribe().await;
    let (_third, rx3) = batch_channel(1);
    producer.start(addr("validator"), rx3).await.unwrap();
    let block = blocks.recv().await.unwrap();
    producer.stop().await.unwrap();
    assert!(block.height() >= 1);
}
