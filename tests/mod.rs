use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod utils;
use utils::{message, FlakyStore, MockAdapter};

use bridgewatch::{
    store::{InMemoryStore, JsonStore},
    Chain, Cursor, CycleFailure, CycleOutcome, Orchestrator, Store, Watcher, WatcherConfig,
    WatcherError,
};

/// Ticks until the watcher has caught up with the finalized watermark.
async fn catch_up<S: Store>(watcher: &mut Watcher<MockAdapter, S>) -> eyre::Result<()> {
    while watcher.tick().await?.is_behind() {}
    Ok(())
}

#[tokio::test]
async fn test_finalized_jump_stores_new_messages() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let adapter = MockAdapter::new(Chain::Polygon, 100)
        .with_initial(100)
        .with_messages(101, 1)
        .with_messages(103, 2);
    let mut watcher = Watcher::new(adapter, InMemoryStore::new());

    let outcome = watcher.tick().await?;
    assert!(matches!(outcome, CycleOutcome::Explored { from: 100, to: 100, stored: 0, .. }));

    watcher.adapter().set_finalized(103);
    let outcome = watcher.tick().await?;
    info!(?outcome, "Cycle after finalized jump");
    assert!(matches!(outcome, CycleOutcome::Explored { from: 101, to: 103, stored: 3, .. }));

    let store = watcher.store();
    assert_eq!(store.messages(Chain::Polygon).await.len(), 3);
    assert_eq!(store.last_observed(Chain::Polygon).await?, Some(message(Chain::Polygon, 103, 1)));

    Ok(())
}

#[tokio::test]
async fn test_fetch_error_is_retried_with_the_same_range() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let adapter = MockAdapter::new(Chain::Avalanche, 20).with_initial(10).with_messages(15, 2);
    adapter.fetch_failures.store(1, Ordering::SeqCst);
    let mut watcher = Watcher::new(adapter, InMemoryStore::new());

    let outcome = watcher.tick().await?;
    assert!(matches!(outcome, CycleOutcome::Failed(CycleFailure::Messages { from: 10, .. })));
    assert_eq!(watcher.state().cursor, Cursor::Next(10));
    assert_eq!(watcher.state().consecutive_failures, 1);

    let outcome = watcher.tick().await?;
    assert!(matches!(outcome, CycleOutcome::Explored { from: 10, to: 20, stored: 2, .. }));
    assert_eq!(watcher.state().consecutive_failures, 0);

    assert_eq!(watcher.adapter().ranges(), vec![(10, 20), (10, 20)]);
    assert_eq!(watcher.store().messages(Chain::Avalanche).await, watcher.adapter().expected(20));

    Ok(())
}

#[tokio::test]
async fn test_store_failure_does_not_advance() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let adapter = MockAdapter::new(Chain::Fantom, 9).with_initial(0).with_messages(4, 1);
    let store = FlakyStore::default();
    store.merge_failures.store(2, Ordering::SeqCst);
    let mut watcher = Watcher::new(adapter, store);

    for _ in 0..2 {
        let outcome = watcher.tick().await?;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleFailure::Store { from: 0, to: 9, .. })
        ));
        assert_eq!(watcher.state().cursor, Cursor::Next(0));
        assert_eq!(watcher.store().last_observed(Chain::Fantom).await?, None);
    }

    let outcome = watcher.tick().await?;
    assert!(matches!(outcome, CycleOutcome::Explored { from: 0, to: 9, stored: 1, .. }));
    assert_eq!(watcher.state().cursor, Cursor::Next(10));
    assert_eq!(watcher.store().merges.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_range_completeness() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut adapter = MockAdapter::new(Chain::Arbitrum, 349).with_initial(50).with_batch_size(37);
    for watermark in 50..=349 {
        adapter = adapter.with_messages(watermark, 1);
    }
    let mut watcher = Watcher::new(adapter, InMemoryStore::new());
    catch_up(&mut watcher).await?;

    let ranges = watcher.adapter().ranges();
    assert_eq!(ranges.first().map(|range| range.0), Some(50));
    assert_eq!(ranges.last().map(|range| range.1), Some(349));
    for pair in ranges.windows(2) {
        assert_eq!(pair[1].0, pair[0].1 + 1);
        assert!(pair[0].1 - pair[0].0 < 37);
    }

    let stored = watcher.store().messages(Chain::Arbitrum).await;
    let watermarks: Vec<u64> = stored.iter().map(|message| message.watermark).collect();
    assert_eq!(watermarks, (50..=349).collect::<Vec<_>>());

    Ok(())
}

fn busy_chain() -> MockAdapter {
    MockAdapter::new(Chain::Klaytn, 60)
        .with_initial(1)
        .with_batch_size(7)
        .with_messages(3, 2)
        .with_messages(8, 1)
        .with_messages(21, 3)
        .with_messages(22, 1)
        .with_messages(40, 1)
        .with_messages(59, 2)
}

#[tokio::test]
async fn test_crash_resume_matches_uninterrupted_run() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut uninterrupted = Watcher::new(busy_chain(), InMemoryStore::new());
    catch_up(&mut uninterrupted).await?;
    let expected = uninterrupted.store().messages(Chain::Klaytn).await;
    assert_eq!(expected, busy_chain().expected(60));

    let store = Arc::new(FlakyStore::default());

    // Explore a few ranges, fail a merge mid-way, then drop the watcher without catching up.
    let mut first = Watcher::new(busy_chain(), store.clone());
    for _ in 0..3 {
        first.tick().await?;
    }
    store.merge_failures.store(1, Ordering::SeqCst);
    assert!(matches!(first.tick().await?, CycleOutcome::Failed(_)));
    drop(first);

    let resumed_from = store.last_observed(Chain::Klaytn).await?.map(|last| last.watermark);
    assert_eq!(resumed_from, Some(21));

    let mut second = Watcher::new(busy_chain(), store.clone());
    catch_up(&mut second).await?;
    assert_eq!(second.adapter().ranges().first(), Some(&(22, 28)));

    assert_eq!(store.inner.messages(Chain::Klaytn).await, expected);
    assert_eq!(
        store.last_observed(Chain::Klaytn).await?,
        uninterrupted.store().last_observed(Chain::Klaytn).await?
    );

    Ok(())
}

#[tokio::test]
async fn test_resubmission_causes_no_drift() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir()?;
    let json = JsonStore::open(dir.path().join("db.json"), dir.path().join("last.json")).await?;
    let memory = InMemoryStore::new();

    let stored = message(Chain::Celo, 7, 0);
    let batch = vec![stored.clone(), message(Chain::Celo, 7, 1), message(Chain::Celo, 8, 0)];

    json.merge(Chain::Celo, vec![stored.clone()]).await?;
    json.merge(Chain::Celo, batch.clone()).await?;
    memory.merge(Chain::Celo, vec![stored.clone()]).await?;
    memory.merge(Chain::Celo, batch.clone()).await?;

    for messages in [json.messages(Chain::Celo).await, memory.messages(Chain::Celo).await] {
        assert_eq!(messages.len(), 3);
        assert_eq!(messages, batch);
    }

    // Replaying an older batch neither adds rows nor moves the pointer back.
    json.merge(Chain::Celo, vec![stored.clone()]).await?;
    assert_eq!(json.messages(Chain::Celo).await.len(), 3);
    assert_eq!(json.last_observed(Chain::Celo).await?, Some(message(Chain::Celo, 8, 0)));

    Ok(())
}

#[tokio::test]
async fn test_run_stops_on_cancellation() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let store = Arc::new(InMemoryStore::new());
    let adapter = MockAdapter::new(Chain::Oasis, 30).with_initial(0).with_messages(12, 1);
    let watcher =
        Watcher::new(adapter, store.clone()).with_poll_interval(Duration::from_millis(10));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(watcher.run(cancel.clone()));

    sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    timeout(Duration::from_secs(1), handle).await???;
    assert_eq!(store.last_observed(Chain::Oasis).await?, Some(message(Chain::Oasis, 12, 0)));

    Ok(())
}

#[tokio::test]
async fn test_configuration_error_only_stops_its_watcher() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let config = WatcherConfig { poll_interval: Duration::from_millis(10), ..Default::default() };
    let store = Arc::new(InMemoryStore::new());
    let mut orchestrator = Orchestrator::new(config, store.clone());

    let broken = MockAdapter::new(Chain::Moonbeam, 10);
    broken.misconfigured.store(true, Ordering::SeqCst);
    orchestrator.spawn_watcher(broken);
    orchestrator.spawn_watcher(MockAdapter::new(Chain::Bsc, 5).with_initial(0).with_messages(5, 1));

    let (chain, result) = timeout(Duration::from_secs(1), orchestrator.join_next())
        .await?
        .ok_or_else(|| eyre::eyre!("no watcher exited"))?;
    assert_eq!(chain, Chain::Moonbeam);
    assert!(matches!(result, Err(WatcherError::Configuration { chain: Chain::Moonbeam, .. })));

    // The healthy watcher keeps going after its neighbour stopped.
    timeout(Duration::from_secs(1), async {
        while store.last_observed(Chain::Bsc).await.ok().flatten().is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    let exits = timeout(Duration::from_secs(1), orchestrator.shutdown()).await?;
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].0, Chain::Bsc);
    assert!(exits[0].1.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_orchestrator_skips_chains_without_adapter() -> eyre::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut config = WatcherConfig {
        chains: vec![Chain::Ethereum, Chain::Solana, Chain::Celo],
        poll_interval: Duration::from_millis(10),
        rpc_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    config.endpoints.insert(Chain::Ethereum, "http://127.0.0.1:9".parse()?);
    config.endpoints.insert(Chain::Solana, "http://127.0.0.1:9".parse()?);

    let mut orchestrator = Orchestrator::new(config, Arc::new(InMemoryStore::new()));
    assert_eq!(orchestrator.spawn(), vec![Chain::Ethereum]);

    let exits = timeout(Duration::from_secs(2), orchestrator.shutdown()).await?;
    assert_eq!(exits.len(), 1);
    assert!(exits[0].1.is_ok());

    Ok(())
}
