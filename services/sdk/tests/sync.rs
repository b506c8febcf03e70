mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use rollup_sdk::block_context::BlockContext;
use rollup_sdk::block_downloader::BlockDownloader;
use rollup_sdk::core_sdk::{CoreSdk, CoreSdkOptions};
use rollup_sdk::events::SdkEvent;
use rollup_sdk::rollup_proof::RollupProofData;
use rollup_sdk::serial_queue::{AnySerialQueue, SerialQueue};
use rollup_sdk::world_state::WorldState;
use rollup_sdk::SdkError;
use tokio::time::{sleep, timeout};
use tree::{InMemoryStorage, MerkleTree};

async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_downloader_requests_end_on_alignment_boundary() {
    let provider = Arc::new(MockProvider::new(empty_blocks(5)));
    let downloader = BlockDownloader::new(provider.clone(), 4, Duration::from_millis(20));

    downloader.start(3).await;
    let batch = downloader.get_blocks().await.unwrap();
    assert_eq!(batch.iter().map(|b| b.rollup_id).collect::<Vec<_>>(), vec![3, 4]);

    settle().await;
    let requests = provider.requests.lock().unwrap().clone();
    assert_eq!(requests[0], (3, 125));
    // nothing new: polled again from the next id
    assert!(requests[1..].iter().all(|r| *r == (5, 123)));

    downloader.stop().await;
}

#[tokio::test]
async fn test_downloader_holds_at_most_queue_size_batches() {
    let provider = Arc::new(MockProvider::new(empty_blocks(10)).with_batch_limit(1));
    let downloader = BlockDownloader::new(provider.clone(), 2, Duration::from_millis(20));

    downloader.start(0).await;
    settle().await;
    assert_eq!(provider.get_blocks_calls(), 2);
    assert_eq!(downloader.queued(), 2);

    let first = downloader.get_blocks().await.unwrap();
    assert_eq!(first[0].rollup_id, 0);
    settle().await;
    assert_eq!(provider.get_blocks_calls(), 3);
    assert_eq!(downloader.queued(), 2);

    let second = downloader.get_blocks().await.unwrap();
    assert_eq!(second[0].rollup_id, 1);
    downloader.stop().await;
}

#[tokio::test]
async fn test_downloader_stop_interrupts_poll_sleep() {
    let provider = Arc::new(MockProvider::new(Vec::new()));
    let downloader = BlockDownloader::new(provider.clone(), 2, Duration::from_secs(3600));

    downloader.start(0).await;
    settle().await;
    assert!(downloader.is_running());

    timeout(Duration::from_secs(2), downloader.stop()).await.expect("stop must not wait out the poll interval");
    assert!(!downloader.is_running());
    assert!(downloader.get_blocks().await.is_none());

    // second stop and restart are harmless
    downloader.stop().await;
    downloader.start(0).await;
    assert!(!downloader.is_running());
}

#[tokio::test]
async fn test_downloader_stop_racing_start_waits_for_producer() {
    for _ in 0..20 {
        let provider = Arc::new(MockProvider::new(empty_blocks(3)));
        let downloader = BlockDownloader::new(provider.clone(), 2, Duration::from_millis(5));

        tokio::join!(downloader.start(0), downloader.stop());
        assert!(!downloader.is_running());

        // the producer is gone, so nothing polls any more
        let calls = provider.get_blocks_calls();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(provider.get_blocks_calls(), calls);
    }
}

fn contexts(blocks: Vec<rollup_sdk::block::Block>) -> Vec<Arc<BlockContext>> {
    blocks.into_iter().map(|b| Arc::new(BlockContext::from_block(b, hasher()).unwrap())).collect()
}

#[tokio::test]
async fn test_world_state_applies_blocks_in_order() {
    let algos = algos();
    let owner = account().public_key();
    let blocks = vec![
        block(0, vec![deposit_to(&algos, &owner, 5, 0).proof], vec![Vec::new()]),
        block(1, vec![deposit_to(&algos, &owner, 7, 0).proof, deposit_to(&algos, &owner, 9, 0).proof], vec![
            Vec::new(),
            Vec::new(),
        ]),
    ];
    let ctxs = contexts(blocks);

    let ws = WorldState::new(storage(), hasher(), AnySerialQueue::Plain(SerialQueue::new())).unwrap();
    assert_eq!(ws.apply_blocks(ctxs.clone()).await.unwrap(), Some(1));
    assert_eq!(ws.size(), 2 * ROLLUP_SIZE as u64 * 2);
    assert_eq!(ws.synced_to_rollup().unwrap(), Some(1));

    let mut expected = MerkleTree::new(InMemoryStorage::new(), hasher(), "expected", 32).unwrap();
    let leaves: Vec<_> = ctxs.iter().flat_map(|c| c.note_commitments()).collect();
    expected.update_leaf_hashes(0, &leaves).unwrap();
    assert_eq!(ws.root(), expected.root());

    let leaf = leaves[8];
    assert!(ws.get_hash_path(8).unwrap().verify(hasher().as_ref(), 8, &leaf, &ws.root()));

    // re-applying is a no-op
    let root = ws.root();
    assert_eq!(ws.apply_blocks(ctxs).await.unwrap(), Some(1));
    assert_eq!(ws.root(), root);

    // a gap is rejected
    let err = ws.apply_blocks(contexts(vec![empty_block(3)])).await.unwrap_err();
    assert!(matches!(err, SdkError::InvalidData(_)));
    ws.destroy().await;
}

#[tokio::test]
async fn test_world_state_checks_committed_data_root() {
    let algos = algos();
    let owner = account().public_key();
    let proofs = vec![deposit_to(&algos, &owner, 5, 0).proof];

    let mut rollup = RollupProofData::new(0, ROLLUP_SIZE, proofs);
    let mut expected = MerkleTree::new(InMemoryStorage::new(), hasher(), "expected", 32).unwrap();
    expected.update_leaf_hashes(0, &rollup.note_commitments()).unwrap();

    let ws = WorldState::new(storage(), hasher(), AnySerialQueue::Plain(SerialQueue::new())).unwrap();
    rollup.new_data_root = [9u8; 32];
    let bad = contexts(vec![block_from(rollup.clone(), vec![Vec::new()], Vec::new())]);
    let err = ws.apply_blocks(bad).await.unwrap_err();
    assert!(matches!(err, SdkError::InvalidData(msg) if msg.contains("data root")));
    assert_eq!(ws.size(), 0);
    assert_eq!(ws.synced_to_rollup().unwrap(), None);

    rollup.new_data_root = expected.root();
    let good = contexts(vec![block_from(rollup, vec![Vec::new()], Vec::new())]);
    assert_eq!(ws.apply_blocks(good).await.unwrap(), Some(0));
    assert_eq!(ws.root(), expected.root());
    ws.destroy().await;
}

#[tokio::test]
async fn test_block_context_rejects_mismatched_rollup_size() {
    let mut block = empty_block(0);
    block.rollup_size = ROLLUP_SIZE * 2;
    let err = BlockContext::from_block(block, hasher()).err().unwrap();
    assert!(matches!(err, SdkError::InvalidData(msg) if msg.contains("rollup size")));
}

#[tokio::test]
async fn test_block_context_builds_subtree_once() {
    let algos = algos();
    let owner = account().public_key();
    let deposit = deposit_to(&algos, &owner, 5, 0);
    let ctx = Arc::new(
        BlockContext::from_block(block(2, vec![deposit.proof.clone()], vec![deposit.offchain.clone()]), hasher())
            .unwrap(),
    );
    let (start, end) = ctx.leaf_range();
    assert_eq!((start, end), (16, 24));

    let mut handles = Vec::new();
    for index in start..end {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move { ctx.get_block_subtree_hash_path(index).await }));
    }
    let paths: Vec<_> = futures_join(handles).await;
    assert_eq!(ctx.subtree_builds(), 1);

    let mut subtree = MerkleTree::new(InMemoryStorage::new(), hasher(), "sub", 3).unwrap();
    subtree.update_leaf_hashes(0, &ctx.note_commitments()).unwrap();
    assert!(paths[0].verify(hasher().as_ref(), 0, &deposit.commitment, &subtree.root()));

    let err = ctx.get_block_subtree_hash_path(end).await.unwrap_err();
    assert!(matches!(err, SdkError::IndexOutOfBounds { index: 24, start: 16, end: 24 }));
    assert!(ctx.get_block_subtree_hash_path(start - 1).await.is_err());
}

async fn futures_join(
    handles: Vec<tokio::task::JoinHandle<rollup_sdk::Result<tree::HashPath>>>,
) -> Vec<tree::HashPath> {
    let mut out = Vec::new();
    for h in handles {
        out.push(h.await.unwrap().unwrap());
    }
    out
}

fn sdk_options(provider: Arc<MockProvider>) -> CoreSdkOptions {
    CoreSdkOptions {
        storage: storage(),
        provider,
        hash_paths: None,
        prover: Some(Arc::new(MockProver::default())),
        hasher: hasher(),
        decrypt_threads: 1,
        download_queue_size: 2,
        poll_interval: Duration::from_millis(20),
        lock: None,
    }
}

#[tokio::test]
async fn test_core_sdk_syncs_world_and_users() {
    let algos = algos();
    let key = account();
    let owner = key.public_key();
    let deposit = deposit_to(&algos, &owner, 100, 0);
    let provider = Arc::new(MockProvider::new(vec![
        empty_block(0),
        block(1, vec![deposit.proof.clone()], vec![deposit.offchain.clone()]),
    ]));

    let sdk = CoreSdk::new(sdk_options(provider.clone())).unwrap();
    let mut events = sdk.events();
    sdk.add_user(key).await.unwrap();
    sdk.start_sync().await.unwrap();

    let synced = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SdkEvent::UpdatedUserState { rollup_id: 1, .. }) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(synced.is_ok(), "user never reached rollup 1");

    assert_eq!(sdk.world_state().synced_to_rollup().unwrap(), Some(1));
    assert_eq!(sdk.get_balance(&owner, 0).await.unwrap(), 100);
    assert_eq!(sdk.get_fee(0, rollup_sdk::proofs::TxType::Transfer, rollup_sdk::proofs::TxSettlementTime::NextRollup)
        .await
        .unwrap(), 11);

    sdk.destroy().await;
}

#[tokio::test]
async fn test_core_sdk_refuses_mismatched_provider() {
    let provider = Arc::new(MockProvider::new(Vec::new()).with_version("0.0.1"));
    let sdk = CoreSdk::new(sdk_options(provider)).unwrap();
    let mut events = sdk.events();

    let err = sdk.start_sync().await.unwrap_err();
    assert!(matches!(err, SdkError::VersionMismatch { .. }));
    assert!(matches!(events.recv().await.unwrap(), SdkEvent::VersionMismatch { .. }));
    assert!(!sdk.is_syncing().await);
}

#[tokio::test]
async fn test_late_user_catches_up_to_world_state() {
    let algos = algos();
    let key = account();
    let owner = key.public_key();
    let deposit = deposit_to(&algos, &owner, 42, 0);
    let provider = Arc::new(MockProvider::new(vec![
        block(0, vec![deposit.proof.clone()], vec![deposit.offchain.clone()]),
        empty_block(1),
    ]));

    let sdk = CoreSdk::new(sdk_options(provider)).unwrap();
    let mut events = sdk.events();
    sdk.start_sync().await.unwrap();
    timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SdkEvent::UpdatedWorldState { rollup_id: 1, .. }) = events.recv().await {
                break;
            }
        }
    })
    .await
    .unwrap();

    let user = sdk.add_user(key).await.unwrap();
    assert_eq!(user.synced_to_rollup().unwrap(), Some(1));
    assert_eq!(user.balance(0).unwrap(), 42);
    sdk.destroy().await;
}
