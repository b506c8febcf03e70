mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use rollup_sdk::hash_path_source::{HashPathSource, DATA_TREE};
use rollup_sdk::proofs::{AccountTx, Prover, ProverError};
use rollup_sdk::serial_queue::{AnySerialQueue, SerialQueue};
use rollup_sdk::transport::{
    JobHandler, JobRequest, JobResponse, MemorySocket, RemoteProver, RequestEnvelope, SdkJobHandler, Socket,
    TransportClient, TransportError, TransportHashPathSource, TransportServer,
};
use rollup_sdk::world_state::WorldState;
use rollup_sdk::{Result, SdkError};
use tokio::time::sleep;
use tree::TreeState;

/// Answers tree state requests with the requested index, slower for low
/// indices so responses come back out of order.
#[derive(Default)]
struct EchoHandler {
    handled: AtomicUsize,
}

#[async_trait]
impl JobHandler for EchoHandler {
    async fn handle(&self, request: JobRequest) -> Result<JobResponse> {
        let JobRequest::GetHashPath { index, .. } = request else {
            return Err(SdkError::InvalidData("echo only answers hash path requests".into()));
        };
        sleep(Duration::from_millis(5 * (10 - index.min(10)))).await;
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(JobResponse::TreeState(TreeState { root: [index as u8; 32], size: index }))
    }
}

fn connect(handler: Arc<dyn JobHandler>) -> (Arc<TransportClient>, TransportServer) {
    let (a, b) = MemorySocket::pair();
    let server = TransportServer::start(Arc::new(b), handler);
    (Arc::new(TransportClient::new(Arc::new(a))), server)
}

#[tokio::test]
async fn test_concurrent_requests_are_matched_by_id() {
    let handler = Arc::new(EchoHandler::default());
    let (client, server) = connect(handler.clone());

    let mut handles = Vec::new();
    for index in 0..10u64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            (index, client.request(JobRequest::GetHashPath { tree: DATA_TREE, index }).await)
        }));
    }
    for h in handles {
        let (index, response) = h.await.unwrap();
        assert_eq!(response.unwrap(), JobResponse::TreeState(TreeState { root: [index as u8; 32], size: index }));
    }
    assert_eq!(handler.handled.load(Ordering::SeqCst), 10);
    assert_eq!(client.in_flight(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_handler_error_reaches_caller() {
    let (client, server) = connect(Arc::new(EchoHandler::default()));
    let err = client.request(JobRequest::GetTreeState { tree: DATA_TREE }).await.unwrap_err();
    assert!(matches!(err, TransportError::Remote(msg) if msg.contains("echo only")));
    server.stop().await;
}

#[tokio::test]
async fn test_closing_fails_waiting_and_later_requests() {
    struct Never;
    #[async_trait]
    impl JobHandler for Never {
        async fn handle(&self, _request: JobRequest) -> Result<JobResponse> {
            std::future::pending().await
        }
    }

    let (a, b) = MemorySocket::pair();
    let b = Arc::new(b);
    let _server = TransportServer::start(b.clone(), Arc::new(Never));
    let client = Arc::new(TransportClient::new(Arc::new(a)));

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.request(JobRequest::GetTreeState { tree: DATA_TREE }).await })
    };
    sleep(Duration::from_millis(20)).await;
    assert_eq!(client.in_flight(), 1);

    b.close();
    assert_eq!(waiting.await.unwrap(), Err(TransportError::Closed));
    assert_eq!(client.in_flight(), 0);
    assert_eq!(client.request(JobRequest::GetTreeState { tree: DATA_TREE }).await, Err(TransportError::Closed));
}

#[tokio::test]
async fn test_server_stop_answers_in_flight_requests() {
    let handler = Arc::new(EchoHandler::default());
    let (client, server) = connect(handler.clone());

    // index 0 takes the longest
    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.request(JobRequest::GetHashPath { tree: DATA_TREE, index: 0 }).await })
    };
    sleep(Duration::from_millis(10)).await;
    server.stop().await;

    assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    assert!(slow.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_undecodable_request_is_skipped() {
    let (a, b) = MemorySocket::pair();
    let server = TransportServer::start(Arc::new(b), Arc::new(EchoHandler::default()));
    a.send(b"not json".to_vec()).await.unwrap();

    let frame = serde_json::to_vec(&RequestEnvelope {
        msg_id: 7,
        payload: JobRequest::GetHashPath { tree: DATA_TREE, index: 9 },
    })
    .unwrap();
    a.send(frame).await.unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&a.recv().await.unwrap()).unwrap();
    assert_eq!(reply["msg_id"], 7);
    assert_eq!(reply["result"]["Ok"]["kind"], "tree_state");
    server.stop().await;
}

#[tokio::test]
async fn test_remote_tree_matches_local_world_state() {
    let algos = algos();
    let owner = account().public_key();
    let deposit = deposit_to(&algos, &owner, 5, 0);
    let ctx = Arc::new(
        rollup_sdk::block_context::BlockContext::from_block(
            block(0, vec![deposit.proof], vec![deposit.offchain]),
            hasher(),
        )
        .unwrap(),
    );
    let world =
        Arc::new(WorldState::new(storage(), hasher(), AnySerialQueue::Plain(SerialQueue::new())).unwrap());
    world.apply_blocks(vec![ctx]).await.unwrap();

    let (client, server) = connect(Arc::new(SdkJobHandler::new(None, world.clone())));
    let remote = TransportHashPathSource::new(client);

    let state = remote.get_tree_state(DATA_TREE).await.unwrap();
    assert_eq!(state.root, world.root());
    assert_eq!(state.size, world.size());
    let path = remote.get_hash_path(DATA_TREE, 0).await.unwrap();
    assert!(path.verify(hasher().as_ref(), 0, &deposit.commitment, &state.root));

    let err = remote.get_tree_state(3).await.unwrap_err();
    assert!(matches!(err, SdkError::Transport(TransportError::Remote(msg)) if msg.contains("Unknown tree 3")));
    server.stop().await;
}

#[tokio::test]
async fn test_remote_prover_maps_failures() {
    let world = Arc::new(WorldState::new(storage(), hasher(), AnySerialQueue::Plain(SerialQueue::new())).unwrap());
    let owner = account().public_key();
    let tx = AccountTx {
        merkle_root: [0u8; 32],
        account_public_key: owner,
        new_account_public_key: owner,
        alias_hash: [1u8; 32],
        create: true,
        migrate: false,
        new_spending_public_key_1: None,
        new_spending_public_key_2: None,
    };
    let signature = account().sign(b"anything");

    // worker with a prover
    let (client, server) = connect(Arc::new(SdkJobHandler::new(Some(Arc::new(MockProver::default())), world.clone())));
    let prover = RemoteProver::new(client.clone());
    assert_eq!(prover.prove_account(&tx, &signature).await.unwrap(), MOCK_PROOF.to_vec());

    // the socket goes away
    client.close();
    assert!(matches!(prover.prove_account(&tx, &signature).await, Err(ProverError::Unavailable(_))));
    server.stop().await;

    // worker without one
    let (client, server) = connect(Arc::new(SdkJobHandler::new(None, world)));
    let prover = RemoteProver::new(client);
    assert!(matches!(prover.prove_account(&tx, &signature).await, Err(ProverError::Failed(msg)) if msg.contains("no prover")));
    server.stop().await;
}
