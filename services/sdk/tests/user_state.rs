mod common;

use std::sync::Arc;

use common::*;
use notes::{
    AccountPrivateKey, BridgeCallData, CoreUserTx, DefiInteractionState, NoteAlgorithms, PaymentKind, SingleDecryptor,
    TreeNote,
};
use rollup_sdk::block::{Block, DefiInteractionEvent};
use rollup_sdk::block_context::BlockContext;
use rollup_sdk::events;
use rollup_sdk::proofs::{AccountSpec, DefiSpec, PaymentSpec, ProofFactory, ProofInput, ProofOutput, ProofTx};
use rollup_sdk::rollup_proof::{InnerProofData, ProofId, RollupProofData};
use rollup_sdk::serial_queue::{AnySerialQueue, SerialQueue};
use rollup_sdk::user_state::{UserState, UserStore};
use rollup_sdk::world_state::WorldState;
use rollup_sdk::SdkError;
use tree::{Hash32, HashPath};

struct Harness {
    algos: NoteAlgorithms,
    store: Arc<UserStore>,
    world: Arc<WorldState>,
    provider: Arc<MockProvider>,
    factory: ProofFactory,
    prover: MockProver,
}

impl Harness {
    fn new() -> Self {
        let storage = storage();
        let world =
            Arc::new(WorldState::new(storage.clone(), hasher(), AnySerialQueue::Plain(SerialQueue::new())).unwrap());
        Self {
            algos: algos(),
            store: user_store(&storage),
            factory: ProofFactory::new(algos(), world.clone()),
            world,
            provider: Arc::new(MockProvider::new(Vec::new())),
            prover: MockProver::default(),
        }
    }

    fn user(&self, key: &AccountPrivateKey) -> UserState {
        UserState::new(
            key.clone(),
            self.store.clone(),
            self.algos.clone(),
            Arc::new(SingleDecryptor),
            self.provider.clone(),
            events::channel(),
        )
        .unwrap()
    }

    async fn mine(&self, block: Block, users: &[&UserState]) {
        self.provider.push_block(block.clone());
        let ctx = Arc::new(BlockContext::from_block(block, hasher()).unwrap());
        self.world.apply_blocks(vec![ctx.clone()]).await.unwrap();
        for user in users {
            user.process_blocks(vec![ctx.clone()]).await.unwrap();
        }
    }

    async fn prove(&self, key: &AccountPrivateKey, input: ProofInput) -> ProofOutput {
        let signature = key.sign(&input.signing_data);
        self.factory.create_proof(input, &signature, &key.public_key(), &self.prover).await.unwrap()
    }
}

fn transfer(recipient: Option<notes::AccountPublicKey>, amount: u128, fee: u128) -> PaymentSpec {
    PaymentSpec {
        kind: PaymentKind::Transfer,
        asset_id: 0,
        public_input: 0,
        public_output: 0,
        public_owner: None,
        recipient,
        recipient_private_output: amount,
        recipient_account_required: false,
        sender_private_output: 0,
        fee,
        allow_chain: false,
    }
}

#[tokio::test]
async fn test_discovers_owned_notes_only() {
    let h = Harness::new();
    let alice_key = account();
    let alice = h.user(&alice_key);
    let bob = account().public_key();

    let to_alice = deposit_to(&h.algos, &alice.id(), 100, 0);
    let to_bob = deposit_to(&h.algos, &bob, 50, 0);
    let block = block(0, vec![to_alice.proof.clone(), to_bob.proof.clone()], vec![
        to_alice.offchain.clone(),
        to_bob.offchain.clone(),
    ]);
    h.mine(block, &[&alice]).await;

    let notes = alice.notes().unwrap();
    assert_eq!(notes.len(), 1);
    let note = &notes[0];
    assert_eq!(note.value(), 100);
    assert_eq!(note.index, Some(0));
    assert!(!note.pending && !note.nullified);
    assert_eq!(note.nullifier, h.algos.value_note_nullifier(&to_alice.commitment, &alice_key, true));
    assert!(note.hash_path.is_some());
    assert_eq!(alice.synced_to_rollup().unwrap(), Some(0));

    // the incoming deposit is recorded from the recipient's side
    let txs = alice.txs().unwrap();
    assert_eq!(txs.len(), 1);
    assert!(matches!(&txs[0], CoreUserTx::Payment(tx) if tx.is_recipient && tx.recipient_private_output == 100));
}

#[tokio::test]
async fn test_tampered_commitment_is_ignored() {
    let h = Harness::new();
    let alice = h.user(&account());
    let mut deposit = deposit_to(&h.algos, &alice.id(), 100, 0);
    deposit.proof.note_commitment_1 = random_hash();
    h.mine(block(0, vec![deposit.proof], vec![deposit.offchain]), &[&alice]).await;
    assert!(alice.notes().unwrap().is_empty());
}

#[tokio::test]
async fn test_transfer_settles_for_sender_and_recipient() {
    let h = Harness::new();
    let alice_key = account();
    let bob_key = account();
    let alice = h.user(&alice_key);
    let bob = h.user(&bob_key);

    let deposit = deposit_to(&h.algos, &alice.id(), 100, 0);
    h.mine(block(0, vec![deposit.proof], vec![deposit.offchain]), &[&alice, &bob]).await;

    let input = h.factory.create_payment_proof_input(&alice, transfer(Some(bob.id()), 40, 5)).await.unwrap();
    assert_eq!(input.spent_nullifiers.len(), 1);
    assert_eq!(input.inner.proof_id, ProofId::Send);
    let output = h.prove(&alice_key, input.clone()).await;
    alice.add_proof_output(output.clone()).await.unwrap();

    // the input is reserved and the change is not spendable until it settles
    assert_eq!(alice.spendable_sum(0).unwrap(), 0);
    assert!(matches!(alice.get_tx(&output.tx_id).unwrap(), Some(tx) if !tx.is_settled()));

    h.mine(block(1, vec![input.inner.clone()], vec![output.offchain_tx_data.clone()]), &[&alice, &bob]).await;

    assert_eq!(alice.balance(0).unwrap(), 55);
    assert_eq!(alice.spendable_sum(0).unwrap(), 55);
    assert!(alice.get_tx(&output.tx_id).unwrap().unwrap().is_settled());
    let spent = h.store.get_note_by_nullifier(&input.spent_nullifiers[0]).unwrap().unwrap();
    assert!(spent.nullified);

    assert_eq!(bob.balance(0).unwrap(), 40);
    let bob_notes = bob.notes().unwrap();
    assert_eq!(bob_notes[0].index, Some(RollupProofData::new(1, ROLLUP_SIZE, Vec::new()).data_start_index));
}

#[tokio::test]
async fn test_chained_change_can_be_spent_before_settlement() {
    let h = Harness::new();
    let key = account();
    let alice = h.user(&key);
    let bob = account().public_key();

    let deposit = deposit_to(&h.algos, &alice.id(), 100, 0);
    h.mine(block(0, vec![deposit.proof], vec![deposit.offchain]), &[&alice]).await;

    let mut spec = transfer(Some(bob), 10, 0);
    spec.allow_chain = true;
    let input = h.factory.create_payment_proof_input(&alice, spec).await.unwrap();
    let output = h.prove(&key, input).await;
    alice.add_proof_output(output).await.unwrap();
    assert_eq!(alice.spendable_sum(0).unwrap(), 90);

    let change = alice.notes().unwrap().into_iter().find(|n| n.pending).unwrap();
    let second = h.factory.create_payment_proof_input(&alice, transfer(Some(bob), 80, 0)).await.unwrap();
    let ProofTx::JoinSplit(tx) = &second.tx else { panic!("expected a join-split") };
    assert_eq!(tx.num_input_notes, 1);
    assert_eq!(tx.input_paths[0], HashPath::default());
    assert_eq!(second.spent_nullifiers, vec![change.nullifier]);
}

#[tokio::test]
async fn test_insufficient_notes_fails_before_any_work() {
    let h = Harness::new();
    let key = account();
    let alice = h.user(&key);
    let deposit = deposit_to(&h.algos, &alice.id(), 100, 0);
    h.mine(block(0, vec![deposit.proof], vec![deposit.offchain]), &[&alice]).await;

    let err = h.factory.create_payment_proof_input(&alice, transfer(None, 200, 1)).await.unwrap_err();
    assert!(matches!(err, SdkError::InsufficientNotes { asset_id: 0, required: 201, available: 100 }));
    assert_eq!(alice.txs().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_signature_never_reaches_prover() {
    let h = Harness::new();
    let key = account();
    let alice = h.user(&key);
    let input = h
        .factory
        .create_payment_proof_input(
            &alice,
            PaymentSpec {
                kind: PaymentKind::Deposit,
                public_input: 50,
                public_owner: Some([7u8; 32]),
                ..transfer(None, 50, 0)
            },
        )
        .await
        .unwrap();
    assert_eq!(input.spent_nullifiers.len(), 0);

    let wrong = account().sign(&input.signing_data);
    let err = h.factory.create_proof(input, &wrong, &key.public_key(), &h.prover).await.unwrap_err();
    assert!(matches!(err, SdkError::InvalidData(_)));
    assert_eq!(h.prover.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_account_tx_settles() {
    let h = Harness::new();
    let key = account();
    let alice = h.user(&key);
    let spending = account().public_key();

    let input = h
        .factory
        .create_account_proof_input(
            &alice,
            AccountSpec {
                alias: "Alice".into(),
                create: true,
                migrate: false,
                new_account_public_key: None,
                new_spending_public_key_1: Some(spending),
                new_spending_public_key_2: None,
                fee: 0,
            },
        )
        .await
        .unwrap();
    assert_eq!(input.inner.nullifier_1, h.algos.account_alias_hash_nullifier(&h.algos.alias_hash("alice")));
    assert!(input.viewing_keys.is_empty());

    let output = h.prove(&key, input.clone()).await;
    alice.add_proof_output(output.clone()).await.unwrap();
    h.mine(block(0, vec![input.inner], vec![Vec::new()]), &[&alice]).await;
    assert!(alice.get_tx(&output.tx_id).unwrap().unwrap().is_settled());
}

async fn run_defi(success: bool) -> (Harness, UserState, BridgeCallData) {
    let h = Harness::new();
    let key = account();
    let alice = h.user(&key);
    let bridge = BridgeCallData::new(1, 0, 3);

    let deposit = deposit_to(&h.algos, &alice.id(), 100, 0);
    h.mine(block(0, vec![deposit.proof], vec![deposit.offchain]), &[&alice]).await;

    let input = h
        .factory
        .create_defi_proof_input(&alice, DefiSpec { bridge_call_data: bridge, deposit_value: 60, fee: 10 })
        .await
        .unwrap();
    let defi_tx_id = input.tx_id;
    let output = h.prove(&key, input.clone()).await;
    alice.add_proof_output(output.clone()).await.unwrap();

    let defi_state = |alice: &UserState| match alice.get_tx(&defi_tx_id).unwrap() {
        Some(CoreUserTx::Defi(tx)) => tx,
        other => panic!("expected defi tx, got {other:?}"),
    };
    assert_eq!(defi_state(&alice).state(), DefiInteractionState::Pending);

    // deposit settles in rollup 1 at bridge slot 0, result arrives later
    let mut rollup = RollupProofData::new(1, ROLLUP_SIZE, vec![input.inner.clone()]);
    rollup.bridge_call_datas[0] = bridge;
    h.mine(block_from(rollup, vec![output.offchain_tx_data.clone()], Vec::new()), &[&alice]).await;

    let tx = defi_state(&alice);
    assert_eq!(tx.state(), DefiInteractionState::AwaitingFinalisation);
    assert_eq!(tx.interaction_result.interaction_nonce, Some(32));
    assert_eq!(tx.interaction_result.is_async, Some(true));
    assert_eq!(alice.balance(0).unwrap(), 30);

    let claim = h.store.get_claim_tx(&defi_tx_id).unwrap().unwrap();
    let complete = h.algos.claim_note_complete_partial_commitment(&claim.claim_partial_commitment, 32, 10);
    assert_eq!(claim.claim_nullifier, Some(h.algos.claim_note_nullifier(&complete)));

    let event = DefiInteractionEvent {
        bridge_call_data: bridge,
        nonce: 32,
        total_input_value: 120,
        total_output_value_a: 240,
        total_output_value_b: 0,
        result: success,
    };
    h.mine(block_from(RollupProofData::new(2, ROLLUP_SIZE, Vec::new()), Vec::new(), vec![event]), &[&alice]).await;

    let tx = defi_state(&alice);
    assert_eq!(tx.state(), DefiInteractionState::AwaitingSettlement);
    assert_eq!(tx.interaction_result.success, Some(success));
    assert_eq!(tx.interaction_result.output_value_a, Some(if success { 120 } else { 0 }));

    // claim proof spends the claim note and pays out output A or refunds
    let (value, asset_id) = if success { (120, 3) } else { (60, 0) };
    let nullifier_2 = random_hash();
    let payout = TreeNote {
        owner: alice.id(),
        value,
        asset_id,
        account_required: false,
        note_secret: claim.value_note_secret,
        creator_pubkey: [0u8; 32],
        input_nullifier: complete_nullifier(&claim),
    };
    let claim_proof = InnerProofData {
        proof_id: ProofId::DefiClaim,
        note_commitment_1: h.algos.value_note_commitment(&payout),
        note_commitment_2: [0u8; 32],
        nullifier_1: complete_nullifier(&claim),
        nullifier_2,
        public_value: 0,
        public_owner: [0u8; 32],
        asset_id: bridge.to_word(),
    };
    h.mine(block(3, vec![claim_proof], vec![Vec::new()]), &[&alice]).await;

    let tx = defi_state(&alice);
    assert_eq!(tx.state(), DefiInteractionState::Settled);
    assert!(alice
        .txs()
        .unwrap()
        .iter()
        .any(|t| matches!(t, CoreUserTx::DefiClaim(c) if c.defi_tx_id == defi_tx_id && c.success == success)));
    (h, alice, bridge)
}

fn complete_nullifier(claim: &notes::ClaimTx) -> Hash32 {
    claim.claim_nullifier.unwrap()
}

#[tokio::test]
async fn test_defi_interaction_runs_to_settlement() {
    let (_h, alice, _) = run_defi(true).await;
    assert_eq!(alice.balance(0).unwrap(), 30);
    assert_eq!(alice.balance(3).unwrap(), 120);
}

#[tokio::test]
async fn test_failed_interaction_refunds_deposit() {
    let (_h, alice, _) = run_defi(false).await;
    assert_eq!(alice.balance(0).unwrap(), 90);
    assert_eq!(alice.balance(3).unwrap(), 0);
}

#[tokio::test]
async fn test_gap_is_filled_from_provider() {
    let h = Harness::new();
    let alice = h.user(&account());

    let deposit = deposit_to(&h.algos, &alice.id(), 5, 0);
    h.provider.push_block(block(0, vec![deposit.proof], vec![deposit.offchain]));
    h.provider.push_block(empty_block(1));
    let ctx = Arc::new(BlockContext::from_block(empty_block(2), hasher()).unwrap());

    alice.process_blocks(vec![ctx]).await.unwrap();
    assert_eq!(alice.synced_to_rollup().unwrap(), Some(2));
    assert_eq!(alice.balance(0).unwrap(), 5);
    assert_eq!(h.provider.requests.lock().unwrap()[0], (0, 2));
}
