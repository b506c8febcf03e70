//! Per-user view of the chain
//!
//! Each synced block is checked for notes the user owns, nullifiers that
//! spend them and settlement of the user's own txs. All of it runs on the
//! user's serial queue so blocks are applied one at a time in rollup order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use notes::{
    batch_decrypt_notes, AccountPrivateKey, AccountPublicKey, CoreUserTx, Decryptor, DefiEvent,
    DefiInteractionState, Note, NoteAlgorithms, NotePicker, PaymentKind, TreeNote, TxId, UserData,
    UserDataStore, UserDefiClaimTx, UserDefiTx, UserPaymentTx, VIEWING_KEY_SIZE,
};
use tracing::{debug, info, warn};
use tree::Hash32;

use crate::block_context::BlockContext;
use crate::error::{Result, SdkError};
use crate::events::{emit, EventSender, SdkEvent};
use crate::proofs::ProofOutput;
use crate::provider::RollupProvider;
use crate::rollup_proof::{InnerProofData, ProofId, OUTPUT_NOTES_PER_TX};
use crate::serial_queue::SerialQueue;
use crate::SharedStorage;

pub type UserStore = UserDataStore<SharedStorage>;

/// Output slot of an inner proof that may hold a note for us.
struct Candidate {
    proof: usize,
    index: u64,
    commitment: Hash32,
    input_nullifier: Hash32,
}

struct Inner {
    id: AccountPublicKey,
    private_key: AccountPrivateKey,
    store: Arc<UserStore>,
    algos: NoteAlgorithms,
    decryptor: Arc<dyn Decryptor>,
    provider: Arc<dyn RollupProvider>,
    events: EventSender,
    /// Nullifiers of notes picked for proof inputs that have not been sent
    /// yet. Sending moves them into the persisted reservations.
    held: Mutex<HashSet<Hash32>>,
}

pub struct UserState {
    inner: Arc<Inner>,
    queue: SerialQueue,
}

impl UserState {
    /// Registers the user in the store if it is not there yet.
    pub fn new(
        private_key: AccountPrivateKey,
        store: Arc<UserStore>,
        algos: NoteAlgorithms,
        decryptor: Arc<dyn Decryptor>,
        provider: Arc<dyn RollupProvider>,
        events: EventSender,
    ) -> Result<Self> {
        let id = private_key.public_key();
        if store.get_user(&id)?.is_none() {
            store.add_user(&UserData { id, synced_to_rollup: None })?;
        }
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                private_key,
                store,
                algos,
                decryptor,
                provider,
                events,
                held: Mutex::new(HashSet::new()),
            }),
            queue: SerialQueue::new(),
        })
    }

    pub fn id(&self) -> AccountPublicKey {
        self.inner.id
    }

    pub fn private_key(&self) -> &AccountPrivateKey {
        &self.inner.private_key
    }

    pub fn synced_to_rollup(&self) -> Result<Option<u32>> {
        self.inner.synced_to_rollup()
    }

    /// Apply a batch of synced blocks. Blocks already seen are skipped and a
    /// gap before the first new block is filled from the provider.
    pub async fn process_blocks(&self, blocks: Vec<Arc<BlockContext>>) -> Result<()> {
        let inner = self.inner.clone();
        self.queue.push(move || async move { inner.sync_blocks(blocks).await }).await?
    }

    /// Fetch and apply every block up to and including `rollup_id`.
    pub async fn catch_up(&self, rollup_id: u32) -> Result<()> {
        let inner = self.inner.clone();
        self.queue
            .push(move || async move {
                let next = inner.next_rollup()?;
                inner.fill_gap(next, rollup_id.saturating_add(1)).await
            })
            .await?
    }

    /// Record a tx we just sent: pending outputs, reserved inputs, the claim
    /// secret of a DeFi deposit.
    pub async fn add_proof_output(&self, output: ProofOutput) -> Result<()> {
        let inner = self.inner.clone();
        self.queue.push(move || async move { inner.record_output(output) }).await?
    }

    pub fn notes(&self) -> Result<Vec<Note>> {
        Ok(self.inner.store.get_notes(&self.inner.id)?)
    }

    pub fn txs(&self) -> Result<Vec<CoreUserTx>> {
        Ok(self.inner.store.get_txs(&self.inner.id)?)
    }

    pub fn get_tx(&self, tx_id: &TxId) -> Result<Option<CoreUserTx>> {
        Ok(self.inner.store.get_tx(&self.inner.id, tx_id)?)
    }

    /// Settled, unspent value of one asset.
    pub fn balance(&self, asset_id: u32) -> Result<u128> {
        Ok(self
            .inner
            .store
            .get_unspent_notes(&self.inner.id, asset_id)?
            .iter()
            .filter(|n| !n.pending)
            .fold(0u128, |acc, n| acc.saturating_add(n.value())))
    }

    fn picker(&self, asset_id: u32) -> Result<(NotePicker, HashSet<Hash32>)> {
        self.inner.picker(asset_id)
    }

    pub fn spendable_sum(&self, asset_id: u32) -> Result<u128> {
        let (picker, reserved) = self.picker(asset_id)?;
        Ok(picker.spendable_sum(&reserved))
    }

    pub fn max_spendable_value(&self, asset_id: u32) -> Result<u128> {
        let (picker, reserved) = self.picker(asset_id)?;
        Ok(picker.max_spendable_value(&reserved))
    }

    /// One or two notes covering `value`, or `InsufficientNotes`. Nothing is
    /// held; see [`reserve_notes`](Self::reserve_notes).
    pub fn pick_notes(&self, asset_id: u32, value: u128) -> Result<Vec<Note>> {
        self.inner.pick(asset_id, value)
    }

    /// Pick notes covering `value` and hold them on the user's queue, so no
    /// concurrent proof input can pick them too. Held notes stay unavailable
    /// until the proof is sent or [`release_notes`](Self::release_notes).
    pub async fn reserve_notes(&self, asset_id: u32, value: u128) -> Result<Vec<Note>> {
        let inner = self.inner.clone();
        self.queue
            .push(move || async move {
                let picked = inner.pick(asset_id, value)?;
                inner.held().extend(picked.iter().map(|n| n.nullifier));
                Ok::<_, SdkError>(picked)
            })
            .await?
    }

    /// Give back notes held for a proof input that will not be sent.
    pub async fn release_notes(&self, nullifiers: Vec<Hash32>) -> Result<()> {
        let inner = self.inner.clone();
        self.queue
            .push(move || async move {
                let mut held = inner.held();
                for n in &nullifiers {
                    held.remove(n);
                }
            })
            .await?;
        Ok(())
    }

    pub async fn destroy(&self) {
        self.queue.destroy().await;
    }
}

impl Inner {
    fn held(&self) -> MutexGuard<'_, HashSet<Hash32>> {
        match self.held.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn picker(&self, asset_id: u32) -> Result<(NotePicker, HashSet<Hash32>)> {
        let notes = self.store.get_unspent_notes(&self.id, asset_id)?;
        let mut reserved = self.store.reserved_nullifiers(&self.id)?;
        reserved.extend(self.held().iter().copied());
        Ok((NotePicker::new(notes), reserved))
    }

    fn pick(&self, asset_id: u32, value: u128) -> Result<Vec<Note>> {
        let (picker, reserved) = self.picker(asset_id)?;
        picker.pick(value, &reserved).ok_or_else(|| SdkError::InsufficientNotes {
            asset_id,
            required: value,
            available: picker.max_spendable_value(&reserved),
        })
    }

    fn synced_to_rollup(&self) -> Result<Option<u32>> {
        Ok(self.store.get_user(&self.id)?.and_then(|u| u.synced_to_rollup))
    }

    fn next_rollup(&self) -> Result<u32> {
        Ok(self.synced_to_rollup()?.map_or(0, |id| id + 1))
    }

    async fn sync_blocks(&self, blocks: Vec<Arc<BlockContext>>) -> Result<()> {
        let mut next = self.next_rollup()?;
        for ctx in blocks {
            let rollup_id = ctx.rollup_id();
            if rollup_id < next {
                continue;
            }
            if rollup_id > next {
                self.fill_gap(next, rollup_id).await?;
            }
            self.apply_block(&ctx).await?;
            next = rollup_id + 1;
        }
        Ok(())
    }

    /// Apply rollups `[from, until)` fetched from the provider.
    async fn fill_gap(&self, from: u32, until: u32) -> Result<()> {
        let mut next = from;
        while next < until {
            let blocks = self.provider.get_blocks(next, until - next).await?;
            if blocks.is_empty() {
                return Err(SdkError::InvalidData(format!("provider has no block {next} yet")));
            }
            debug!(user = %self.id, from = next, count = blocks.len(), "user state: filling gap");
            for block in blocks {
                if block.rollup_id != next {
                    return Err(SdkError::InvalidData(format!(
                        "provider returned rollup {} while filling from {next}",
                        block.rollup_id
                    )));
                }
                let ctx = BlockContext::from_block(block, self.algos.hasher().clone())?;
                self.apply_block(&ctx).await?;
                next += 1;
                if next >= until {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn apply_block(&self, ctx: &BlockContext) -> Result<()> {
        self.process_block(ctx).await?;
        self.store.set_synced_to_rollup(&self.id, ctx.rollup_id())?;
        emit(&self.events, SdkEvent::UpdatedUserState { user_id: self.id, rollup_id: ctx.rollup_id() });
        Ok(())
    }

    async fn process_block(&self, ctx: &BlockContext) -> Result<()> {
        let received = self.discover_notes(ctx).await?;
        self.nullify_spent_notes(ctx)?;
        self.settle_txs(ctx, &received)?;
        self.finalise_interactions(ctx)?;
        self.settle_claims(ctx).await?;
        Ok(())
    }

    /// Decrypt the block's viewing keys and store the notes that are ours.
    /// Returns value received per inner proof.
    async fn discover_notes(&self, ctx: &BlockContext) -> Result<HashMap<usize, u128>> {
        let rollup = ctx.rollup();
        let (start, _) = ctx.leaf_range();
        let mut offchain = ctx.block().offchain_tx_data.iter();
        let mut buffer = Vec::new();
        let mut candidates = Vec::new();

        for (i, proof) in rollup.inner_proofs.iter().enumerate() {
            if proof.is_padding() {
                continue;
            }
            let data = offchain.next();
            let slots: &[u64] = match proof.proof_id {
                p if p.is_payment() => &[0, 1],
                ProofId::DefiDeposit => &[1],
                _ => &[],
            };
            if slots.is_empty() {
                continue;
            }
            let Some(data) = data.filter(|d| d.len() == slots.len() * VIEWING_KEY_SIZE) else {
                warn!(rollup_id = ctx.rollup_id(), proof = i, "user state: missing or malformed offchain data");
                continue;
            };
            buffer.extend_from_slice(data);
            for &slot in slots {
                let (commitment, input_nullifier) = output_slot(proof, slot);
                candidates.push(Candidate {
                    proof: i,
                    index: start + i as u64 * OUTPUT_NOTES_PER_TX + slot,
                    commitment,
                    input_nullifier,
                });
            }
        }

        let mut received = HashMap::new();
        if candidates.is_empty() {
            return Ok(received);
        }

        let key = self.private_key.clone();
        let decryptor = self.decryptor.clone();
        let decrypted = tokio::task::spawn_blocking(move || batch_decrypt_notes(&buffer, &key, decryptor.as_ref()))
            .await
            .map_err(|e| SdkError::Join(e.to_string()))??;

        for (candidate, plain) in candidates.iter().zip(decrypted) {
            let Some(plain) = plain else { continue };
            let tree_note = TreeNote::from_decrypted(&plain, self.id, candidate.input_nullifier);
            if self.algos.value_note_commitment(&tree_note) != candidate.commitment {
                warn!(user = %self.id, index = candidate.index, "user state: decrypted note does not match commitment");
                continue;
            }
            let value = tree_note.value;
            self.store_settled_note(ctx, tree_note, candidate.commitment, candidate.index).await?;
            *received.entry(candidate.proof).or_insert(0u128) += value;
        }
        Ok(received)
    }

    async fn store_settled_note(&self, ctx: &BlockContext, tree_note: TreeNote, commitment: Hash32, index: u64) -> Result<()> {
        let existing = self.store.get_note(&self.id, &commitment)?;
        let hash_path = ctx.get_block_subtree_hash_path(index).await?;
        let note = Note {
            nullifier: self.algos.value_note_nullifier(&commitment, &self.private_key, true),
            tree_note,
            commitment,
            index: Some(index),
            allow_chain: false,
            nullified: existing.map_or(false, |n| n.nullified),
            pending: false,
            hash_path: Some(hash_path),
        };
        debug!(user = %self.id, index, value = note.value(), "user state: note settled");
        self.store.add_note(&note)?;
        Ok(())
    }

    fn nullify_spent_notes(&self, ctx: &BlockContext) -> Result<()> {
        for proof in ctx.rollup().inner_proofs.iter().filter(|p| !p.is_padding()) {
            for nullifier in proof.nullifiers() {
                if nullifier == [0u8; 32] {
                    continue;
                }
                // the nullifier index is shared by every local user
                let Some(note) = self.store.get_note_by_nullifier(&nullifier)? else { continue };
                if note.owner() == &self.id && !note.nullified {
                    self.store.nullify_note(&nullifier)?;
                    debug!(user = %self.id, value = note.value(), "user state: note spent");
                }
            }
        }
        Ok(())
    }

    fn settle_txs(&self, ctx: &BlockContext, received: &HashMap<usize, u128>) -> Result<()> {
        let block = ctx.block();
        let rollup = ctx.rollup();
        let hasher = self.algos.hasher().clone();

        for (i, proof) in rollup.inner_proofs.iter().enumerate() {
            if proof.is_padding() {
                continue;
            }
            let tx_id = TxId(proof.tx_id(hasher.as_ref()));
            match self.store.get_tx(&self.id, &tx_id)? {
                Some(CoreUserTx::Defi(tx)) => self.settle_defi_deposit(ctx, proof, tx)?,
                Some(mut tx) if !tx.is_settled() => {
                    tx.settle(block.mined);
                    self.store.add_tx(&tx)?;
                    info!(user = %self.id, tx_id = %tx_id, "user state: tx settled");
                    self.emit_tx(tx_id);
                }
                Some(_) => {}
                None => {
                    let Some(value) = received.get(&i) else { continue };
                    let kind = match proof.proof_id {
                        ProofId::Deposit => PaymentKind::Deposit,
                        ProofId::Send => PaymentKind::Transfer,
                        _ => continue,
                    };
                    let deposit = kind == PaymentKind::Deposit;
                    let tx = CoreUserTx::Payment(UserPaymentTx {
                        tx_id,
                        user_id: self.id,
                        kind,
                        asset_id: proof.asset_id_u32().unwrap_or_default(),
                        public_value: if deposit { proof.public_value } else { 0 },
                        public_owner: deposit.then_some(proof.public_owner),
                        private_input: 0,
                        recipient_private_output: *value,
                        sender_private_output: 0,
                        is_sender: false,
                        is_recipient: true,
                        fee: 0,
                        created: block.mined,
                        settled: Some(block.mined),
                    });
                    self.store.add_tx(&tx)?;
                    self.emit_tx(tx_id);
                }
            }
        }
        Ok(())
    }

    /// Deposit seen on chain: assign the interaction nonce and derive the
    /// claim nullifier we will watch for.
    fn settle_defi_deposit(&self, ctx: &BlockContext, proof: &InnerProofData, mut tx: UserDefiTx) -> Result<()> {
        if tx.state() != DefiInteractionState::Pending {
            return Ok(());
        }
        let nonce = ctx.rollup().interaction_nonce(&tx.bridge_call_data)?;
        let is_async = !ctx.block().interaction_result.iter().any(|e| e.nonce == nonce);
        tx.advance(DefiEvent::DepositSettled { interaction_nonce: nonce, is_async, settled: ctx.block().mined })?;

        if let Some(mut claim) = self.store.get_claim_tx(&tx.tx_id)? {
            let complete = self.algos.claim_note_complete_partial_commitment(
                &claim.claim_partial_commitment,
                nonce,
                proof.public_value,
            );
            claim.interaction_nonce = Some(nonce);
            claim.claim_nullifier = Some(self.algos.claim_note_nullifier(&complete));
            self.store.add_claim_tx(&claim)?;
        }

        info!(user = %self.id, tx_id = %tx.tx_id, nonce, "user state: defi deposit settled");
        let tx_id = tx.tx_id;
        self.store.add_tx(&CoreUserTx::Defi(tx))?;
        self.emit_tx(tx_id);
        Ok(())
    }

    fn finalise_interactions(&self, ctx: &BlockContext) -> Result<()> {
        let events = &ctx.block().interaction_result;
        if events.is_empty() {
            return Ok(());
        }
        let waiting: Vec<UserDefiTx> = self
            .store
            .get_txs(&self.id)?
            .into_iter()
            .filter_map(|tx| match tx {
                CoreUserTx::Defi(tx) if tx.state() == DefiInteractionState::AwaitingFinalisation => Some(tx),
                _ => None,
            })
            .collect();

        for event in events {
            for waiting_tx in waiting.iter().filter(|tx| tx.interaction_result.interaction_nonce == Some(event.nonce)) {
                // pro-rata share of the interaction's outputs
                let share = |total: u128| {
                    if !event.result || event.total_input_value == 0 {
                        0
                    } else {
                        waiting_tx.deposit_value.saturating_mul(total) / event.total_input_value
                    }
                };
                let mut tx = waiting_tx.clone();
                tx.advance(DefiEvent::InteractionFinalised {
                    success: event.result,
                    output_value_a: share(event.total_output_value_a),
                    output_value_b: share(event.total_output_value_b),
                    finalised: ctx.block().mined,
                })?;
                info!(user = %self.id, tx_id = %tx.tx_id, success = event.result, "user state: interaction finalised");
                let tx_id = tx.tx_id;
                self.store.add_tx(&CoreUserTx::Defi(tx))?;
                self.emit_tx(tx_id);
            }
        }
        Ok(())
    }

    /// Claim proofs spending one of our claim notes: store the output notes
    /// and close the DeFi tx.
    async fn settle_claims(&self, ctx: &BlockContext) -> Result<()> {
        let hasher = self.algos.hasher().clone();
        let (start, _) = ctx.leaf_range();
        let mined = ctx.block().mined;

        for (i, proof) in ctx.rollup().inner_proofs.iter().enumerate() {
            if proof.proof_id != ProofId::DefiClaim {
                continue;
            }
            let Some(claim) = self.store.get_claim_tx_by_nullifier(&proof.nullifier_1)? else { continue };
            if claim.user_id != self.id {
                continue;
            }
            let Some(CoreUserTx::Defi(mut defi)) = self.store.get_tx(&self.id, &claim.defi_tx_id)? else { continue };
            if defi.state() != DefiInteractionState::AwaitingSettlement {
                continue;
            }

            let result = defi.interaction_result.clone();
            let success = result.success.unwrap_or(false);
            let bridge = defi.bridge_call_data;
            let outputs = if success {
                [
                    Some((result.output_value_a.unwrap_or(0), bridge.output_asset_id_a)),
                    bridge.output_asset_id_b.map(|asset| (result.output_value_b.unwrap_or(0), asset)),
                ]
            } else {
                [Some((defi.deposit_value, bridge.input_asset_id)), None]
            };

            for (slot, output) in outputs.into_iter().enumerate() {
                let Some((value, asset_id)) = output.filter(|(v, _)| *v > 0) else { continue };
                let (commitment, input_nullifier) = output_slot(proof, slot as u64);
                let tree_note = TreeNote {
                    owner: self.id,
                    value,
                    asset_id,
                    account_required: false,
                    note_secret: claim.value_note_secret,
                    creator_pubkey: [0u8; 32],
                    input_nullifier,
                };
                if self.algos.value_note_commitment(&tree_note) != commitment {
                    warn!(user = %self.id, defi_tx = %defi.tx_id, slot, "user state: claim output does not match commitment");
                    continue;
                }
                let index = start + i as u64 * OUTPUT_NOTES_PER_TX + slot as u64;
                self.store_settled_note(ctx, tree_note, commitment, index).await?;
            }

            let claim_tx_id = TxId(proof.tx_id(hasher.as_ref()));
            defi.advance(DefiEvent::ClaimSettled { claim_tx_id, settled: mined })?;
            let claim_tx = CoreUserTx::DefiClaim(UserDefiClaimTx {
                tx_id: claim_tx_id,
                defi_tx_id: defi.tx_id,
                user_id: self.id,
                bridge_call_data: bridge,
                deposit_value: defi.deposit_value,
                success,
                output_value_a: result.output_value_a.unwrap_or(0),
                output_value_b: result.output_value_b.unwrap_or(0),
                settled: mined,
            });
            info!(user = %self.id, tx_id = %defi.tx_id, "user state: defi claim settled");
            let defi_tx_id = defi.tx_id;
            self.store.add_tx(&CoreUserTx::Defi(defi))?;
            self.store.add_tx(&claim_tx)?;
            self.emit_tx(defi_tx_id);
            self.emit_tx(claim_tx_id);
        }
        Ok(())
    }

    fn record_output(&self, output: ProofOutput) -> Result<()> {
        for note in output.output_notes.iter().filter(|n| n.owner() == &self.id) {
            // never downgrade a note the chain already confirmed
            if self.store.get_note(&self.id, &note.commitment)?.is_none() {
                self.store.add_note(note)?;
            }
        }
        self.store.reserve_nullifiers(&self.id, &output.spent_nullifiers, &output.tx_id)?;
        {
            let mut held = self.held();
            for n in &output.spent_nullifiers {
                held.remove(n);
            }
        }
        if let Some(claim) = &output.claim {
            self.store.add_claim_tx(claim)?;
        }
        self.store.add_tx(&output.user_tx)?;
        self.emit_tx(output.tx_id);
        Ok(())
    }

    fn emit_tx(&self, tx_id: TxId) {
        emit(&self.events, SdkEvent::UpdatedUserTx { user_id: self.id, tx_id });
    }
}

/// Commitment and input nullifier of output `slot` (0 or 1). Output notes
/// chain from the input nullifier in the same position.
fn output_slot(proof: &InnerProofData, slot: u64) -> (Hash32, Hash32) {
    if slot == 0 {
        (proof.note_commitment_1, proof.nullifier_1)
    } else {
        (proof.note_commitment_2, proof.nullifier_2)
    }
}
