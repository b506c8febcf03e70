use std::sync::Arc;

use chrono::Utc;
use notes::encoding::u32_word;
use notes::{
    AccountPrivateKey, AccountPublicKey, ClaimTx, CoreUserTx, Note, NoteAlgorithms, PaymentKind, SignatureBytes,
    TreeClaimNote, TreeNote, TxId, UserAccountTx, UserDefiTx, UserPaymentTx, ViewingKey,
};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};
use tree::{Hash32, HashPath};

use super::prover::Prover;
use super::tx::{AccountSpec, AccountTx, DefiSpec, JoinSplitTx, PaymentSpec, ProofInput, ProofOutput, ProofTx};
use crate::error::{Result, SdkError};
use crate::hash_path_source::{HashPathSource, DATA_TREE};
use crate::rollup_proof::{InnerProofData, ProofId};
use crate::user_state::UserState;

/// Two join-split inputs: the picked notes followed by zero-value padding.
struct Inputs {
    /// Root the paths were read at.
    merkle_root: Hash32,
    count: usize,
    notes: [TreeNote; 2],
    indices: [u64; 2],
    paths: [HashPath; 2],
    nullifiers: [Hash32; 2],
    /// Nullifiers of the real notes only.
    spent: Vec<Hash32>,
}

fn pair<T>(v: Vec<T>, what: &str) -> Result<[T; 2]> {
    v.try_into().map_err(|v: Vec<T>| SdkError::InvalidData(format!("expected 2 {what}, got {}", v.len())))
}

fn checked_sum(values: impl IntoIterator<Item = u128>, what: &str) -> Result<u128> {
    values
        .into_iter()
        .try_fold(0u128, u128::checked_add)
        .ok_or_else(|| SdkError::InvalidData(format!("{what} overflows u128")))
}

/// Input value left over after `required`, returned to the sender.
fn change(picked: &[Note], required: u128) -> Result<u128> {
    let input_total = checked_sum(picked.iter().map(Note::value), "picked note values")?;
    input_total
        .checked_sub(required)
        .ok_or_else(|| SdkError::InvalidData(format!("picked notes {input_total} do not cover {required}")))
}

/// Hand back held notes when building the input failed after picking them.
async fn release_on_error<T>(user: &UserState, picked: &[Note], result: Result<T>) -> Result<T> {
    if result.is_err() && !picked.is_empty() {
        if let Err(e) = user.release_notes(picked.iter().map(|n| n.nullifier).collect()).await {
            warn!(user = %user.id(), "proof factory: releasing picked notes failed: {e}");
        }
    }
    result
}

/// Builds the witness, public record and local bookkeeping for each tx kind.
pub struct ProofFactory {
    algos: NoteAlgorithms,
    hash_paths: Arc<dyn HashPathSource>,
}

impl ProofFactory {
    pub fn new(algos: NoteAlgorithms, hash_paths: Arc<dyn HashPathSource>) -> Self {
        Self { algos, hash_paths }
    }

    async fn merkle_root(&self) -> Result<Hash32> {
        Ok(self.hash_paths.get_tree_state(DATA_TREE).await?.root)
    }

    /// Paths of the settled inputs and the root, read from one tree version.
    async fn inputs(
        &self,
        picked: &[Note],
        owner: AccountPublicKey,
        asset_id: u32,
        private_key: &AccountPrivateKey,
    ) -> Result<Inputs> {
        if picked.len() > 2 {
            return Err(SdkError::InvalidData(format!("a join-split spends at most 2 notes, got {}", picked.len())));
        }
        let count = picked.len();
        let spent = picked.iter().map(|n| n.nullifier).collect();

        let settled: Vec<u64> = picked.iter().filter_map(|n| n.index).collect();
        let snapshot = self.hash_paths.get_snapshot(DATA_TREE, settled).await?;
        let mut settled_paths = snapshot.paths.into_iter();

        let mut notes = Vec::with_capacity(2);
        let mut indices = Vec::with_capacity(2);
        let mut paths = Vec::with_capacity(2);
        let mut nullifiers = Vec::with_capacity(2);
        for note in picked.iter().cloned() {
            let path = match note.index {
                Some(_) => settled_paths
                    .next()
                    .ok_or_else(|| SdkError::InvalidData("tree snapshot is missing a hash path".into()))?,
                // chained: the note is not in the tree yet
                None => HashPath::default(),
            };
            indices.push(note.index.unwrap_or(0));
            paths.push(path);
            nullifiers.push(note.nullifier);
            notes.push(note.tree_note);
        }
        while notes.len() < 2 {
            let dummy = TreeNote::dummy(owner, asset_id, &mut OsRng);
            let commitment = self.algos.value_note_commitment(&dummy);
            nullifiers.push(self.algos.value_note_nullifier(&commitment, private_key, false));
            indices.push(0);
            paths.push(HashPath::default());
            notes.push(dummy);
        }

        Ok(Inputs {
            merkle_root: snapshot.state.root,
            count,
            notes: pair(notes, "input notes")?,
            indices: pair(indices, "input indices")?,
            paths: pair(paths, "input paths")?,
            nullifiers: pair(nullifiers, "input nullifiers")?,
            spent,
        })
    }

    /// Local record of an output we own, spendable early when `allow_chain`.
    fn pending_note(&self, tree_note: TreeNote, private_key: &AccountPrivateKey, allow_chain: bool) -> Note {
        let commitment = self.algos.value_note_commitment(&tree_note);
        Note {
            nullifier: self.algos.value_note_nullifier(&commitment, private_key, true),
            tree_note,
            commitment,
            index: None,
            allow_chain,
            nullified: false,
            pending: true,
            hash_path: None,
        }
    }

    /// Picks and holds the input notes on the user's queue; they are given
    /// back if the input cannot be built.
    pub async fn create_payment_proof_input(&self, user: &UserState, spec: PaymentSpec) -> Result<ProofInput> {
        let outputs_total = checked_sum(
            [spec.recipient_private_output, spec.sender_private_output, spec.public_output, spec.fee],
            "payment outputs plus fee",
        )?;
        if spec.public_input > outputs_total {
            return Err(SdkError::InvalidData(format!(
                "public input {} exceeds outputs plus fee {outputs_total}",
                spec.public_input
            )));
        }
        let required = outputs_total - spec.public_input;
        let picked = if required == 0 { Vec::new() } else { user.reserve_notes(spec.asset_id, required).await? };
        let result = self.payment_input(user, spec, &picked, required).await;
        release_on_error(user, &picked, result).await
    }

    async fn payment_input(
        &self,
        user: &UserState,
        spec: PaymentSpec,
        picked: &[Note],
        required: u128,
    ) -> Result<ProofInput> {
        let sender = user.id();
        let private_key = user.private_key();
        let input_total = checked_sum(picked.iter().map(Note::value), "picked note values")?;
        let change = change(picked, required)?;
        let sender_value = checked_sum([spec.sender_private_output, change], "sender output plus change")?;

        let inputs = self.inputs(picked, sender, spec.asset_id, private_key).await?;
        let merkle_root = inputs.merkle_root;

        let recipient = spec.recipient.unwrap_or(sender);
        let out1 = TreeNote::new(
            recipient,
            spec.recipient_private_output,
            spec.asset_id,
            spec.recipient_account_required,
            inputs.nullifiers[0],
            &mut OsRng,
        );
        let out2 = TreeNote::new(
            sender,
            sender_value,
            spec.asset_id,
            false,
            inputs.nullifiers[1],
            &mut OsRng,
        );

        let (proof_id, public_value) = match spec.kind {
            PaymentKind::Deposit => (ProofId::Deposit, spec.public_input),
            PaymentKind::Transfer => (ProofId::Send, 0),
            PaymentKind::Withdraw => (ProofId::Withdraw, spec.public_output),
        };
        let public_owner = match spec.kind {
            PaymentKind::Transfer => None,
            _ => spec.public_owner,
        };

        let inner = InnerProofData {
            proof_id,
            note_commitment_1: self.algos.value_note_commitment(&out1),
            note_commitment_2: self.algos.value_note_commitment(&out2),
            nullifier_1: inputs.nullifiers[0],
            nullifier_2: inputs.nullifiers[1],
            public_value,
            public_owner: public_owner.unwrap_or([0u8; 32]),
            asset_id: u32_word(spec.asset_id),
        };
        let tx_id = TxId(inner.tx_id(self.algos.hasher().as_ref()));

        let viewing_keys = vec![
            ViewingKey::create(&out1.plaintext(), &recipient, &mut OsRng)?,
            ViewingKey::create(&out2.plaintext(), &sender, &mut OsRng)?,
        ];

        let mut output_notes = Vec::new();
        if recipient == sender {
            output_notes.push(self.pending_note(out1.clone(), private_key, spec.allow_chain));
        }
        output_notes.push(self.pending_note(out2.clone(), private_key, spec.allow_chain));
        output_notes.retain(|n| n.value() > 0);

        let user_tx = CoreUserTx::Payment(UserPaymentTx {
            tx_id,
            user_id: sender,
            kind: spec.kind,
            asset_id: spec.asset_id,
            public_value,
            public_owner,
            private_input: input_total,
            recipient_private_output: spec.recipient_private_output,
            sender_private_output: sender_value,
            is_sender: true,
            is_recipient: recipient == sender,
            fee: spec.fee,
            created: Utc::now(),
            settled: None,
        });

        debug!(user = %sender, tx_id = %tx_id, ?proof_id, inputs = inputs.count, "proof factory: payment input built");

        Ok(ProofInput {
            tx: ProofTx::JoinSplit(JoinSplitTx {
                proof_id,
                public_value,
                public_owner,
                asset_id: spec.asset_id,
                num_input_notes: inputs.count,
                input_notes: inputs.notes,
                input_indices: inputs.indices,
                input_paths: inputs.paths,
                input_nullifiers: inputs.nullifiers,
                output_notes: [out1, out2],
                claim_note: None,
                bridge_call_data: None,
                merkle_root,
                fee: spec.fee,
                allow_chain: spec.allow_chain,
            }),
            inner,
            tx_id,
            signing_data: *tx_id.as_bytes(),
            viewing_keys,
            user_tx,
            output_notes,
            spent_nullifiers: inputs.spent,
            claim: None,
        })
    }

    /// Register, migrate or add spending keys to an account. Account txs
    /// move no value; `fee` is recorded but paid by a separate payment.
    pub async fn create_account_proof_input(&self, user: &UserState, spec: AccountSpec) -> Result<ProofInput> {
        let account = user.id();
        let new_account = spec.new_account_public_key.unwrap_or(account);
        if spec.migrate && new_account == account {
            return Err(SdkError::InvalidData("migration needs a new account public key".into()));
        }
        if spec.alias.trim().is_empty() {
            return Err(SdkError::InvalidData("alias must not be empty".into()));
        }

        let alias_hash = self.algos.alias_hash(&spec.alias);
        let commitment = |key: Option<AccountPublicKey>| match key {
            Some(key) => self.algos.account_note_commitment(&alias_hash, &new_account, &key),
            None => [0u8; 32],
        };
        let claims_alias = spec.create || spec.migrate;
        let (nullifier_1, nullifier_2) = if claims_alias {
            (
                self.algos.account_alias_hash_nullifier(&alias_hash),
                self.algos.account_public_key_nullifier(&new_account),
            )
        } else {
            ([0u8; 32], [0u8; 32])
        };

        let inner = InnerProofData {
            proof_id: ProofId::Account,
            note_commitment_1: commitment(spec.new_spending_public_key_1),
            note_commitment_2: commitment(spec.new_spending_public_key_2),
            nullifier_1,
            nullifier_2,
            public_value: 0,
            public_owner: [0u8; 32],
            asset_id: [0u8; 32],
        };
        let tx_id = TxId(inner.tx_id(self.algos.hasher().as_ref()));
        let merkle_root = self.merkle_root().await?;

        let user_tx = CoreUserTx::Account(UserAccountTx {
            tx_id,
            user_id: account,
            alias_hash,
            new_spending_public_key_1: spec.new_spending_public_key_1,
            new_spending_public_key_2: spec.new_spending_public_key_2,
            migrated: spec.migrate,
            fee: spec.fee,
            created: Utc::now(),
            settled: None,
        });

        Ok(ProofInput {
            tx: ProofTx::Account(AccountTx {
                merkle_root,
                account_public_key: account,
                new_account_public_key: new_account,
                alias_hash,
                create: spec.create,
                migrate: spec.migrate,
                new_spending_public_key_1: spec.new_spending_public_key_1,
                new_spending_public_key_2: spec.new_spending_public_key_2,
            }),
            inner,
            tx_id,
            signing_data: *tx_id.as_bytes(),
            viewing_keys: Vec::new(),
            user_tx,
            output_notes: Vec::new(),
            spent_nullifiers: Vec::new(),
            claim: None,
        })
    }

    /// Deposit into a bridge. Output 1 is the partial claim note, output 2
    /// the change. The claim secret is kept locally so the claim outputs can
    /// be recognised later.
    pub async fn create_defi_proof_input(&self, user: &UserState, spec: DefiSpec) -> Result<ProofInput> {
        if spec.deposit_value == 0 {
            return Err(SdkError::InvalidData("defi deposit value must be positive".into()));
        }
        let required = checked_sum([spec.deposit_value, spec.fee], "defi deposit plus fee")?;
        let picked = user.reserve_notes(spec.bridge_call_data.input_asset_id, required).await?;
        let result = self.defi_input(user, spec, &picked, required).await;
        release_on_error(user, &picked, result).await
    }

    async fn defi_input(&self, user: &UserState, spec: DefiSpec, picked: &[Note], required: u128) -> Result<ProofInput> {
        let account = user.id();
        let private_key = user.private_key();
        let bridge = spec.bridge_call_data;
        let asset_id = bridge.input_asset_id;
        let change = change(picked, required)?;

        let inputs = self.inputs(picked, account, asset_id, private_key).await?;
        let merkle_root = inputs.merkle_root;

        let mut value_note_secret = [0u8; 32];
        OsRng.fill_bytes(&mut value_note_secret);
        let claim_note = TreeClaimNote {
            value: spec.deposit_value,
            bridge_call_data: bridge,
            value_note_partial_commitment: self.algos.value_note_partial_commitment(
                &value_note_secret,
                &account,
                false,
                &[0u8; 32],
            ),
            input_nullifier: inputs.nullifiers[0],
            defi_interaction_nonce: 0,
            fee: 0,
        };
        let claim_partial_commitment = self.algos.claim_note_partial_commitment(&claim_note);

        let out1 = TreeNote::dummy(account, asset_id, &mut OsRng);
        let out2 = TreeNote::new(account, change, asset_id, false, inputs.nullifiers[1], &mut OsRng);

        let inner = InnerProofData {
            proof_id: ProofId::DefiDeposit,
            note_commitment_1: claim_partial_commitment,
            note_commitment_2: self.algos.value_note_commitment(&out2),
            nullifier_1: inputs.nullifiers[0],
            nullifier_2: inputs.nullifiers[1],
            public_value: spec.fee,
            public_owner: [0u8; 32],
            asset_id: bridge.to_word(),
        };
        let tx_id = TxId(inner.tx_id(self.algos.hasher().as_ref()));
        let viewing_keys = vec![ViewingKey::create(&out2.plaintext(), &account, &mut OsRng)?];

        let mut output_notes = Vec::new();
        if change > 0 {
            output_notes.push(self.pending_note(out2.clone(), private_key, false));
        }

        let claim = ClaimTx {
            defi_tx_id: tx_id,
            user_id: account,
            claim_partial_commitment,
            value_note_secret,
            interaction_nonce: None,
            claim_nullifier: None,
        };
        let user_tx =
            CoreUserTx::Defi(UserDefiTx::new(tx_id, account, bridge, spec.deposit_value, spec.fee, Utc::now()));

        debug!(user = %account, tx_id = %tx_id, deposit = spec.deposit_value, "proof factory: defi input built");

        Ok(ProofInput {
            tx: ProofTx::JoinSplit(JoinSplitTx {
                proof_id: ProofId::DefiDeposit,
                public_value: 0,
                public_owner: None,
                asset_id,
                num_input_notes: inputs.count,
                input_notes: inputs.notes,
                input_indices: inputs.indices,
                input_paths: inputs.paths,
                input_nullifiers: inputs.nullifiers,
                output_notes: [out1, out2],
                claim_note: Some(claim_note),
                bridge_call_data: Some(bridge),
                merkle_root,
                fee: spec.fee,
                allow_chain: false,
            }),
            inner,
            tx_id,
            signing_data: *tx_id.as_bytes(),
            viewing_keys,
            user_tx,
            output_notes,
            spent_nullifiers: inputs.spent,
            claim: Some(claim),
        })
    }

    /// Check the owner's signature, run the prover and assemble the bytes
    /// that go to the rollup provider.
    pub async fn create_proof(
        &self,
        input: ProofInput,
        signature: &SignatureBytes,
        signer: &AccountPublicKey,
        prover: &dyn Prover,
    ) -> Result<ProofOutput> {
        if !signer.verify(&input.signing_data, signature) {
            return Err(SdkError::InvalidData(format!("signature does not cover tx {}", input.tx_id)));
        }

        let proof = match &input.tx {
            ProofTx::JoinSplit(tx) if tx.proof_id == ProofId::DefiDeposit => {
                prover.prove_defi_deposit(tx, signature).await?
            }
            ProofTx::JoinSplit(tx) => prover.prove_join_split(tx, signature).await?,
            ProofTx::Account(tx) => prover.prove_account(tx, signature).await?,
        };

        let mut proof_data = input.inner.to_bytes().to_vec();
        proof_data.extend_from_slice(&proof);
        let offchain_tx_data = input.viewing_keys.iter().flat_map(|k| k.as_bytes().iter().copied()).collect();

        Ok(ProofOutput {
            tx_id: input.tx_id,
            proof_data,
            offchain_tx_data,
            user_tx: input.user_tx,
            output_notes: input.output_notes,
            spent_nullifiers: input.spent_nullifiers,
            claim: input.claim,
        })
    }
}
