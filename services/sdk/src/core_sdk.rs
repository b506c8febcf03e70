//! Top-level client: owns the world state, the users and the sync loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use authdb::AuthDb;
use notes::{
    create_decryptor, AccountPrivateKey, AccountPublicKey, Decryptor, NoteAlgorithms, SignatureBytes, TxId,
};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tree::Hasher;

use crate::block::Block;
use crate::block_context::BlockContext;
use crate::block_downloader::BlockDownloader;
use crate::config::LockConfig;
use crate::error::{Result, SdkError};
use crate::events::{self, emit, EventSender, SdkEvent};
use crate::hash_path_source::HashPathSource;
use crate::lock::{DbMutex, SqlLockDb};
use crate::proofs::{
    AccountSpec, DefiSpec, PaymentSpec, ProofFactory, ProofInput, ProofOutput, Prover, ProverError, TxFees,
    TxSettlementTime, TxType,
};
use crate::provider::{RollupProvider, Tx};
use crate::serial_queue::{AnySerialQueue, MutexSerialQueue, SerialQueue};
use crate::sleep::InterruptibleSleep;
use crate::user_state::{UserState, UserStore};
use crate::world_state::WorldState;
use crate::SharedStorage;

/// Must equal the provider's reported version before sync starts.
pub const CLIENT_VERSION: &str = "1.0.0";

const WORLD_STATE_LOCK: &str = "world-state";

pub struct CoreSdkOptions {
    pub storage: SharedStorage,
    pub provider: Arc<dyn RollupProvider>,
    /// Defaults to the local world state.
    pub hash_paths: Option<Arc<dyn HashPathSource>>,
    pub prover: Option<Arc<dyn Prover>>,
    pub hasher: Arc<dyn Hasher>,
    pub decrypt_threads: usize,
    pub download_queue_size: usize,
    pub poll_interval: Duration,
    /// Guard world-state writes with a lease shared by every process on
    /// the same storage.
    pub lock: Option<LockConfig>,
}

struct Inner {
    provider: Arc<dyn RollupProvider>,
    prover: Option<Arc<dyn Prover>>,
    hasher: Arc<dyn Hasher>,
    algos: NoteAlgorithms,
    decryptor: Arc<dyn Decryptor>,
    world_state: Arc<WorldState>,
    user_store: Arc<UserStore>,
    auth_db: AuthDb<SharedStorage>,
    factory: ProofFactory,
    users: RwLock<HashMap<AccountPublicKey, Arc<UserState>>>,
    fees: RwLock<TxFees>,
    downloader: BlockDownloader,
    sleep: InterruptibleSleep,
    poll_interval: Duration,
    shutdown: CancellationToken,
    events: EventSender,
}

pub struct CoreSdk {
    inner: Arc<Inner>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl CoreSdk {
    /// Must be called inside a tokio runtime.
    pub fn new(options: CoreSdkOptions) -> Result<Self> {
        let storage = options.storage;
        let queue = match options.lock {
            Some(config) => {
                let db = Arc::new(SqlLockDb::connect_lazy(&config.database_url)?);
                let mutex = Arc::new(DbMutex::new(db, WORLD_STATE_LOCK, config));
                AnySerialQueue::Locked(MutexSerialQueue::new(mutex))
            }
            None => AnySerialQueue::Plain(SerialQueue::new()),
        };
        let world_state = Arc::new(WorldState::new(storage.clone(), options.hasher.clone(), queue)?);
        let hash_paths = options
            .hash_paths
            .unwrap_or_else(|| world_state.clone() as Arc<dyn HashPathSource>);
        let algos = NoteAlgorithms::new(options.hasher.clone());

        let inner = Inner {
            provider: options.provider.clone(),
            prover: options.prover,
            hasher: options.hasher,
            factory: ProofFactory::new(algos.clone(), hash_paths),
            algos,
            decryptor: create_decryptor(options.decrypt_threads)?,
            world_state,
            user_store: Arc::new(UserStore::new(storage.clone())),
            auth_db: AuthDb::new(storage),
            users: RwLock::new(HashMap::new()),
            fees: RwLock::new(TxFees::default()),
            downloader: BlockDownloader::new(
                options.provider,
                options.download_queue_size,
                options.poll_interval,
            ),
            sleep: InterruptibleSleep::new(),
            poll_interval: options.poll_interval,
            shutdown: CancellationToken::new(),
            events: events::channel(),
        };
        Ok(Self { inner: Arc::new(inner), sync_task: Mutex::new(None) })
    }

    pub fn events(&self) -> broadcast::Receiver<SdkEvent> {
        self.inner.events.subscribe()
    }

    pub fn world_state(&self) -> &Arc<WorldState> {
        &self.inner.world_state
    }

    pub fn auth_db(&self) -> &AuthDb<SharedStorage> {
        &self.inner.auth_db
    }

    // sync

    /// Check the provider version, load fees and start following the chain
    /// from the world state's sync point.
    pub async fn start_sync(&self) -> Result<()> {
        let mut task = self.sync_task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let status = self.inner.provider.get_status().await?;
        if status.version != CLIENT_VERSION {
            warn!(client = CLIENT_VERSION, server = %status.version, "core sdk: version mismatch, not syncing");
            emit(
                &self.inner.events,
                SdkEvent::VersionMismatch { client: CLIENT_VERSION.into(), server: status.version.clone() },
            );
            return Err(SdkError::VersionMismatch { client: CLIENT_VERSION.into(), server: status.version });
        }
        *self.inner.fees.write().await = TxFees::from_status(&status);

        let from = self.inner.world_state.synced_to_rollup()?.map_or(0, |id| id + 1);
        self.inner.downloader.start(from).await;

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.sync_loop().await }));
        info!(from, "core sdk: sync started");
        Ok(())
    }

    pub async fn is_syncing(&self) -> bool {
        self.sync_task.lock().await.is_some() && !self.inner.shutdown.is_cancelled()
    }

    /// Stop syncing and wait for the batch in flight. Terminal.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.sleep.interrupt_all();
        self.inner.downloader.stop().await;
        let task = self.sync_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "core sdk: sync task panicked");
            }
        }
        emit(&self.inner.events, SdkEvent::SyncStopped);
        info!("core sdk: sync stopped");
    }

    /// Stop and shut down every serial queue.
    pub async fn destroy(&self) {
        self.stop().await;
        let users: Vec<_> = self.inner.users.write().await.drain().map(|(_, u)| u).collect();
        for user in users {
            user.destroy().await;
        }
        self.inner.world_state.destroy().await;
    }

    // users

    /// Start tracking an account. It is brought up to the world state's
    /// sync point before this returns.
    pub async fn add_user(&self, private_key: AccountPrivateKey) -> Result<Arc<UserState>> {
        let id = private_key.public_key();
        if let Some(user) = self.inner.users.read().await.get(&id) {
            return Ok(user.clone());
        }

        let user = Arc::new(UserState::new(
            private_key,
            self.inner.user_store.clone(),
            self.inner.algos.clone(),
            self.inner.decryptor.clone(),
            self.inner.provider.clone(),
            self.inner.events.clone(),
        )?);
        if let Some(target) = self.inner.world_state.synced_to_rollup()? {
            if user.synced_to_rollup()?.map_or(true, |synced| synced < target) {
                user.catch_up(target).await?;
            }
        }

        let mut users = self.inner.users.write().await;
        let user = users.entry(id).or_insert(user).clone();
        info!(user = %id, "core sdk: user added");
        Ok(user)
    }

    pub async fn remove_user(&self, id: &AccountPublicKey) -> Result<()> {
        let user = self.inner.users.write().await.remove(id).ok_or(SdkError::UnknownUser(*id))?;
        user.destroy().await;
        self.inner.user_store.remove_user(id)?;
        info!(user = %id, "core sdk: user removed");
        Ok(())
    }

    pub async fn user_state(&self, id: &AccountPublicKey) -> Result<Arc<UserState>> {
        self.inner.users.read().await.get(id).cloned().ok_or(SdkError::UnknownUser(*id))
    }

    pub async fn users(&self) -> Vec<AccountPublicKey> {
        self.inner.users.read().await.keys().copied().collect()
    }

    pub async fn get_balance(&self, id: &AccountPublicKey, asset_id: u32) -> Result<u128> {
        self.user_state(id).await?.balance(asset_id)
    }

    pub async fn get_spendable_sum(&self, id: &AccountPublicKey, asset_id: u32) -> Result<u128> {
        self.user_state(id).await?.spendable_sum(asset_id)
    }

    pub async fn get_max_spendable_value(&self, id: &AccountPublicKey, asset_id: u32) -> Result<u128> {
        self.user_state(id).await?.max_spendable_value(asset_id)
    }

    // fees

    pub async fn get_fee(&self, asset_id: u32, tx_type: TxType, speed: TxSettlementTime) -> Result<u128> {
        self.inner.fees.read().await.fee(asset_id, tx_type, speed)
    }

    pub async fn get_defi_fee(&self, asset_id: u32, speed: TxSettlementTime) -> Result<u128> {
        self.inner.fees.read().await.defi_fee(asset_id, speed)
    }

    // proofs

    pub async fn create_payment_proof_input(&self, id: &AccountPublicKey, spec: PaymentSpec) -> Result<ProofInput> {
        let user = self.user_state(id).await?;
        self.inner.factory.create_payment_proof_input(&user, spec).await
    }

    pub async fn create_account_proof_input(&self, id: &AccountPublicKey, spec: AccountSpec) -> Result<ProofInput> {
        let user = self.user_state(id).await?;
        self.inner.factory.create_account_proof_input(&user, spec).await
    }

    pub async fn create_defi_proof_input(&self, id: &AccountPublicKey, spec: DefiSpec) -> Result<ProofInput> {
        let user = self.user_state(id).await?;
        self.inner.factory.create_defi_proof_input(&user, spec).await
    }

    /// Give back the notes a proof input holds when it will not be sent.
    pub async fn discard_proof_input(&self, input: &ProofInput) -> Result<()> {
        let user = self.user_state(&input.user_tx.user_id()).await?;
        user.release_notes(input.spent_nullifiers.clone()).await
    }

    /// Sign with the key of the user the input belongs to.
    pub async fn sign_proof_input(&self, input: &ProofInput) -> Result<SignatureBytes> {
        let user = self.user_state(&input.user_tx.user_id()).await?;
        Ok(user.private_key().sign(&input.signing_data))
    }

    pub async fn create_proof(&self, input: ProofInput, signature: &SignatureBytes) -> Result<ProofOutput> {
        let prover = self
            .inner
            .prover
            .clone()
            .ok_or_else(|| ProverError::Unavailable("no prover configured".into()))?;
        let signer = input.user_tx.user_id();
        self.inner.factory.create_proof(input, signature, &signer, prover.as_ref()).await
    }

    /// Submit to the provider, then record the tx and its notes locally.
    pub async fn send_proof(&self, output: ProofOutput) -> Result<TxId> {
        let user = self.user_state(&output.user_tx.user_id()).await?;
        let tx = Tx {
            proof_data: output.proof_data.clone(),
            offchain_tx_data: output.offchain_tx_data.clone(),
            deposit_signature: None,
        };
        let ids = self.inner.provider.send_txs(vec![tx]).await?;
        let tx_id = ids.first().copied().unwrap_or(output.tx_id);
        if tx_id != output.tx_id {
            warn!(local = %output.tx_id, remote = %tx_id, "core sdk: provider returned a different tx id");
        }
        user.add_proof_output(output).await?;
        info!(tx_id = %tx_id, "core sdk: proof sent");
        Ok(tx_id)
    }
}

impl Inner {
    async fn sync_loop(self: Arc<Self>) {
        loop {
            let blocks = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                blocks = self.downloader.get_blocks() => blocks,
            };
            let Some(blocks) = blocks else { break };

            let contexts = match self.contexts(blocks) {
                Ok(contexts) => contexts,
                Err(e) => {
                    error!(error = %e, "core sdk: undecodable block, sync halted");
                    break;
                }
            };

            // retried until it goes through; both sides skip what they already hold
            while let Err(e) = self.apply_batch(&contexts).await {
                error!(error = %e, "core sdk: failed to apply blocks, retrying");
                if !self.sleep.sleep(self.poll_interval).await {
                    return;
                }
            }
        }
    }

    fn contexts(&self, blocks: Vec<Block>) -> Result<Vec<Arc<BlockContext>>> {
        blocks
            .into_iter()
            .map(|b| BlockContext::from_block(b, self.hasher.clone()).map(Arc::new))
            .collect()
    }

    async fn apply_batch(&self, contexts: &[Arc<BlockContext>]) -> Result<()> {
        if let Some(rollup_id) = self.world_state.apply_blocks(contexts.to_vec()).await? {
            emit(&self.events, SdkEvent::UpdatedWorldState { rollup_id, data_size: self.world_state.size() });
        }

        let users: Vec<Arc<UserState>> = self.users.read().await.values().cloned().collect();
        let mut set = JoinSet::new();
        for user in users {
            let contexts = contexts.to_vec();
            set.spawn(async move { user.process_blocks(contexts).await });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(|e| SdkError::Join(e.to_string())).and_then(|r| r);
            if let Err(e) = result {
                warn!(error = %e, "core sdk: user failed to process blocks");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
