//! Proof input construction, fees and the prover seam

mod factory;
mod fee;
mod prover;
mod tx;

pub use factory::ProofFactory;
pub use fee::{TxFees, TxSettlementTime, TxType};
pub use prover::{Prover, ProverError};
pub use tx::{AccountSpec, AccountTx, DefiSpec, JoinSplitTx, PaymentSpec, ProofInput, ProofOutput, ProofTx};
