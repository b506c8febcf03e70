use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};
use crate::provider::{AssetFees, RollupProviderStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Deposit,
    Transfer,
    WithdrawToWallet,
    WithdrawHighGas,
    Account,
    DefiDeposit,
    DefiClaim,
}

impl TxType {
    pub const ALL: [TxType; 7] = [
        TxType::Deposit,
        TxType::Transfer,
        TxType::WithdrawToWallet,
        TxType::WithdrawHighGas,
        TxType::Account,
        TxType::DefiDeposit,
        TxType::DefiClaim,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxSettlementTime {
    /// Wait for the rollup to fill.
    NextRollup,
    /// Pay enough for the rollup to publish right away.
    Instant,
}

/// Fee schedule taken from the provider status.
#[derive(Clone, Debug, Default)]
pub struct TxFees {
    assets: HashMap<u32, AssetFees>,
}

impl TxFees {
    pub fn from_status(status: &RollupProviderStatus) -> Self {
        Self {
            assets: status.asset_fees.iter().map(|f| (f.asset_id, f.clone())).collect(),
        }
    }

    pub fn fee(&self, asset_id: u32, tx_type: TxType, speed: TxSettlementTime) -> Result<u128> {
        let fees = self.assets.get(&asset_id).ok_or(SdkError::UnsupportedAsset(asset_id))?;
        let extra = fees.tx_type_fees.get(tx_type.index()).copied().ok_or_else(|| {
            SdkError::InvalidData(format!("asset {asset_id} has no fee for {tx_type:?}"))
        })?;
        let overflow = || SdkError::InvalidData(format!("{tx_type:?} fee for asset {asset_id} overflows u128"));
        let next_rollup = fees.base_fee.checked_add(extra).ok_or_else(overflow)?;
        match speed {
            TxSettlementTime::NextRollup => Ok(next_rollup),
            TxSettlementTime::Instant => next_rollup
                .checked_mul(fees.instant_fee_multiplier.max(1) as u128)
                .ok_or_else(overflow),
        }
    }

    /// A DeFi deposit pays up front for the claim that finishes it.
    pub fn defi_fee(&self, asset_id: u32, speed: TxSettlementTime) -> Result<u128> {
        self.fee(asset_id, TxType::DefiDeposit, speed)?
            .checked_add(self.fee(asset_id, TxType::DefiClaim, TxSettlementTime::NextRollup)?)
            .ok_or_else(|| SdkError::InvalidData(format!("defi fee for asset {asset_id} overflows u128")))
    }
}
