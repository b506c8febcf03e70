use serde::{Deserialize, Serialize};

use crate::encoding::{Word, WORD_SIZE};

/// Identifies one bridge interaction type: which bridge, which assets go in
/// and come out, plus bridge-specific auxiliary data.
///
/// Packed into a single word:
/// `0(7) | has_output_b(1) | bridge(4) | input_a(4) | output_a(4) | output_b(4) | aux(8)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeCallData {
    pub bridge_address_id: u32,
    pub input_asset_id: u32,
    pub output_asset_id_a: u32,
    pub output_asset_id_b: Option<u32>,
    pub aux_data: u64,
}

impl BridgeCallData {
    pub fn new(bridge_address_id: u32, input_asset_id: u32, output_asset_id_a: u32) -> Self {
        Self {
            bridge_address_id,
            input_asset_id,
            output_asset_id_a,
            output_asset_id_b: None,
            aux_data: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_word(&self) -> Word {
        let mut out = [0u8; WORD_SIZE];
        out[7] = self.output_asset_id_b.is_some() as u8;
        out[8..12].copy_from_slice(&self.bridge_address_id.to_be_bytes());
        out[12..16].copy_from_slice(&self.input_asset_id.to_be_bytes());
        out[16..20].copy_from_slice(&self.output_asset_id_a.to_be_bytes());
        out[20..24].copy_from_slice(&self.output_asset_id_b.unwrap_or(0).to_be_bytes());
        out[24..].copy_from_slice(&self.aux_data.to_be_bytes());
        out
    }

    pub fn from_word(w: &Word) -> Self {
        let u32_at = |at: usize| u32::from_be_bytes([w[at], w[at + 1], w[at + 2], w[at + 3]]);
        let mut aux = [0u8; 8];
        aux.copy_from_slice(&w[24..]);
        Self {
            bridge_address_id: u32_at(8),
            input_asset_id: u32_at(12),
            output_asset_id_a: u32_at(16),
            output_asset_id_b: (w[7] == 1).then(|| u32_at(20)),
            aux_data: u64::from_be_bytes(aux),
        }
    }
}
