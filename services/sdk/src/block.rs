//! Settled block and its binary wire format
//!
//! `tx_hash(32) | mined(u64 BE ms) | rollup_id(u32) | rollup_size(u32) |
//! rollup_proof_data(len ‖ bytes) | offchain_tx_data(count ‖ (len ‖ bytes)*) |
//! interaction_result(count ‖ 192-byte records) | gas_used(u32) |
//! gas_price(32) | subtree_root(len ‖ 0 or 32 bytes)`

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use notes::encoding::{u128_word, u32_word, word_u128, word_u32, Word, WORD_SIZE};
use notes::BridgeCallData;
use tree::Hash32;

use crate::error::{Result, SdkError};

pub const INTERACTION_EVENT_SIZE: usize = 6 * WORD_SIZE;

/// Outcome of one bridge interaction as reported by the rollup contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefiInteractionEvent {
    pub bridge_call_data: BridgeCallData,
    pub nonce: u32,
    pub total_input_value: u128,
    pub total_output_value_a: u128,
    pub total_output_value_b: u128,
    pub result: bool,
}

impl DefiInteractionEvent {
    pub fn to_bytes(&self) -> [u8; INTERACTION_EVENT_SIZE] {
        let words = [
            self.bridge_call_data.to_word(),
            u32_word(self.nonce),
            u128_word(self.total_input_value),
            u128_word(self.total_output_value_a),
            u128_word(self.total_output_value_b),
            u32_word(self.result as u32),
        ];
        let mut out = [0u8; INTERACTION_EVENT_SIZE];
        for (i, w) in words.iter().enumerate() {
            out[i * WORD_SIZE..(i + 1) * WORD_SIZE].copy_from_slice(w);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != INTERACTION_EVENT_SIZE {
            return Err(SdkError::InvalidData(format!(
                "interaction event is {INTERACTION_EVENT_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let word = |i: usize| &bytes[i * WORD_SIZE..(i + 1) * WORD_SIZE];
        let value = |i: usize| word_u128(word(i)).ok_or_else(|| SdkError::InvalidData("event value overflows".into()));
        let mut bridge: Word = [0u8; WORD_SIZE];
        bridge.copy_from_slice(word(0));
        Ok(Self {
            bridge_call_data: BridgeCallData::from_word(&bridge),
            nonce: word_u32(word(1)).ok_or_else(|| SdkError::InvalidData("event nonce overflows".into()))?,
            total_input_value: value(2)?,
            total_output_value_a: value(3)?,
            total_output_value_b: value(4)?,
            result: match word_u32(word(5)) {
                Some(0) => false,
                Some(1) => true,
                _ => return Err(SdkError::InvalidData("event result must be 0 or 1".into())),
            },
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub tx_hash: Hash32,
    pub mined: DateTime<Utc>,
    pub rollup_id: u32,
    pub rollup_size: u32,
    pub rollup_proof_data: Vec<u8>,
    /// One entry per non-padding inner proof, in inner proof order.
    pub offchain_tx_data: Vec<Vec<u8>>,
    pub interaction_result: Vec<DefiInteractionEvent>,
    pub gas_used: u32,
    /// Big-endian 256-bit integer.
    pub gas_price: Hash32,
    pub subtree_root: Option<Hash32>,
}

impl Block {
    /// Fails for blocks mined before the unix epoch, which the u64 wire
    /// timestamp cannot carry.
    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let mined_ms = u64::try_from(self.mined.timestamp_millis())
            .map_err(|_| SdkError::InvalidData(format!("mined timestamp {} is before the epoch", self.mined)))?;
        out.put_slice(&self.tx_hash);
        out.put_u64(mined_ms);
        out.put_u32(self.rollup_id);
        out.put_u32(self.rollup_size);
        put_vec(out, &self.rollup_proof_data);
        out.put_u32(self.offchain_tx_data.len() as u32);
        for data in &self.offchain_tx_data {
            put_vec(out, data);
        }
        out.put_u32(self.interaction_result.len() as u32);
        for event in &self.interaction_result {
            out.put_slice(&event.to_bytes());
        }
        out.put_u32(self.gas_used);
        out.put_slice(&self.gas_price);
        match &self.subtree_root {
            Some(root) => put_vec(out, root),
            None => out.put_u32(0),
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        self.encode(&mut out)?;
        Ok(out.to_vec())
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let tx_hash = take_hash(buf)?;
        let mined_ms = get_u64(buf)?;
        let mined = i64::try_from(mined_ms)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| SdkError::InvalidData(format!("mined timestamp {mined_ms} out of range")))?;
        let rollup_id = get_u32(buf)?;
        let rollup_size = get_u32(buf)?;
        let rollup_proof_data = take_vec(buf)?;

        let count = get_u32(buf)? as usize;
        let mut offchain_tx_data = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            offchain_tx_data.push(take_vec(buf)?);
        }

        let count = get_u32(buf)? as usize;
        let mut interaction_result = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let record = take(buf, INTERACTION_EVENT_SIZE)?;
            interaction_result.push(DefiInteractionEvent::from_bytes(&record)?);
        }

        let gas_used = get_u32(buf)?;
        let gas_price = take_hash(buf)?;
        let subtree_root = match take_vec(buf)? {
            v if v.is_empty() => None,
            v => Some(
                v.try_into()
                    .map_err(|v: Vec<u8>| SdkError::InvalidData(format!("subtree root of {} bytes", v.len())))?,
            ),
        };

        Ok(Self {
            tx_hash,
            mined,
            rollup_id,
            rollup_size,
            rollup_proof_data,
            offchain_tx_data,
            interaction_result,
            gas_used,
            gas_price,
            subtree_root,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(bytes);
        let block = Self::decode(&mut buf)?;
        if buf.has_remaining() {
            return Err(SdkError::InvalidData(format!("{} trailing bytes after block", buf.remaining())));
        }
        Ok(block)
    }
}

/// `count(u32 BE) | block*`, the body of a `get-blocks` response.
pub fn encode_blocks(blocks: &[Block]) -> Result<Vec<u8>> {
    let mut out = BytesMut::new();
    out.put_u32(blocks.len() as u32);
    for block in blocks {
        block.encode(&mut out)?;
    }
    Ok(out.to_vec())
}

pub fn decode_blocks(bytes: &[u8]) -> Result<Vec<Block>> {
    let mut buf = Bytes::copy_from_slice(bytes);
    let count = get_u32(&mut buf)? as usize;
    let mut blocks = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        blocks.push(Block::decode(&mut buf)?);
    }
    if buf.has_remaining() {
        return Err(SdkError::InvalidData(format!("{} trailing bytes after blocks", buf.remaining())));
    }
    Ok(blocks)
}

fn put_vec(out: &mut BytesMut, data: &[u8]) {
    out.put_u32(data.len() as u32);
    out.put_slice(data);
}

fn take(buf: &mut Bytes, n: usize) -> Result<Bytes> {
    if buf.remaining() < n {
        return Err(SdkError::InvalidData(format!(
            "block truncated: wanted {n} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(n))
}

fn take_vec(buf: &mut Bytes) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    Ok(take(buf, len)?.to_vec())
}

fn take_hash(buf: &mut Bytes) -> Result<Hash32> {
    let mut out = [0u8; 32];
    out.copy_from_slice(&take(buf, 32)?);
    Ok(out)
}

fn get_u32(buf: &mut Bytes) -> Result<u32> {
    Ok(take(buf, 4)?.get_u32())
}

fn get_u64(buf: &mut Bytes) -> Result<u64> {
    Ok(take(buf, 8)?.get_u64())
}
