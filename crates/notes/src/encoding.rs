//! 32-byte big-endian word helpers shared by note hashing and proof layouts

pub const WORD_SIZE: usize = 32;

pub type Word = [u8; WORD_SIZE];

pub fn u128_word(v: u128) -> Word {
    let mut out = [0u8; WORD_SIZE];
    out[16..].copy_from_slice(&v.to_be_bytes());
    out
}

pub fn u64_word(v: u64) -> Word {
    let mut out = [0u8; WORD_SIZE];
    out[24..].copy_from_slice(&v.to_be_bytes());
    out
}

pub fn u32_word(v: u32) -> Word {
    let mut out = [0u8; WORD_SIZE];
    out[28..].copy_from_slice(&v.to_be_bytes());
    out
}

/// `None` when the word does not fit in 128 bits.
pub fn word_u128(w: &[u8]) -> Option<u128> {
    if w.len() != WORD_SIZE || w[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&w[16..]);
    Some(u128::from_be_bytes(buf))
}

pub fn word_u64(w: &[u8]) -> Option<u64> {
    if w.len() != WORD_SIZE || w[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[24..]);
    Some(u64::from_be_bytes(buf))
}

pub fn word_u32(w: &[u8]) -> Option<u32> {
    if w.len() != WORD_SIZE || w[..28].iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&w[28..]);
    Some(u32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_reject_overflow() {
        assert_eq!(word_u128(&u128_word(u128::MAX)), Some(u128::MAX));
        assert_eq!(word_u32(&u64_word(1 << 40)), None);
        assert_eq!(word_u64(&[0u8; 31]), None);
    }
}
