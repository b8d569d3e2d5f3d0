//! XOR masking primitive (RFC 6455 §5.3). Client-to-server obfuscation to
//! defeat proxy cache poisoning; servers never mask outbound frames.

use rand::RngCore;

/// `out[i] = in[i] XOR key[i % 4]`, applied in place. Tolerates a
/// zero-length payload (a no-op, not an error).
pub fn mask_bytes(data: &mut [u8], key: [u8; 4]) {
    let (prefix, words, suffix) = unsafe { data.align_to_mut::<u64>() };

    mask_naive(prefix, key, 0);

    if !words.is_empty() {
        let offset = prefix.len() % 4;
        let mut key_bytes = [0u8; 8];
        for (i, b) in key_bytes.iter_mut().enumerate() {
            *b = key[(offset + i) % 4];
        }
        let key_word = u64::from_ne_bytes(key_bytes);
        for word in words.iter_mut() {
            *word ^= key_word;
        }
    }

    let consumed = prefix.len() + words.len() * 8;
    mask_naive(suffix, key, consumed % 4);
}

/// Byte-wise reference implementation; the word-optimized variant above is
/// tested against this for correctness.
fn mask_naive(data: &mut [u8], key: [u8; 4], start_offset: usize) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[(start_offset + i) % 4];
    }
}

/// A fresh, uniformly random 4-byte masking key, as required for every
/// client-to-server frame.
pub fn random_mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    key
}
