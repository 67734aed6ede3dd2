//! Block cipher primitives for the mesh protocol.
//!
//! The light firmware runs AES-128 on byte-reversed keys and blocks and
//! reverses the result again. Every derivation in the protocol (pairing proof,
//! session key, frame checks, payload keystream) is built from that primitive.
//!
//! Payload confidentiality uses a counter keystream whose block `i` is the
//! encryption of `i | nonce | 0..`; integrity uses a CBC-MAC seeded with the
//! encryption of `nonce | len | 0..`. Both take the 8-byte frame nonce.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Frame nonce length.
pub const NONCE_LEN: usize = 8;

fn cipher_for(key: &[u8; BLOCK_SIZE]) -> Aes128 {
    let mut reversed = *key;
    reversed.reverse();
    Aes128::new(GenericArray::from_slice(&reversed))
}

// ============================================================================
// Block Primitive
// ============================================================================

/// Encrypt one block the way the light firmware does.
pub fn telink_encrypt(key: &[u8; BLOCK_SIZE], block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = cipher_for(key);
    let mut data = *block;
    data.reverse();
    let mut ga = GenericArray::clone_from_slice(&data);
    cipher.encrypt_block(&mut ga);

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&ga);
    out.reverse();
    out
}

/// Inverse of [`telink_encrypt`].
pub fn telink_decrypt(key: &[u8; BLOCK_SIZE], block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = cipher_for(key);
    let mut data = *block;
    data.reverse();
    let mut ga = GenericArray::clone_from_slice(&data);
    cipher.decrypt_block(&mut ga);

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&ga);
    out.reverse();
    out
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

// ============================================================================
// Frame Check and Keystream
// ============================================================================

/// Compute the CBC-MAC over `payload` for the given nonce.
///
/// Frames carry only the first two bytes of the result.
pub fn frame_check(
    key: &[u8; BLOCK_SIZE],
    nonce: &[u8; NONCE_LEN],
    payload: &[u8],
) -> [u8; BLOCK_SIZE] {
    let mut base = [0u8; BLOCK_SIZE];
    base[..NONCE_LEN].copy_from_slice(nonce);
    base[NONCE_LEN] = payload.len() as u8;

    let mut check = telink_encrypt(key, &base);
    for chunk in payload.chunks(BLOCK_SIZE) {
        xor_into(&mut check, chunk);
        check = telink_encrypt(key, &check);
    }
    check
}

/// XOR `data` in place with the counter keystream for the given nonce.
///
/// Applying it twice restores the input.
pub fn apply_keystream(key: &[u8; BLOCK_SIZE], nonce: &[u8; NONCE_LEN], data: &mut [u8]) {
    let mut counter = [0u8; BLOCK_SIZE];
    counter[1..1 + NONCE_LEN].copy_from_slice(nonce);

    for chunk in data.chunks_mut(BLOCK_SIZE) {
        let keystream = telink_encrypt(key, &counter);
        xor_into(chunk, &keystream);
        counter[0] = counter[0].wrapping_add(1);
    }
}
