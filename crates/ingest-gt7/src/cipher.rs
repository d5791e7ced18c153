//! Salsa20 framing used by the console for every telemetry datagram.

use byteorder::{ByteOrder, LittleEndian};
use cipher::{KeyIvInit, StreamCipher};
use gt7_model::Variant;
use salsa20::Salsa20;

use crate::error::DecryptError;

const KEY_SOURCE: &[u8] = b"Simulator Interface Packet GT7 ver 0.0";

/// `"0S7G"` read as a little-endian u32.
pub const MAGIC: u32 = 0x4737_5330;

/// The IV seed travels in clear at this offset of the ciphertext.
pub const IV_OFFSET: usize = 0x40;

fn key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key.copy_from_slice(&KEY_SOURCE[..32]);
    key
}

fn cipher_for(seed: u32, variant: Variant) -> Salsa20 {
    let mut nonce = [0u8; 8];
    LittleEndian::write_u32(&mut nonce[..4], seed ^ variant.xor_key());
    LittleEndian::write_u32(&mut nonce[4..], seed);
    Salsa20::new((&key()).into(), (&nonce).into())
}

/// Decrypts one datagram and checks the magic.
///
/// The length is not checked against the variant here; short or long
/// plaintexts are the decoder's business. Bytes 0x40..0x44 of the result
/// are meaningless.
pub fn decrypt(blob: &[u8], variant: Variant) -> Result<Vec<u8>, DecryptError> {
    if blob.len() < IV_OFFSET + 4 {
        return Err(DecryptError::TooShort { len: blob.len() });
    }
    let seed = LittleEndian::read_u32(&blob[IV_OFFSET..IV_OFFSET + 4]);
    let mut plain = blob.to_vec();
    cipher_for(seed, variant).apply_keystream(&mut plain);

    let magic = LittleEndian::read_u32(&plain[..4]);
    if magic != MAGIC {
        return Err(DecryptError::BadMagic { found: magic });
    }
    Ok(plain)
}

/// What the console does: encrypt `plaintext` under `seed` and store the
/// seed in clear. Plaintexts shorter than the seed slot are zero-padded.
pub fn encrypt(plaintext: &[u8], variant: Variant, seed: u32) -> Vec<u8> {
    let mut blob = plaintext.to_vec();
    if blob.len() < IV_OFFSET + 4 {
        blob.resize(IV_OFFSET + 4, 0);
    }
    cipher_for(seed, variant).apply_keystream(&mut blob);
    LittleEndian::write_u32(&mut blob[IV_OFFSET..IV_OFFSET + 4], seed);
    blob
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plaintext(len: usize) -> Vec<u8> {
        let mut p: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
        LittleEndian::write_u32(&mut p[..4], MAGIC);
        p
    }

    #[test]
    fn key_is_truncated_source() {
        assert_eq!(&key(), b"Simulator Interface Packet GT7 v");
    }

    #[test]
    fn decrypt_inverts_encrypt_outside_seed_slot() {
        for variant in Variant::ALL {
            let plain = plaintext(variant.packet_len());
            let blob = encrypt(&plain, variant, 0x1234_5678);
            assert_ne!(blob[..4], plain[..4]);
            assert_eq!(LittleEndian::read_u32(&blob[IV_OFFSET..]), 0x1234_5678);

            let back = decrypt(&blob, variant).unwrap();
            assert_eq!(back.len(), plain.len());
            assert_eq!(back[..IV_OFFSET], plain[..IV_OFFSET]);
            assert_eq!(back[IV_OFFSET + 4..], plain[IV_OFFSET + 4..]);
        }
    }

    #[test]
    fn wrong_variant_key_fails_magic() {
        let blob = encrypt(&plaintext(0x128), Variant::A, 42);
        assert!(matches!(
            decrypt(&blob, Variant::B),
            Err(DecryptError::BadMagic { .. })
        ));
    }

    #[test]
    fn corrupted_magic_is_rejected() {
        let mut blob = encrypt(&plaintext(0x128), Variant::A, 7);
        blob[0] ^= 0xFF;
        assert!(matches!(
            decrypt(&blob, Variant::A),
            Err(DecryptError::BadMagic { .. })
        ));
    }

    #[test]
    fn short_blob_is_rejected() {
        assert!(matches!(
            decrypt(&[0u8; 0x43], Variant::A),
            Err(DecryptError::TooShort { len: 0x43 })
        ));
        assert!(decrypt(&[], Variant::Tilde).is_err());
    }
}
