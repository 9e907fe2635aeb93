//! Symmetric sealing layer
//!
//! HKDF-SHA256 key derivation, a ChaCha20 keystream and an HMAC-SHA256 tag.
//! [`stream_enc`] and [`mac`] are independent primitives; [`seal`] and
//! [`open`] compose them in encrypt-then-MAC order and are what the ECIES
//! layers use.

use crate::{Error, Result};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Cipher and MAC key length
pub const KEY_LEN: usize = 32;

/// Stream cipher nonce length
pub const NONCE_LEN: usize = 12;

/// Authentication tag length
pub const TAG_LEN: usize = 32;

/// Keys derived for one sealed message
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealKeys {
    pub cipher_key: [u8; KEY_LEN],
    pub mac_key: [u8; KEY_LEN],
    pub nonce: [u8; NONCE_LEN],
}

/// Expand `ikm` into a cipher key, a MAC key and a nonce, bound to `info`
pub fn derive_keys(ikm: &[u8], info: &[u8]) -> Result<SealKeys> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; 2 * KEY_LEN + NONCE_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| Error::Internal(format!("HKDF expand: {e}")))?;

    let mut keys = SealKeys {
        cipher_key: [0u8; KEY_LEN],
        mac_key: [0u8; KEY_LEN],
        nonce: [0u8; NONCE_LEN],
    };
    keys.cipher_key.copy_from_slice(&okm[..KEY_LEN]);
    keys.mac_key.copy_from_slice(&okm[KEY_LEN..2 * KEY_LEN]);
    keys.nonce.copy_from_slice(&okm[2 * KEY_LEN..]);
    okm.zeroize();

    Ok(keys)
}

/// XOR `data` with the ChaCha20 keystream. Applying it twice is the identity.
pub fn stream_enc(key: &[u8; KEY_LEN], iv: &[u8; NONCE_LEN], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let mut cipher = ChaCha20::new(key.into(), iv.into());
    cipher.apply_keystream(&mut out);
    out
}

/// HMAC-SHA256 over `len(aad) || aad || ciphertext`
pub fn mac(key: &[u8; KEY_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<[u8; TAG_LEN]> {
    let mut hmac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("HMAC key: {e}")))?;
    hmac.update(&(aad.len() as u64).to_be_bytes());
    hmac.update(aad);
    hmac.update(ciphertext);
    Ok(hmac.finalize().into_bytes().into())
}

/// Constant-time tag check
pub fn verify_mac(key: &[u8; KEY_LEN], aad: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<bool> {
    let expected = mac(key, aad, ciphertext)?;
    Ok(expected.as_slice().ct_eq(tag).into())
}

/// Encrypt then MAC
pub fn seal(keys: &SealKeys, aad: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let ciphertext = stream_enc(&keys.cipher_key, &keys.nonce, plaintext);
    let tag = mac(&keys.mac_key, aad, &ciphertext)?;
    Ok((ciphertext, tag))
}

/// Verify the MAC, then decrypt. Nothing is decrypted on a mismatch.
pub fn open(keys: &SealKeys, aad: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
    if !verify_mac(&keys.mac_key, aad, ciphertext, tag)? {
        return Err(Error::MacMismatch);
    }
    Ok(stream_enc(&keys.cipher_key, &keys.nonce, ciphertext))
}
