//! Binary layout of the vault blob and the AES-256-GCM seal/open steps.
//!
//! ```text
//! "BDV" 0x01 | kind (1) | [m_cost u32le | t_cost u32le | p_cost u32le | salt (16)] | nonce (12) | ciphertext+tag
//! ```
//!
//! The bracketed KDF block is only present for passphrase keys. Everything
//! before the ciphertext is authenticated as associated data, so a change to
//! any byte of the blob is detected on open.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use bookdrop_core::credentials::VaultError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::key_provider::{KeyMaterial, KEY_LEN};

const MAGIC: &[u8; 4] = b"BDV\x01";
const KIND_RAW: u8 = 0x00;
const KIND_ARGON2ID: u8 = 0x01;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const MAX_MEMORY_KIB: u32 = 256 * 1024;
const MAX_ITERATIONS: u32 = 16;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id cost parameters used when sealing with a passphrase.
/// Stored in the blob, so changing them never breaks existing vaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    /// Reject parameters Argon2 cannot use or that exceed the vault's bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_kib > MAX_MEMORY_KIB
            || self.iterations > MAX_ITERATIONS
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(format!(
                "argon2 parameters out of range (memory <= {MAX_MEMORY_KIB} KiB, \
                 iterations <= {MAX_ITERATIONS}, parallelism <= {MAX_PARALLELISM})"
            ));
        }
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> Result<argon2::Argon2<'static>, String> {
        let params = argon2::Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| format!("invalid argon2 parameters: {e}"))?;
        Ok(argon2::Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }

    fn derive(&self, passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, String> {
        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        self.argon2()?
            .hash_password_into(passphrase, salt, out.as_mut())
            .map_err(|e| format!("argon2 key derivation failed: {e}"))?;
        Ok(out)
    }
}

/// Encrypt `plaintext` under `key`, producing a self-describing blob.
pub fn seal(key: &KeyMaterial, kdf: &KdfParams, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let mut blob = Vec::with_capacity(MAGIC.len() + 29 + NONCE_LEN + plaintext.len() + TAG_LEN);
    blob.extend_from_slice(MAGIC);

    let cipher_key = match key {
        KeyMaterial::Raw(bytes) => {
            blob.push(KIND_RAW);
            bytes.clone()
        }
        KeyMaterial::Passphrase(passphrase) => {
            kdf.validate()
                .map_err(|reason| VaultError::Configuration { reason })?;
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);

            blob.push(KIND_ARGON2ID);
            blob.extend_from_slice(&kdf.memory_kib.to_le_bytes());
            blob.extend_from_slice(&kdf.iterations.to_le_bytes());
            blob.extend_from_slice(&kdf.parallelism.to_le_bytes());
            blob.extend_from_slice(&salt);
            kdf.derive(passphrase.as_bytes(), &salt)
                .map_err(|reason| VaultError::Configuration { reason })?
        }
    };

    let cipher = build_cipher(&cipher_key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    blob.extend_from_slice(nonce.as_slice());

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: &blob,
            },
        )
        .map_err(|e| VaultError::Encryption {
            reason: format!("encrypt failed: {e}"),
        })?;
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Verify and decrypt a blob produced by [`seal`].
pub fn open(key: &KeyMaterial, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let mut reader = Reader::new(blob);

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(corrupt("not a vault blob or unsupported version"));
    }

    let kind = reader.take(1)?[0];
    let cipher_key = match (kind, key) {
        (KIND_RAW, KeyMaterial::Raw(bytes)) => bytes.clone(),
        (KIND_ARGON2ID, KeyMaterial::Passphrase(passphrase)) => {
            let kdf = KdfParams {
                memory_kib: reader.u32_le()?,
                iterations: reader.u32_le()?,
                parallelism: reader.u32_le()?,
            };
            kdf.validate().map_err(|reason| VaultError::Decryption { reason })?;
            let salt = reader.take(SALT_LEN)?;
            kdf.derive(passphrase.as_bytes(), salt)
                .map_err(|reason| VaultError::Decryption { reason })?
        }
        (KIND_RAW | KIND_ARGON2ID, _) => {
            return Err(corrupt("blob was sealed with a different kind of key"));
        }
        _ => return Err(corrupt("unknown key kind")),
    };

    let nonce = Nonce::from_slice(reader.take(NONCE_LEN)?);
    let (aad, ciphertext) = blob.split_at(reader.pos);
    if ciphertext.len() < TAG_LEN {
        return Err(corrupt("blob is truncated"));
    }

    let cipher = build_cipher(&cipher_key)?;
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| VaultError::Decryption {
            reason: "authentication failed (wrong key or corrupted file)".to_string(),
        })
}

fn build_cipher(key: &[u8; KEY_LEN]) -> Result<Aes256Gcm, VaultError> {
    Aes256Gcm::new_from_slice(key).map_err(|e| VaultError::Configuration {
        reason: format!("cipher init failed: {e}"),
    })
}

fn corrupt(reason: &str) -> VaultError {
    VaultError::Decryption {
        reason: reason.to_string(),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], VaultError> {
        let end = self.pos + len;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| corrupt("blob is truncated"))?;
        self.pos = end;
        Ok(slice)
    }

    fn u32_le(&mut self) -> Result<u32, VaultError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Cheap Argon2 cost for tests.
    pub(crate) const TEST_KDF: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };

    fn passphrase(p: &str) -> KeyMaterial {
        KeyMaterial::Passphrase(Zeroizing::new(p.to_string()))
    }

    #[test]
    fn raw_key_round_trip() {
        let key = KeyMaterial::generate();
        let blob = seal(&key, &TEST_KDF, b"payload").expect("seal");
        assert_eq!(blob[4], KIND_RAW);
        assert_eq!(open(&key, &blob).expect("open").as_slice(), b"payload");
    }

    #[test]
    fn passphrase_round_trip_uses_stored_parameters() {
        let key = passphrase("k1");
        let blob = seal(&key, &TEST_KDF, b"payload").expect("seal");
        assert_eq!(blob[4], KIND_ARGON2ID);
        assert_eq!(&blob[5..9], &TEST_KDF.memory_kib.to_le_bytes());
        assert_eq!(open(&key, &blob).expect("open").as_slice(), b"payload");
    }

    #[test]
    fn sealing_twice_differs() {
        let key = passphrase("k1");
        let a = seal(&key, &TEST_KDF, b"same").expect("seal");
        let b = seal(&key, &TEST_KDF, b"same").expect("seal");
        assert_ne!(a, b);
    }

    #[test]
    fn every_flipped_byte_is_detected() {
        for key in [KeyMaterial::generate(), passphrase("k1")] {
            let blob = seal(&key, &TEST_KDF, br#"{"username":"u","password":"p"}"#).expect("seal");
            for idx in 0..blob.len() {
                let mut tampered = blob.clone();
                tampered[idx] ^= 0x01;
                let err = open(&key, &tampered).expect_err("tampering must be detected");
                assert!(
                    matches!(err, VaultError::Decryption { .. }),
                    "byte {idx} of {} key blob gave {err:?}",
                    key.kind()
                );
            }
        }
    }

    #[test]
    fn wrong_key_and_mismatched_kind_fail() {
        let blob = seal(&passphrase("k1"), &TEST_KDF, b"payload").expect("seal");
        assert!(matches!(
            open(&passphrase("k2"), &blob),
            Err(VaultError::Decryption { .. })
        ));
        assert!(matches!(
            open(&KeyMaterial::generate(), &blob),
            Err(VaultError::Decryption { .. })
        ));
    }

    #[test]
    fn truncated_and_empty_blobs_fail() {
        let key = KeyMaterial::generate();
        let blob = seal(&key, &TEST_KDF, b"payload").expect("seal");
        for len in [0, 3, 5, 17, blob.len() - 1] {
            assert!(
                matches!(open(&key, &blob[..len]), Err(VaultError::Decryption { .. })),
                "length {len}"
            );
        }
    }

    #[test]
    fn oversized_parameters_are_refused_without_deriving() {
        let key = passphrase("k1");
        let mut blob = seal(&key, &TEST_KDF, b"payload").expect("seal");
        blob[5..9].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = open(&key, &blob).expect_err("huge memory cost");
        assert!(matches!(err, VaultError::Decryption { .. }));
    }

    #[test]
    fn invalid_parameters_are_configuration_errors_on_seal() {
        let kdf = KdfParams {
            memory_kib: 64,
            iterations: 0,
            parallelism: 1,
        };
        let err = seal(&passphrase("k1"), &kdf, b"payload").expect_err("zero iterations");
        assert!(matches!(err, VaultError::Configuration { .. }));
    }
}
