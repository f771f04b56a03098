//! Field-level encryption for PII stored at rest
//! Author: kartik4091
//! Created: 2025-06-03 09:10:14 UTC
//!
//! Tokens are base64 of `IV || ciphertext` (CBC suites) or
//! `nonce || ciphertext || tag` (GCM), so a stored field is a single
//! opaque string with no separate IV column.

use std::fmt;
use std::sync::Arc;

use aes::{Aes128, Aes256};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::EncryptedField;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const AES_BLOCK_SIZE: usize = 16;
const IV_SIZE: usize = 16;

/// Block cipher and mode used for field tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherSuite {
    /// Compatible with tokens written by the legacy backend
    #[serde(rename = "aes-128-cbc")]
    Aes128Cbc,
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
    /// Authenticated; rejects tampered tokens
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl CipherSuite {
    pub fn key_len(&self) -> usize {
        match self {
            CipherSuite::Aes128Cbc => 16,
            CipherSuite::Aes256Cbc | CipherSuite::Aes256Gcm => 32,
        }
    }
}

impl Default for CipherSuite {
    fn default() -> Self {
        CipherSuite::Aes128Cbc
    }
}

/// Encrypts and decrypts opaque field tokens under one process-wide key
#[derive(Clone)]
pub struct FieldCodec {
    suite: CipherSuite,
    key: Arc<Vec<u8>>,
}

impl fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCodec")
            .field("suite", &self.suite)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl FieldCodec {
    pub fn new(suite: CipherSuite, key: &[u8]) -> Result<Self> {
        if key.len() != suite.key_len() {
            return Err(Error::InvalidConfiguration(format!(
                "{:?} needs a {}-byte key, got {} bytes",
                suite,
                suite.key_len(),
                key.len()
            )));
        }
        Ok(Self {
            suite,
            key: Arc::new(key.to_vec()),
        })
    }

    /// Builds a codec from a base64-encoded key as found in configuration
    pub fn from_base64_key(suite: CipherSuite, encoded: &str) -> Result<Self> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidConfiguration(format!("field key is not base64: {}", e)))?;
        Self::new(suite, &key)
    }

    /// Fresh random key for `suite`, base64-encoded
    pub fn generate_key(suite: CipherSuite) -> String {
        let mut key = vec![0u8; suite.key_len()];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedField> {
        let sealed = match self.suite {
            CipherSuite::Aes128Cbc => self.seal_cbc::<Aes128CbcEnc>(plaintext.as_bytes())?,
            CipherSuite::Aes256Cbc => self.seal_cbc::<Aes256CbcEnc>(plaintext.as_bytes())?,
            CipherSuite::Aes256Gcm => self.seal_gcm(plaintext.as_bytes())?,
        };
        Ok(EncryptedField::from_stored(BASE64.encode(sealed)))
    }

    pub fn decrypt(&self, token: &EncryptedField) -> Result<String> {
        self.decrypt_str(token.as_str())
    }

    pub fn decrypt_str(&self, token: &str) -> Result<String> {
        let bytes = BASE64
            .decode(token.trim())
            .map_err(|e| Error::DecryptError(format!("token is not base64: {}", e)))?;

        let plain = match self.suite {
            CipherSuite::Aes128Cbc => self.open_cbc::<Aes128CbcDec>(&bytes)?,
            CipherSuite::Aes256Cbc => self.open_cbc::<Aes256CbcDec>(&bytes)?,
            CipherSuite::Aes256Gcm => self.open_gcm(&bytes)?,
        };

        String::from_utf8(plain)
            .map_err(|_| Error::DecryptError("plaintext is not valid UTF-8".into()))
    }

    fn seal_cbc<E>(&self, data: &[u8]) -> Result<Vec<u8>>
    where
        E: KeyIvInit + BlockEncryptMut,
    {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let encryptor =
            E::new_from_slices(&self.key, &iv).map_err(|e| Error::CryptoError(e.to_string()))?;
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(data);

        let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open_cbc<D>(&self, bytes: &[u8]) -> Result<Vec<u8>>
    where
        D: KeyIvInit + BlockDecryptMut,
    {
        if bytes.len() < IV_SIZE + AES_BLOCK_SIZE || (bytes.len() - IV_SIZE) % AES_BLOCK_SIZE != 0 {
            return Err(Error::DecryptError(format!(
                "token length {} is not IV plus whole blocks",
                bytes.len()
            )));
        }
        let (iv, ciphertext) = bytes.split_at(IV_SIZE);

        let decryptor =
            D::new_from_slices(&self.key, iv).map_err(|e| Error::CryptoError(e.to_string()))?;
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::DecryptError("bad padding or foreign key".into()))
    }

    fn gcm_key(&self) -> Result<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| Error::CryptoError("invalid AES-256-GCM key".into()))?;
        Ok(LessSafeKey::new(unbound))
    }

    fn seal_gcm(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.gcm_key()?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut in_out = data.to_vec();
        key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| Error::CryptoError("AES-256-GCM seal failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    fn open_gcm(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(Error::DecryptError(format!("token length {} is truncated", bytes.len())));
        }
        let key = self.gcm_key()?;
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| Error::DecryptError("bad nonce".into()))?;

        let mut in_out = sealed.to_vec();
        let plain = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::DecryptError("authentication failed or foreign key".into()))?;
        Ok(plain.to_vec())
    }
}
