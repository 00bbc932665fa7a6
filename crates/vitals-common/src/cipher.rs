//! Asymmetric payload encryption (RSA-OAEP with SHA-256).
//!
//! RSA can only seal a handful of bytes at a time, so payloads are split
//! into blocks of at most `key_size - 66` bytes and each block becomes one
//! key-sized ciphertext block. Decryption walks the ciphertext in key-sized
//! steps.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;

const SHA256_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("read key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid PEM: {0}")]
    Pem(String),
    #[error("unsupported key: {0}")]
    Key(String),
    #[error("ciphertext length {len} is not a multiple of block size {block}")]
    Length { len: usize, block: usize },
    #[error(transparent)]
    Rsa(#[from] rsa::Error),
}

/// Encrypts with a public key taken from a certificate or a bare public key.
#[derive(Debug, Clone)]
pub struct Encrypter {
    key: RsaPublicKey,
}

impl Encrypter {
    /// Accepts `CERTIFICATE`, `PUBLIC KEY` (SPKI) and `RSA PUBLIC KEY`
    /// (PKCS#1) PEM blocks.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| CryptoError::Pem(e.to_string()))?;
        let key = match pem.label.as_str() {
            "CERTIFICATE" => {
                let cert = pem
                    .parse_x509()
                    .map_err(|e| CryptoError::Pem(e.to_string()))?;
                RsaPublicKey::from_public_key_der(cert.public_key().raw)
                    .map_err(|e| CryptoError::Key(e.to_string()))?
            }
            "PUBLIC KEY" => RsaPublicKey::from_public_key_der(&pem.contents)
                .map_err(|e| CryptoError::Key(e.to_string()))?,
            "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_der(&pem.contents)
                .map_err(|e| CryptoError::Key(e.to_string()))?,
            other => return Err(CryptoError::Key(format!("unexpected PEM label {other:?}"))),
        };
        Ok(Self { key })
    }

    pub fn from_file(path: &Path) -> Result<Self, CryptoError> {
        Self::from_pem(&std::fs::read(path)?)
    }

    /// Largest plaintext block a single RSA operation can seal.
    pub fn block_size(&self) -> usize {
        self.key.size() - 2 * SHA256_LEN - 2
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(data.len().div_ceil(self.block_size()) * self.key.size());
        for block in data.chunks(self.block_size()) {
            let sealed = self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), block)?;
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }
}

/// Decrypts with an RSA private key.
pub struct Decrypter {
    key: RsaPrivateKey,
}

impl Decrypter {
    /// Accepts PKCS#1 (`RSA PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) PEM.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| CryptoError::Key(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn from_file(path: &Path) -> Result<Self, CryptoError> {
        Self::from_pem(&std::fs::read_to_string(path)?)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.key.size();
        if data.len() % block != 0 {
            return Err(CryptoError::Length {
                len: data.len(),
                block,
            });
        }
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(block) {
            out.extend(self.key.decrypt(Oaep::new::<Sha256>(), chunk)?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Decrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decrypter")
            .field("bits", &(self.key.size() * 8))
            .finish_non_exhaustive()
    }
}
