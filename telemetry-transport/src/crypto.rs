//! RSA-OAEP payload encryption.
//!
//! Payloads are encrypted with RSA-OAEP using SHA-256. A single OAEP block can only carry
//! `k - 2 * 32 - 2` bytes of plaintext, where `k` is the modulus size in bytes, so larger
//! payloads are split into chunks of that size, each chunk is encrypted on its own, and the
//! resulting `k`-byte blocks are concatenated. An empty payload is encrypted as a single block.
//!
//! Keys are read from PEM files. Public keys may be PKIX (`PUBLIC KEY`) or PKCS#1
//! (`RSA PUBLIC KEY`), and private keys may be PKCS#8 (`PRIVATE KEY`) or PKCS#1
//! (`RSA PRIVATE KEY`).
use std::{fs, path::Path};

use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    rand_core::OsRng,
    traits::PublicKeyParts,
    Oaep, RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;

use crate::KeyError;

const SHA256_LEN: usize = 32;

fn pem_label(pem: &str) -> Option<&str> {
    let start = pem.find("-----BEGIN ")? + "-----BEGIN ".len();
    let len = pem[start..].find("-----")?;
    Some(&pem[start..start + len])
}

fn parse_error<E: std::fmt::Display>(e: E) -> KeyError {
    KeyError::Parse { reason: e.to_string() }
}

fn max_chunk_len(size: usize) -> Result<usize, KeyError> {
    match size.checked_sub(2 * SHA256_LEN + 2) {
        Some(len) if len > 0 => Ok(len),
        _ => Err(KeyError::TooSmall { size }),
    }
}

/// Encrypts payloads with an RSA public key.
#[derive(Clone, Debug)]
pub struct Encrypter {
    key: RsaPublicKey,
    chunk_len: usize,
}

impl Encrypter {
    /// Creates an encrypter from a public key.
    ///
    /// # Errors
    ///
    /// Fails if the key is too small to hold any plaintext with OAEP and SHA-256.
    pub fn new(key: RsaPublicKey) -> Result<Self, KeyError> {
        let chunk_len = max_chunk_len(key.size())?;
        Ok(Encrypter { key, chunk_len })
    }

    /// Parses a PEM-encoded public key.
    ///
    /// # Errors
    ///
    /// Fails if no PEM block is found, the block is not a public key, or the key is invalid.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let key = match pem_label(pem).ok_or(KeyError::MissingPem)? {
            "PUBLIC KEY" => RsaPublicKey::from_public_key_pem(pem).map_err(parse_error)?,
            "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_pem(pem).map_err(parse_error)?,
            other => return Err(KeyError::UnsupportedType(other.to_owned())),
        };
        Self::new(key)
    }

    /// Reads a PEM-encoded public key from a file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not hold a valid public key.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, KeyError> {
        Self::from_pem(&fs::read_to_string(path)?)
    }

    /// Encrypts `plaintext`.
    ///
    /// # Errors
    ///
    /// Fails if the random number generator fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        let mut rng = OsRng;
        let blocks = plaintext.len().div_ceil(self.chunk_len).max(1);
        let mut ciphertext = Vec::with_capacity(blocks * self.key.size());

        if plaintext.is_empty() {
            ciphertext.extend(self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)?);
        }
        for chunk in plaintext.chunks(self.chunk_len) {
            ciphertext.extend(self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)?);
        }
        Ok(ciphertext)
    }
}

/// Decrypts payloads with an RSA private key.
#[derive(Clone)]
pub struct Decrypter {
    key: RsaPrivateKey,
}

impl Decrypter {
    /// Creates a decrypter from a private key.
    pub fn new(key: RsaPrivateKey) -> Self {
        Decrypter { key }
    }

    /// Parses a PEM-encoded private key.
    ///
    /// # Errors
    ///
    /// Fails if no PEM block is found, the block is not a private key, or the key is invalid.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let key = match pem_label(pem).ok_or(KeyError::MissingPem)? {
            "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_pem(pem).map_err(parse_error)?,
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_pem(pem).map_err(parse_error)?,
            other => return Err(KeyError::UnsupportedType(other.to_owned())),
        };
        max_chunk_len(key.size())?;
        Ok(Self::new(key))
    }

    /// Reads a PEM-encoded private key from a file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not hold a valid private key.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, KeyError> {
        Self::from_pem(&fs::read_to_string(path)?)
    }

    /// Decrypts `ciphertext`.
    ///
    /// # Errors
    ///
    /// Fails if the ciphertext is not a whole number of blocks or any block fails to decrypt.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, rsa::Error> {
        let block_len = self.key.size();
        if ciphertext.is_empty() || ciphertext.len() % block_len != 0 {
            return Err(rsa::Error::Decryption);
        }

        let mut plaintext = Vec::with_capacity(ciphertext.len());
        for block in ciphertext.chunks(block_len) {
            plaintext.extend(self.key.decrypt(Oaep::new::<Sha256>(), block)?);
        }
        Ok(plaintext)
    }
}

impl std::fmt::Debug for Decrypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decrypter").field("size", &self.key.size()).finish_non_exhaustive()
    }
}
