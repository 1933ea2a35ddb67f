//! Password-keyed AES-128 block stream.
//!
//! The key is the first 16 bytes of SHA-256(password). Data is processed in
//! ECB mode with PKCS#7 padding and no IV, so files stay readable by earlier
//! releases. There is no authentication tag: a failed padding check on
//! finalize is the only signal of a wrong password or corrupted ciphertext.

use aes::Aes128;
use ecb::cipher::block_padding::{Padding, Pkcs7};
use ecb::cipher::consts::U16;
use ecb::cipher::generic_array::GenericArray;
use ecb::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 16;
pub const BLOCK_SIZE: usize = 16;

type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;
type Block = GenericArray<u8, U16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    /// Past participle used in result messages.
    pub fn done(self) -> &'static str {
        match self {
            Direction::Encrypt => "encrypted",
            Direction::Decrypt => "decrypted",
        }
    }
}

/// Symmetric key derived from a password. Lives for one operation only.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_password(password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&digest[..KEY_LEN]);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Raised by [`BlockStream::finalize`] when padding cannot be applied or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingError;

enum Mode {
    Encrypt(Aes128EcbEnc),
    Decrypt(Aes128EcbDec),
}

/// Incremental cipher: feed chunks with `update`, then call `finalize` once.
pub struct BlockStream {
    mode: Mode,
    pending: Vec<u8>,
}

impl BlockStream {
    pub fn new(direction: Direction, key: &DerivedKey) -> Self {
        let key = GenericArray::from_slice(key.as_bytes());
        let mode = match direction {
            Direction::Encrypt => Mode::Encrypt(Aes128EcbEnc::new(key)),
            Direction::Decrypt => Mode::Decrypt(Aes128EcbDec::new(key)),
        };
        Self {
            mode,
            pending: Vec::with_capacity(BLOCK_SIZE * 2),
        }
    }

    /// Processes every complete block available so far. When decrypting, the
    /// last full block is held back because it carries the padding.
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let remainder = self.pending.len() % BLOCK_SIZE;
        let keep = match self.mode {
            Mode::Encrypt(_) => remainder,
            Mode::Decrypt(_) if remainder == 0 && !self.pending.is_empty() => BLOCK_SIZE,
            Mode::Decrypt(_) => remainder,
        };
        let ready = self.pending.len() - keep;
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        for chunk in out.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match &mut self.mode {
                Mode::Encrypt(enc) => enc.encrypt_block_mut(block),
                Mode::Decrypt(dec) => dec.decrypt_block_mut(block),
            }
        }
        out
    }

    /// Applies (encrypt) or strips and checks (decrypt) the PKCS#7 padding.
    pub fn finalize(self) -> Result<Vec<u8>, PaddingError> {
        let BlockStream { mode, pending } = self;
        match mode {
            Mode::Encrypt(mut enc) => {
                let mut block = Block::default();
                block[..pending.len()].copy_from_slice(&pending);
                <Pkcs7 as Padding<U16>>::pad(&mut block, pending.len());
                enc.encrypt_block_mut(&mut block);
                Ok(block.to_vec())
            }
            Mode::Decrypt(_) if pending.is_empty() => Ok(Vec::new()),
            Mode::Decrypt(mut dec) => {
                if pending.len() != BLOCK_SIZE {
                    return Err(PaddingError);
                }
                let mut block = Block::clone_from_slice(&pending);
                dec.decrypt_block_mut(&mut block);
                <Pkcs7 as Padding<U16>>::unpad(&block)
                    .map(|plain| plain.to_vec())
                    .map_err(|_| PaddingError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(direction: Direction, key: &DerivedKey, data: &[u8], step: usize) -> Result<Vec<u8>, PaddingError> {
        let mut stream = BlockStream::new(direction, key);
        let mut out = Vec::new();
        for chunk in data.chunks(step.max(1)) {
            out.extend(stream.update(chunk));
        }
        out.extend(stream.finalize()?);
        Ok(out)
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let a = DerivedKey::from_password("hunter2");
        let b = DerivedKey::from_password("hunter2");
        let c = DerivedKey::from_password("hunter3");
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert_eq!(format!("{a:?}"), "DerivedKey(..)");
    }

    #[test]
    fn matches_reference_vector() {
        // AES-128-ECB/PKCS7 of "hello" under SHA-256("password")[..16].
        let key = DerivedKey::from_password("password");
        let out = run(Direction::Encrypt, &key, b"hello", 4).unwrap();
        assert_eq!(out.len(), BLOCK_SIZE);
        assert_eq!(
            out,
            [
                0xa1, 0x67, 0x8d, 0x6e, 0x9c, 0xf3, 0x5b, 0x99, 0x57, 0x62, 0x69, 0x13, 0x67, 0x77, 0x57,
                0x71
            ]
        );
    }

    #[test]
    fn chunking_does_not_change_output() {
        let key = DerivedKey::from_password("pw");
        let data: Vec<u8> = (0..100u8).collect();
        let whole = run(Direction::Encrypt, &key, &data, data.len()).unwrap();
        for step in [1, 7, 16, 33] {
            assert_eq!(run(Direction::Encrypt, &key, &data, step).unwrap(), whole);
            assert_eq!(run(Direction::Decrypt, &key, &whole, step).unwrap(), data);
        }
    }

    #[test]
    fn block_aligned_input_gains_a_full_padding_block() {
        let key = DerivedKey::from_password("pw");
        let out = run(Direction::Encrypt, &key, &[7u8; 32], 32).unwrap();
        assert_eq!(out.len(), 48);
    }

    #[test]
    fn truncated_ciphertext_fails_finalize() {
        let key = DerivedKey::from_password("pw");
        let mut out = run(Direction::Encrypt, &key, b"some plaintext", 8).unwrap();
        out.truncate(10);
        assert_eq!(run(Direction::Decrypt, &key, &out, 8), Err(PaddingError));
    }

    #[test]
    fn empty_ciphertext_decrypts_to_nothing() {
        let key = DerivedKey::from_password("pw");
        assert_eq!(run(Direction::Decrypt, &key, &[], 1).unwrap(), Vec::<u8>::new());
    }
}
