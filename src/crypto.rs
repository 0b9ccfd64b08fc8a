//! Authenticated encryption for at-rest state
//! Mission: Seal and open byte payloads under the process data key

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const ENVELOPE_VERSION: u32 = 1;

/// Crypto failure kinds. `Integrity` is the only kind a caller should ever
/// branch on: it means the ciphertext or tag was tampered with.
#[derive(Debug, PartialEq, Eq)]
pub enum CryptoError {
    Integrity,
    Malformed,
    Cipher,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::Integrity => write!(f, "authentication failed, payload rejected"),
            CryptoError::Malformed => write!(f, "sealed envelope is malformed"),
            CryptoError::Cipher => write!(f, "cipher operation failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Output of a single seal: fresh 96-bit nonce, ciphertext, 128-bit tag.
#[derive(Debug, Clone)]
pub struct SealedBox {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

/// Seal `plaintext` under `key` with a nonce drawn from the OS RNG.
///
/// The key length is fixed by the type, so a wrong-sized key is a compile
/// error rather than a runtime condition. RNG failure aborts the process
/// inside `OsRng`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<SealedBox, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Cipher)?;

    // aes-gcm appends the tag; split it off so the envelope stores it apart.
    let tag_start = sealed.len() - TAG_SIZE;
    let tag_vec = sealed.split_off(tag_start);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&tag_vec);

    Ok(SealedBox {
        nonce: nonce_bytes,
        ciphertext: sealed,
        tag,
    })
}

/// Open a sealed payload. Fails with `Integrity` on any authentication
/// mismatch and never returns partial plaintext.
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
        return Err(CryptoError::Malformed);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut buf = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    buf.extend_from_slice(ciphertext);
    buf.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::from_slice(nonce), buf.as_slice())
        .map_err(|_| CryptoError::Integrity)
}

/// On-disk envelope shared by the credential store and every tenant file.
/// `mode` records whether the body is sealed or stored plaintext (encryption
/// disabled by configuration).
#[derive(Debug, Serialize, Deserialize)]
pub struct SealedFile {
    pub version: u32,
    pub mode: String,
    pub nonce: String,
    pub tag: String,
    pub ciphertext: String,
}

const MODE_AES_GCM: &str = "aes-256-gcm";
const MODE_PLAINTEXT: &str = "plaintext";

/// Wrap a serialized body into the on-disk envelope, sealing it when a key
/// is configured.
pub fn seal_envelope(key: Option<&[u8; KEY_SIZE]>, body: &[u8]) -> Result<SealedFile, CryptoError> {
    match key {
        Some(key) => {
            let sealed = seal(key, body)?;
            Ok(SealedFile {
                version: ENVELOPE_VERSION,
                mode: MODE_AES_GCM.to_string(),
                nonce: BASE64.encode(sealed.nonce),
                tag: BASE64.encode(sealed.tag),
                ciphertext: BASE64.encode(&sealed.ciphertext),
            })
        }
        None => Ok(SealedFile {
            version: ENVELOPE_VERSION,
            mode: MODE_PLAINTEXT.to_string(),
            nonce: String::new(),
            tag: String::new(),
            ciphertext: BASE64.encode(body),
        }),
    }
}

/// Unwrap an envelope back into the serialized body. A sealed envelope
/// requires the key it was sealed under; mismatches surface as `Integrity`.
pub fn open_envelope(
    key: Option<&[u8; KEY_SIZE]>,
    envelope: &SealedFile,
) -> Result<Vec<u8>, CryptoError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::Malformed);
    }

    match envelope.mode.as_str() {
        MODE_PLAINTEXT => BASE64
            .decode(&envelope.ciphertext)
            .map_err(|_| CryptoError::Malformed),
        MODE_AES_GCM => {
            let key = key.ok_or(CryptoError::Malformed)?;
            let nonce = BASE64
                .decode(&envelope.nonce)
                .map_err(|_| CryptoError::Malformed)?;
            let tag = BASE64
                .decode(&envelope.tag)
                .map_err(|_| CryptoError::Malformed)?;
            let ciphertext = BASE64
                .decode(&envelope.ciphertext)
                .map_err(|_| CryptoError::Malformed)?;
            open(key, &nonce, &ciphertext, &tag)
        }
        _ => Err(CryptoError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_SIZE] {
        [7u8; KEY_SIZE]
    }

    #[test]
    fn test_seal_open_round_trip() {
        let key = test_key();
        let plaintext = b"the wheel remembers nothing";

        let sealed = seal(&key, plaintext).unwrap();
        let opened = open(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = test_key();
        let a = seal(&key, b"payload").unwrap();
        let b = seal(&key, b"payload").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_bit_flip_is_integrity_error() {
        let key = test_key();
        let sealed = seal(&key, b"sensitive state").unwrap();

        // Flip one bit in the ciphertext.
        let mut ct = sealed.ciphertext.clone();
        ct[0] ^= 0x01;
        assert_eq!(
            open(&key, &sealed.nonce, &ct, &sealed.tag).unwrap_err(),
            CryptoError::Integrity
        );

        // Flip one bit in the tag.
        let mut tag = sealed.tag;
        tag[0] ^= 0x01;
        assert_eq!(
            open(&key, &sealed.nonce, &sealed.ciphertext, &tag).unwrap_err(),
            CryptoError::Integrity
        );

        // Flip one bit in the nonce.
        let mut nonce = sealed.nonce;
        nonce[0] ^= 0x01;
        assert_eq!(
            open(&key, &nonce, &sealed.ciphertext, &sealed.tag).unwrap_err(),
            CryptoError::Integrity
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealed = seal(&test_key(), b"data").unwrap();
        let other = [9u8; KEY_SIZE];
        assert_eq!(
            open(&other, &sealed.nonce, &sealed.ciphertext, &sealed.tag).unwrap_err(),
            CryptoError::Integrity
        );
    }

    #[test]
    fn test_empty_plaintext_round_trip() {
        let key = test_key();
        let sealed = seal(&key, b"").unwrap();
        let opened = open(&key, &sealed.nonce, &sealed.ciphertext, &sealed.tag).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn test_envelope_round_trip_sealed() {
        let key = test_key();
        let body = br#"{"schema_version":1}"#;

        let envelope = seal_envelope(Some(&key), body).unwrap();
        assert_eq!(envelope.mode, MODE_AES_GCM);

        let opened = open_envelope(Some(&key), &envelope).unwrap();
        assert_eq!(opened, body);
    }

    #[test]
    fn test_envelope_round_trip_plaintext() {
        let body = br#"{"schema_version":1}"#;
        let envelope = seal_envelope(None, body).unwrap();
        assert_eq!(envelope.mode, MODE_PLAINTEXT);
        assert!(envelope.nonce.is_empty());

        let opened = open_envelope(None, &envelope).unwrap();
        assert_eq!(opened, body);
    }

    #[test]
    fn test_envelope_version_checked() {
        let key = test_key();
        let mut envelope = seal_envelope(Some(&key), b"body").unwrap();
        envelope.version = 99;
        assert_eq!(
            open_envelope(Some(&key), &envelope).unwrap_err(),
            CryptoError::Malformed
        );
    }

    #[test]
    fn test_envelope_tamper_is_integrity() {
        let key = test_key();
        let envelope = seal_envelope(Some(&key), b"important body").unwrap();

        let mut raw = BASE64.decode(&envelope.ciphertext).unwrap();
        raw[0] ^= 0xff;
        let tampered = SealedFile {
            ciphertext: BASE64.encode(&raw),
            ..envelope
        };
        assert_eq!(
            open_envelope(Some(&key), &tampered).unwrap_err(),
            CryptoError::Integrity
        );
    }
}
