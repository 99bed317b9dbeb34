//! Authenticated encryption of upstream credential material.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chacha20poly1305::{
    aead::{Aead as _, KeyInit as _},
    ChaCha20Poly1305, Key, Nonce,
};
use derive_more::{Debug, Display, Error as StdError};
use rand::RngCore as _;
use secrecy::{ExposeSecret as _, SecretString};

use crate::domain::session::CipherText;

/// Authenticated cipher protecting upstream tokens at rest.
///
/// Constructed once from configuration at process start and immutable
/// afterwards. An empty string passes through both directions unchanged, so
/// an absent upstream token stays distinguishable from an encrypted empty
/// one.
#[derive(Clone, Debug)]
pub struct Vault {
    /// Cipher instance derived from the configured key.
    #[debug(skip)]
    cipher: ChaCha20Poly1305,
}

impl Vault {
    /// Number of bytes in a [`Vault`] encryption key.
    const KEY_LENGTH: usize = 32;

    /// Number of bytes in an encryption nonce.
    const NONCE_LENGTH: usize = 12;

    /// Creates a new [`Vault`] from the configured key material.
    ///
    /// Accepts a 64-character hex string, a base64/base64url encoding of
    /// exactly 32 bytes, or 32 raw bytes.
    ///
    /// # Errors
    ///
    /// Errors if the key is missing or doesn't decode to exactly 32 bytes.
    /// This is a fatal configuration error and must abort startup.
    pub fn new(key: &SecretString) -> Result<Self, Error> {
        let raw = key.expose_secret().trim();
        if raw.is_empty() {
            return Err(Error::MissingKey);
        }
        let material = parse_key_material(raw).ok_or(Error::MalformedKey)?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&material)),
        })
    }

    /// Encrypts the provided plain upstream token for storage.
    ///
    /// Produces a base64url blob of `nonce || ciphertext`, freshly randomized
    /// per call.
    ///
    /// # Errors
    ///
    /// Errors if encryption fails. The plaintext is never partially exposed.
    pub fn encrypt(&self, plain: &str) -> Result<CipherText, Error> {
        if plain.is_empty() {
            return Ok(CipherText::from(String::new()));
        }

        let mut nonce = [0u8; Self::NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|_| Error::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(Self::NONCE_LENGTH + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(CipherText::from(URL_SAFE_NO_PAD.encode(blob)))
    }

    /// Decrypts the provided stored [`CipherText`] back into the plain
    /// upstream token.
    ///
    /// # Errors
    ///
    /// Errors if the blob is malformed or fails authentication. Partially
    /// decrypted data is never returned.
    pub fn decrypt(&self, encrypted: &CipherText) -> Result<String, Error> {
        let encoded: &str = encrypted.as_ref();
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let blob = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| Error::MalformedCipherText)?;
        if blob.len() <= Self::NONCE_LENGTH {
            return Err(Error::MalformedCipherText);
        }

        let (nonce, ciphertext) = blob.split_at(Self::NONCE_LENGTH);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::DecryptionFailed)?;

        String::from_utf8(plain).map_err(|_| Error::MalformedCipherText)
    }
}

/// Parses the configured key material into exactly
/// [`Vault::KEY_LENGTH`] bytes.
fn parse_key_material(raw: &str) -> Option<[u8; Vault::KEY_LENGTH]> {
    if raw.len() == Vault::KEY_LENGTH * 2
        && raw.chars().all(|c| c.is_ascii_hexdigit())
    {
        let mut bytes = [0u8; Vault::KEY_LENGTH];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&raw[i * 2..i * 2 + 2], 16).ok()?;
        }
        return Some(bytes);
    }

    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(raw.trim_end_matches('=')) {
        if let Ok(key) = bytes.as_slice().try_into() {
            return Some(key);
        }
    }

    if let Ok(bytes) = STANDARD.decode(raw) {
        if let Ok(key) = bytes.as_slice().try_into() {
            return Some(key);
        }
    }

    raw.as_bytes().try_into().ok()
}

/// Error of [`Vault`] construction or operation.
#[derive(Clone, Copy, Debug, Display, StdError)]
pub enum Error {
    /// Encryption key is not configured.
    #[display("upstream token encryption key is not configured")]
    MissingKey,

    /// Configured encryption key doesn't decode to exactly 32 bytes.
    #[display("upstream token encryption key is malformed")]
    MalformedKey,

    /// Encryption of a fresh upstream token failed.
    #[display("failed to encrypt an upstream token")]
    EncryptionFailed,

    /// Stored ciphertext failed authentication or decryption.
    #[display("stored upstream token failed to decrypt")]
    DecryptionFailed,

    /// Stored ciphertext blob is not a valid `nonce || ciphertext` encoding.
    #[display("stored upstream token ciphertext is malformed")]
    MalformedCipherText,
}

#[cfg(test)]
mod spec {
    use secrecy::SecretString;

    use crate::domain::session::CipherText;

    use super::{Error, Vault};

    fn vault() -> Vault {
        Vault::new(&SecretString::from(
            "000102030405060708090a0b0c0d0e0f\
             101112131415161718191a1b1c1d1e1f"
                .to_owned(),
        ))
        .unwrap()
    }

    #[test]
    fn round_trips_non_empty_plaintext() {
        let vault = vault();
        for plain in ["upstream-access-token", "ñ🔑", "a"] {
            let encrypted = vault.encrypt(plain).unwrap();

            assert_ne!(AsRef::<str>::as_ref(&encrypted), plain);
            assert_eq!(vault.decrypt(&encrypted).unwrap(), plain);
        }
    }

    #[test]
    fn passes_empty_strings_through() {
        let vault = vault();

        let encrypted = vault.encrypt("").unwrap();
        assert!(encrypted.is_empty());
        assert_eq!(vault.decrypt(&encrypted).unwrap(), "");
    }

    #[test]
    fn randomizes_every_encryption() {
        let vault = vault();

        assert_ne!(
            vault.encrypt("same-plaintext").unwrap(),
            vault.encrypt("same-plaintext").unwrap(),
        );
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let vault = vault();
        let encrypted = vault.encrypt("upstream-access-token").unwrap();

        let mut tampered = String::from(encrypted.clone());
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        assert!(vault.decrypt(&CipherText::from(tampered)).is_err());
    }

    #[test]
    fn rejects_a_foreign_key() {
        let encrypted = vault().encrypt("upstream-access-token").unwrap();

        let other = Vault::new(&SecretString::from(
            "202122232425262728292a2b2c2d2e2f\
             303132333435363738393a3b3c3d3e3f"
                .to_owned(),
        ))
        .unwrap();

        assert!(matches!(
            other.decrypt(&encrypted),
            Err(Error::DecryptionFailed),
        ));
    }

    #[test]
    fn rejects_garbage_ciphertext() {
        assert!(matches!(
            vault().decrypt(&CipherText::from("not base64 🚫".to_owned())),
            Err(Error::MalformedCipherText),
        ));
        assert!(matches!(
            vault().decrypt(&CipherText::from("c2hvcnQ".to_owned())),
            Err(Error::MalformedCipherText),
        ));
    }

    #[test]
    fn requires_a_well_formed_key() {
        assert!(matches!(
            Vault::new(&SecretString::from(String::new())),
            Err(Error::MissingKey),
        ));
        assert!(matches!(
            Vault::new(&SecretString::from("too-short".to_owned())),
            Err(Error::MalformedKey),
        ));
    }

    #[test]
    fn accepts_key_material_encodings() {
        // 32 raw bytes.
        assert!(Vault::new(&SecretString::from(
            "0123456789abcdef0123456789abcdef".to_owned(),
        ))
        .is_ok());
        // base64url (Fernet-style key).
        assert!(Vault::new(&SecretString::from(
            "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=".to_owned(),
        ))
        .is_ok());
    }
}
