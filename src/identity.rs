//! Peer identity: P-256 (SECP256R1) ECDSA keypair, peer-id derivation, and
//! PKCS8 PEM persistence.
//!
//! Mirrors the load-or-generate keystore shape of the teacher's
//! `key_management` crate (`Wallet::generate_key`, `KeyStore::flush`'s
//! restricted-permission file write) but keyed on a single identity file
//! rather than a multi-address wallet, per `spec.md` §4.A.

use std::fs;
use std::path::{Path, PathBuf};

use p256::ecdsa::{signature::Signer as _, signature::Verifier as _, Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length, in hex characters, of a derived peer id.
pub const PEER_ID_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read identity file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write identity file {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("identity file {0} does not contain a valid PKCS8 EC private key")]
    MalformedKey(PathBuf),
    #[error("signature verification failed")]
    BadSignature,
    #[error("identity file parent directory could not be created: {0}")]
    CreateDir(std::io::Error),
}

/// A peer's cryptographic identity: a P-256 keypair plus its derived id.
pub struct PeerIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    peer_id: String,
}

impl PeerIdentity {
    /// Generates a new random identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = *signing_key.verifying_key();
        let peer_id = peer_id_from_public_key(&verifying_key);
        Self {
            signing_key,
            verifying_key,
            peer_id,
        }
    }

    /// Loads an identity from a PKCS8 PEM private-key file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        let pem = fs::read_to_string(path).map_err(|e| IdentityError::Read(path.to_owned(), e))?;
        let signing_key = SigningKey::from_pkcs8_pem(&pem)
            .map_err(|_| IdentityError::MalformedKey(path.to_owned()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Loads the identity at `path` if present, otherwise generates a new
    /// one and persists it with owner-only (`0o600`) permissions, creating
    /// parent directories as needed.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            let identity = Self::generate();
            identity.save(path)?;
            Ok(identity)
        }
    }

    /// Persists the private key as a PKCS8 PEM file, creating parent
    /// directories and restricting permissions to the owner.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IdentityError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(IdentityError::CreateDir)?;
            }
        }
        let pem = self
            .signing_key
            .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
            .map_err(|_| IdentityError::MalformedKey(path.to_owned()))?;
        fs::write(path, pem.as_bytes()).map_err(|e| IdentityError::Write(path.to_owned(), e))?;
        restrict_permissions(path)?;
        Ok(())
    }

    /// This peer's derived id.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// This peer's public key.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Signs `data` with ECDSA/SHA-256.
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.signing_key.sign(data)
    }

    /// Verifies `signature` over `data` against this identity's own key.
    pub fn verify(&self, signature: &Signature, data: &[u8]) -> bool {
        self.verifying_key.verify(data, signature).is_ok()
    }
}

/// Verifies `signature` over `data` against an arbitrary public key,
/// without requiring a full [`PeerIdentity`].
pub fn verify_with_public_key(
    key: &VerifyingKey,
    signature: &Signature,
    data: &[u8],
) -> Result<(), IdentityError> {
    key.verify(data, signature).map_err(|_| IdentityError::BadSignature)
}

/// Derives a peer id from a public key: first 40 hex chars of
/// SHA-256(DER-encoded SubjectPublicKeyInfo).
pub fn peer_id_from_public_key(key: &VerifyingKey) -> String {
    let der = key
        .to_public_key_der()
        .expect("P-256 public key always encodes to DER");
    let mut hasher = Sha256::new();
    hasher.update(der.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..PEER_ID_LEN].to_string()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), IdentityError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .map_err(|e| IdentityError::Write(path.to_owned(), e))?
        .permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms).map_err(|e| IdentityError::Write(path.to_owned(), e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), IdentityError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_forty_hex_chars() {
        let id = PeerIdentity::generate();
        assert_eq!(id.peer_id().len(), PEER_ID_LEN);
        assert!(id.peer_id().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_identities_have_distinct_peer_ids() {
        let a = PeerIdentity::generate();
        let b = PeerIdentity::generate();
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let id = PeerIdentity::generate();
        let msg = b"optima";
        let sig = id.sign(msg);
        assert!(id.verify(&sig, msg));
        assert!(!id.verify(&sig, b"tampered"));
    }

    #[test]
    fn load_or_generate_persists_across_calls() {
        let dir = std::env::temp_dir().join(format!("optima-identity-test-{}", std::process::id()));
        let path = dir.join("identity.pem");
        let _ = fs::remove_dir_all(&dir);

        let first = PeerIdentity::load_or_generate(&path).unwrap();
        let second = PeerIdentity::load_or_generate(&path).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }

        let _ = fs::remove_dir_all(&dir);
    }
}
