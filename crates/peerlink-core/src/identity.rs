//! Peer files: signed identity bundles
//!
//! A peer's public peer file binds its peer URI to an Ed25519 public key and
//! carries the find secret that other locations must present during the
//! identify handshake. The private half holds the signing key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::IdentityError;
use crate::types::{FindSecret, PeerUri};
use crate::Result;

// ----------------------------------------------------------------------------
// Contact Hash
// ----------------------------------------------------------------------------

/// Hex SHA-256 of a public key; the contact part of a peer URI
pub fn contact_hash<T: AsRef<[u8]>>(public_key: T) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key.as_ref());
    hex::encode(hasher.finalize())
}

// ----------------------------------------------------------------------------
// Public Peer File
// ----------------------------------------------------------------------------

/// Public, signed portion of a peer file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerFilePublic {
    pub peer_uri: PeerUri,
    /// Hex encoded Ed25519 public key
    pub public_key: String,
    pub find_secret: FindSecret,
    /// Hex encoded Ed25519 signature over [`PeerFilePublic::signed_bytes`]
    pub signature: String,
}

impl PeerFilePublic {
    fn signed_bytes(peer_uri: &PeerUri, public_key: &str, find_secret: &FindSecret) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(peer_uri.as_str().len() + public_key.len() + 64);
        bytes.extend_from_slice(peer_uri.as_str().as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(public_key.as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(find_secret.as_bytes());
        bytes
    }

    fn verifying_key(&self) -> Result<VerifyingKey> {
        let raw: [u8; 32] = hex::decode(&self.public_key)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(IdentityError::InvalidKeyEncoding)?;
        VerifyingKey::from_bytes(&raw).map_err(|_| IdentityError::InvalidKeyEncoding.into())
    }

    /// Check that the URI is derived from the key and the bundle is self-signed
    pub fn verify(&self) -> Result<()> {
        let key = self.verifying_key()?;
        if self.peer_uri.contact() != contact_hash(key.to_bytes()) {
            return Err(IdentityError::PeerUriMismatch {
                uri: self.peer_uri.to_string(),
            }
            .into());
        }

        let raw: [u8; 64] = hex::decode(&self.signature)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(IdentityError::InvalidSignatureEncoding)?;
        let signature = Signature::from_bytes(&raw);
        let signed = Self::signed_bytes(&self.peer_uri, &self.public_key, &self.find_secret);
        key.verify(&signed, &signature)
            .map_err(|_| IdentityError::SignatureVerificationFailed.into())
    }
}

// ----------------------------------------------------------------------------
// Private Peer File
// ----------------------------------------------------------------------------

/// Private portion of a peer file
#[derive(Clone)]
pub struct PeerFilePrivate {
    signing_key: SigningKey,
}

impl PeerFilePrivate {
    pub fn sign<T: AsRef<[u8]>>(&self, data: T) -> [u8; 64] {
        self.signing_key.sign(data.as_ref()).to_bytes()
    }
}

impl core::fmt::Debug for PeerFilePrivate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeerFilePrivate").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Peer Files
// ----------------------------------------------------------------------------

/// The local account's public and private peer files
#[derive(Debug, Clone)]
pub struct PeerFiles {
    public: PeerFilePublic,
    private: PeerFilePrivate,
}

impl PeerFiles {
    /// Generate a new identity under `domain`
    pub fn generate(domain: &str) -> Self {
        Self::generate_with_rng(domain, &mut rand_core::OsRng)
    }

    /// Generate a new identity with a caller supplied RNG
    pub fn generate_with_rng<R: RngCore + CryptoRng>(domain: &str, rng: &mut R) -> Self {
        let mut secret_bytes = [0u8; 16];
        rng.fill_bytes(&mut secret_bytes);
        Self::generate_with_secret(domain, FindSecret::new(hex::encode(secret_bytes)), rng)
    }

    /// Generate a new identity with a fixed find secret
    pub fn generate_with_secret<R: RngCore + CryptoRng>(
        domain: &str,
        find_secret: FindSecret,
        rng: &mut R,
    ) -> Self {
        let mut key_bytes = [0u8; 32];
        rng.fill_bytes(&mut key_bytes);
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let private = PeerFilePrivate { signing_key };

        let public_key_bytes = private.signing_key.verifying_key().to_bytes();
        let public_key = hex::encode(public_key_bytes);
        let peer_uri = PeerUri::from_parts(domain, &contact_hash(public_key_bytes));
        let signed = PeerFilePublic::signed_bytes(&peer_uri, &public_key, &find_secret);
        let signature = hex::encode(private.sign(signed));

        Self {
            public: PeerFilePublic {
                peer_uri,
                public_key,
                find_secret,
                signature,
            },
            private,
        }
    }

    pub fn public(&self) -> &PeerFilePublic {
        &self.public
    }

    pub fn private(&self) -> &PeerFilePrivate {
        &self.private
    }

    pub fn peer_uri(&self) -> &PeerUri {
        &self.public.peer_uri
    }

    pub fn find_secret(&self) -> &FindSecret {
        &self.public.find_secret
    }
}

// ----------------------------------------------------------------------------
// Remote Peer Identity
// ----------------------------------------------------------------------------

/// What we know about the remote peer a location session is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub peer_uri: PeerUri,
    pub peer_file: Option<PeerFilePublic>,
    /// Secret presented when identifying to this peer
    pub find_secret: Option<FindSecret>,
}

impl PeerIdentity {
    pub fn new(peer_uri: PeerUri) -> Self {
        Self {
            peer_uri,
            peer_file: None,
            find_secret: None,
        }
    }

    pub fn from_peer_file(peer_file: PeerFilePublic) -> Self {
        Self {
            peer_uri: peer_file.peer_uri.clone(),
            find_secret: Some(peer_file.find_secret.clone()),
            peer_file: Some(peer_file),
        }
    }

    /// Prefer `find_secret` over the one published in the peer file
    pub fn with_find_secret(mut self, find_secret: Option<FindSecret>) -> Self {
        if find_secret.is_some() {
            self.find_secret = find_secret;
        }
        self
    }

    /// The remote peer's find secret, if supplied or known from its peer file
    pub fn find_secret(&self) -> Option<&FindSecret> {
        self.find_secret.as_ref()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
