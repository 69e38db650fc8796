//! session key material and share encryption
//!
//! - ephemeral secp256k1 keypair per retrieval session
//! - keccak-256 token commitment
//! - share encryption: ecdh(secp256k1) -> hkdf-sha256 -> chacha20poly1305,
//!   node index as associated data

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use k256::{elliptic_curve::sec1::ToEncodedPoint, ProjectivePoint, PublicKey, Scalar, SecretKey};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::curve::{keccak256, point_coordinates, point_from_sec1, scalar_from_bytes};
use crate::rpc::EncryptedShare;
use crate::{Error, Result};

/// hkdf info for share keys
const SHARE_KEY_INFO: &[u8] = b"quorumkey:share_key:v1";

/// single-use keypair authorising share release for one session
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// fresh keypair from the os rng
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_point(&self) -> ProjectivePoint {
        self.public.to_projective()
    }

    /// padded hex `(x, y)` of the public key
    pub fn public_coordinates(&self) -> Result<(String, String)> {
        point_coordinates(&self.public_point())
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// hex keccak-256 of the login token
pub fn token_commitment(id_token: &str) -> String {
    hex::encode(keccak256(id_token.as_bytes()))
}

/// derive the symmetric key for one share
fn share_key(shared_x: &[u8], sender_key: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(Some(sender_key), shared_x);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(SHARE_KEY_INFO, &mut okm[..])
        .map_err(|e| Error::ShareDecryption(e.to_string()))?;
    Ok(okm)
}

/// encrypt a share to `recipient` (node side of the exchange)
pub fn encrypt_share(
    recipient: &ProjectivePoint,
    node_index: u32,
    share: &Scalar,
) -> Result<EncryptedShare> {
    let sender = SecretKey::random(&mut OsRng);
    let sender_key = sender.public_key().to_encoded_point(true).as_bytes().to_vec();

    let shared = k256::ecdh::diffie_hellman(sender.to_nonzero_scalar(), recipient.to_affine());
    let key = share_key(shared.raw_secret_bytes(), &sender_key)?;

    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new_from_slice(&key[..])
        .map_err(|e| Error::ShareDecryption(e.to_string()))?;
    let plaintext: Zeroizing<[u8; 32]> = Zeroizing::new(share.to_bytes().into());
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_slice(),
                aad: &node_index.to_be_bytes(),
            },
        )
        .map_err(|e| Error::ShareDecryption(e.to_string()))?;

    Ok(EncryptedShare {
        node_index,
        sender_key,
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// decrypts node shares with the session's ephemeral key
///
/// the scheme nodes encrypt with is network policy, so this is pluggable.
pub trait ShareDecryptor: Send + Sync {
    fn decrypt(&self, key: &EphemeralKeyPair, share: &EncryptedShare) -> Result<Scalar>;
}

/// ecdh + hkdf-sha256 + chacha20poly1305, matching [`encrypt_share`]
#[derive(Clone, Copy, Debug, Default)]
pub struct EciesDecryptor;

impl ShareDecryptor for EciesDecryptor {
    fn decrypt(&self, key: &EphemeralKeyPair, share: &EncryptedShare) -> Result<Scalar> {
        if share.nonce.len() != 12 {
            return Err(Error::ShareDecryption("bad nonce length".into()));
        }
        let sender = point_from_sec1(&share.sender_key)
            .map_err(|_| Error::ShareDecryption("bad sender key".into()))?;

        let shared =
            k256::ecdh::diffie_hellman(key.secret().to_nonzero_scalar(), sender.to_affine());
        let sym = share_key(shared.raw_secret_bytes(), &share.sender_key)?;

        let cipher = ChaCha20Poly1305::new_from_slice(&sym[..])
            .map_err(|e| Error::ShareDecryption(e.to_string()))?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(&share.nonce),
                    Payload {
                        msg: &share.ciphertext,
                        aad: &share.node_index.to_be_bytes(),
                    },
                )
                .map_err(|_| {
                    Error::ShareDecryption(format!(
                        "share from node {} failed to open",
                        share.node_index
                    ))
                })?,
        );

        scalar_from_bytes(&plaintext)
            .map_err(|_| Error::ShareDecryption("share is not a canonical scalar".into()))
    }
}
