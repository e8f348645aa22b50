//! Custodial key vault.
//!
//! Generates a 12-word mnemonic per investor, derives an Ed25519 signing key
//! at a fixed hardened path, and stores only the mnemonic sealed under a key
//! derived from the server secret. Signing keys are re-derived from the
//! ciphertext for every signing operation and never cached.
//!
//! ```text
//! entropy (16 bytes) -> mnemonic -> seed (64 bytes)
//!     -> SLIP-0010 m/44'/784'/0'/0'/0' -> Ed25519 key
//!     -> address = "0x" + hex(SHA-256(0x00 || public_key))
//!
//! sealed = hex(iv) ":" hex(ChaCha20-Poly1305(SHA-256(server_secret), iv, mnemonic))
//! ```

use bip39::Mnemonic;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signer as _, SigningKey};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::domain::error::BondError;
use crate::ports::wallet_port::WalletPort;

type HmacSha512 = Hmac<Sha512>;

pub const DERIVATION_PATH: &str = "m/44'/784'/0'/0'/0'";
const DERIVATION_INDICES: [u32; 5] = [44, 784, 0, 0, 0];
const HARDENED: u32 = 0x8000_0000;
const ENTROPY_BYTES: usize = 16;
const IV_BYTES: usize = 12;
const ED25519_SCHEME_FLAG: u8 = 0x00;

/// A persisted custodial wallet. The mnemonic is only ever held sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodialWallet {
    pub user_id: String,
    pub address: String,
    pub encrypted_mnemonic: String,
}

/// Output of [`CustodialVault::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedWallet {
    pub address: String,
    pub encrypted_mnemonic: String,
}

/// A restored signing key, alive only for the duration of one operation.
pub struct CustodialSigner {
    address: String,
    signing_key: SigningKey,
}

impl CustodialSigner {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Ed25519 signature over `message`, hex encoded.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for CustodialSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodialSigner")
            .field("address", &self.address)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

pub struct CustodialVault {
    key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for CustodialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodialVault").finish_non_exhaustive()
    }
}

impl CustodialVault {
    pub fn new(server_secret: &str) -> Result<Self, BondError> {
        if server_secret.is_empty() {
            return Err(BondError::ConfigInvalid {
                section: "vault".into(),
                key: "server_secret".into(),
                reason: "server secret must not be empty".into(),
            });
        }
        let digest: [u8; 32] = Sha256::digest(server_secret.as_bytes()).into();
        Ok(Self {
            key: Zeroizing::new(digest),
        })
    }

    pub fn generate(&self) -> Result<GeneratedWallet, BondError> {
        let mut entropy = Zeroizing::new([0u8; ENTROPY_BYTES]);
        OsRng.fill_bytes(&mut entropy[..]);
        let mnemonic = Mnemonic::from_entropy(&entropy[..])
            .map_err(|e| BondError::validation(format!("mnemonic generation failed: {e}")))?;
        let phrase = Zeroizing::new(mnemonic.to_string());

        let signer = signer_from_mnemonic(&mnemonic)?;
        let encrypted_mnemonic = self.seal(phrase.as_bytes())?;

        Ok(GeneratedWallet {
            address: signer.address,
            encrypted_mnemonic,
        })
    }

    /// Re-derives the signing key sealed in `encrypted_mnemonic`.
    pub fn restore(&self, encrypted_mnemonic: &str) -> Result<CustodialSigner, BondError> {
        let plaintext = self.open(encrypted_mnemonic)?;
        let phrase = std::str::from_utf8(&plaintext).map_err(|_| BondError::Decryption)?;
        let mnemonic = Mnemonic::parse_normalized(phrase).map_err(|_| BondError::Decryption)?;
        signer_from_mnemonic(&mnemonic)
    }

    /// Returns the user's wallet, creating it on first call.
    pub fn provision(
        &self,
        wallets: &dyn WalletPort,
        user_id: &str,
    ) -> Result<CustodialWallet, BondError> {
        if let Some(existing) = wallets.find_wallet_by_user(user_id)? {
            return Ok(existing);
        }

        let generated = self.generate()?;
        let wallet = CustodialWallet {
            user_id: user_id.to_string(),
            address: generated.address,
            encrypted_mnemonic: generated.encrypted_mnemonic,
        };

        if wallets.insert_wallet(&wallet)? {
            tracing::info!(user_id, address = %wallet.address, "custodial wallet provisioned");
            return Ok(wallet);
        }

        // Lost a race with a concurrent provision for the same user.
        wallets
            .find_wallet_by_user(user_id)?
            .ok_or_else(|| BondError::not_found("wallet", user_id))
    }

    /// Restores the signer for `user_id` and checks it matches the stored address.
    pub fn signer_for(
        &self,
        wallets: &dyn WalletPort,
        user_id: &str,
    ) -> Result<CustodialSigner, BondError> {
        let wallet = wallets
            .find_wallet_by_user(user_id)?
            .ok_or_else(|| BondError::not_found("wallet", user_id))?;
        let signer = self.restore(&wallet.encrypted_mnemonic)?;
        if signer.address != wallet.address {
            tracing::error!(user_id, "restored key does not match stored wallet address");
            return Err(BondError::Decryption);
        }
        Ok(signer)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String, BondError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key[..]));
        let mut iv = [0u8; IV_BYTES];
        OsRng.fill_bytes(&mut iv);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| BondError::validation("mnemonic encryption failed"))?;
        Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
    }

    fn open(&self, sealed: &str) -> Result<Zeroizing<Vec<u8>>, BondError> {
        let (iv_hex, cipher_hex) = sealed.split_once(':').ok_or(BondError::Decryption)?;
        let iv = hex::decode(iv_hex).map_err(|_| BondError::Decryption)?;
        if iv.len() != IV_BYTES {
            return Err(BondError::Decryption);
        }
        let ciphertext = hex::decode(cipher_hex).map_err(|_| BondError::Decryption)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key[..]));
        cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| BondError::Decryption)
    }
}

fn signer_from_mnemonic(mnemonic: &Mnemonic) -> Result<CustodialSigner, BondError> {
    let seed = Zeroizing::new(mnemonic.to_seed(""));
    let secret = derive_ed25519(&seed[..], &DERIVATION_INDICES)?;
    let signing_key = SigningKey::from_bytes(&*secret);
    let address = address_for(&signing_key.verifying_key().to_bytes());
    Ok(CustodialSigner {
        address,
        signing_key,
    })
}

/// SLIP-0010 hardened derivation for Ed25519.
fn derive_ed25519(seed: &[u8], path: &[u32]) -> Result<Zeroizing<[u8; 32]>, BondError> {
    let (mut key, mut chain_code) = master_key(seed)?;
    for index in path {
        let mut data = Vec::with_capacity(37);
        data.push(0u8);
        data.extend_from_slice(&key[..]);
        data.extend_from_slice(&(index | HARDENED).to_be_bytes());
        let (k, c) = hmac_split(&chain_code[..], &data)?;
        key = k;
        chain_code = c;
    }
    Ok(key)
}

fn master_key(seed: &[u8]) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>), BondError> {
    hmac_split(b"ed25519 seed", seed)
}

fn hmac_split(
    key: &[u8],
    data: &[u8],
) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>), BondError> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key).map_err(|_| BondError::Decryption)?;
    mac.update(data);
    let out = mac.finalize().into_bytes();
    let mut left = Zeroizing::new([0u8; 32]);
    let mut right = Zeroizing::new([0u8; 32]);
    left.copy_from_slice(&out[..32]);
    right.copy_from_slice(&out[32..]);
    Ok((left, right))
}

pub fn address_for(public_key: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update([ED25519_SCHEME_FLAG]);
    hasher.update(public_key);
    format!("0x{}", hex::encode(hasher.finalize()))
}
