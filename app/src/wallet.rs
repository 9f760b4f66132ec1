use anyhow::{Context, Result};
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use ledger::Wallet;
use rand::rngs::OsRng;

const WALLET_SECRET: &str = "wallet_secret_key";

/// Wallet backed by a locally held ed25519 key. The secret lives in the OS
/// keychain; a fresh key is generated on first use.
pub struct LocalWallet {
    key: SigningKey,
    address: String,
}

impl LocalWallet {
    pub fn load_or_create() -> Result<Self> {
        let key = match config::get_secret(WALLET_SECRET) {
            Ok(encoded) => {
                let bytes: [u8; 32] = hex::decode(&encoded)
                    .context("stored wallet key is not hex")?
                    .as_slice()
                    .try_into()
                    .context("stored wallet key has the wrong length")?;
                SigningKey::from_bytes(&bytes)
            }
            Err(_) => {
                let key = SigningKey::generate(&mut OsRng);
                if let Err(e) = config::store_secret(WALLET_SECRET, &hex::encode(key.to_bytes())) {
                    tracing::warn!(error = %e, "could not persist wallet key to keychain");
                }
                tracing::info!("generated a new local wallet key");
                key
            }
        };

        let address = hex::encode(key.verifying_key().to_bytes());
        Ok(Self { key, address })
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    fn address(&self) -> Option<String> {
        Some(self.address.clone())
    }

    fn can_sign_messages(&self) -> bool {
        true
    }

    fn can_send_transactions(&self) -> bool {
        true
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}
