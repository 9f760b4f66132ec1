use anyhow::Result;
use async_trait::async_trait;

/// The payer's wallet, as exposed by whatever adapter the host connected.
/// Gateway transfers need message signing; direct transfers need the wallet
/// to sign and send whole transactions.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Connected address, or `None` when no wallet is connected.
    fn address(&self) -> Option<String>;

    fn can_sign_messages(&self) -> bool;

    fn can_send_transactions(&self) -> bool;

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}
