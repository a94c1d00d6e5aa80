//! Multisig relay: transactions are proposed to a Safe transaction service,
//! collect the owners' signatures there and get executed by one of them
//! later. Until then only the Safe transaction hash identifies them.

use {
    super::blockchain::Transaction,
    crate::domain::eth,
    alloy::{
        primitives::hex,
        signers::{SignerSync as _, local::PrivateKeySigner},
        sol_types::{SolStruct as _, eip712_domain},
    },
    anyhow::{Context, Result, ensure},
    reqwest::Client,
    serde::{Deserialize, Serialize},
    serde_with::{DisplayFromStr, PickFirst, serde_as},
    std::time::Duration,
    tokio::sync::Mutex,
    url::Url,
};

alloy::sol! {
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait::async_trait]
pub trait Relay: Send + Sync {
    /// Proposes the transaction and returns the relay's identifier for it.
    async fn propose(&self, tx: &Transaction) -> Result<eth::B256>;

    /// The hash of the chain transaction that executed the proposal, once
    /// there is one.
    async fn resolve(&self, id: eth::B256) -> Result<Option<eth::TxHash>>;
}

#[derive(Clone, Debug)]
pub struct Config {
    pub url: Url,
    pub safe: eth::Address,
    pub chain_id: u64,
    pub timeout: Duration,
}

/// [`Relay`] backed by the Safe transaction service. The local signer has to
/// be one of the Safe's owners.
pub struct SafeRelay {
    client: Client,
    config: Config,
    signer: PrivateKeySigner,
    /// Proposals are numbered by Safe nonce; two concurrent proposals must
    /// not pick the same one.
    proposing: Mutex<()>,
}

impl SafeRelay {
    pub fn new(config: Config, signer: PrivateKeySigner) -> Self {
        Self {
            client: Client::new(),
            config,
            signer,
            proposing: Mutex::new(()),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.config
            .url
            .join(path)
            .with_context(|| format!("invalid relay endpoint {path}"))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.timeout)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        ensure!(
            response.status().is_success(),
            "GET {url} returned {}",
            response.status()
        );
        response.json().await.with_context(|| format!("GET {url}"))
    }

    /// The Safe's next free nonce, counting proposals that are still waiting
    /// for signatures.
    async fn next_nonce(&self) -> Result<u64> {
        let safe = self.config.safe.to_checksum(None);
        let info: SafeInfo = self.get(self.endpoint(&format!("api/v1/safes/{safe}/"))?).await?;
        let mut pending = self.endpoint(&format!("api/v1/safes/{safe}/multisig-transactions/"))?;
        pending
            .query_pairs_mut()
            .append_pair("executed", "false")
            .append_pair("nonce__gte", &info.nonce.to_string());
        let pending: Page<PendingTransaction> = self.get(pending).await?;
        Ok(next_nonce(info.nonce, &pending.results))
    }
}

#[async_trait::async_trait]
impl Relay for SafeRelay {
    async fn propose(&self, tx: &Transaction) -> Result<eth::B256> {
        let _guard = self.proposing.lock().await;
        let nonce = self.next_nonce().await?;
        let safe_tx = safe_tx(tx, nonce);
        let hash = safe_tx.eip712_signing_hash(&eip712_domain! {
            chain_id: self.config.chain_id,
            verifying_contract: self.config.safe,
        });
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .context("signing Safe transaction")?;

        let proposal = Proposal::new(&safe_tx, hash, self.signer.address(), &signature.as_bytes());
        let url = self.endpoint(&format!(
            "api/v1/safes/{}/multisig-transactions/",
            self.config.safe.to_checksum(None)
        ))?;
        let response = self
            .client
            .post(url.clone())
            .json(&proposal)
            .timeout(self.config.timeout)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("relay refused the proposal ({status}): {body}");
        }
        tracing::debug!(?hash, nonce, "proposed Safe transaction");
        Ok(hash)
    }

    async fn resolve(&self, id: eth::B256) -> Result<Option<eth::TxHash>> {
        let status: MultisigTransaction = self
            .get(self.endpoint(&format!("api/v1/multisig-transactions/{id}/"))?)
            .await?;
        Ok(status.transaction_hash)
    }
}

fn safe_tx(tx: &Transaction, nonce: u64) -> SafeTx {
    SafeTx {
        to: tx.to,
        value: eth::U256::ZERO,
        data: tx.data.clone(),
        operation: 0,
        safeTxGas: eth::U256::ZERO,
        baseGas: eth::U256::ZERO,
        gasPrice: eth::U256::ZERO,
        gasToken: eth::Address::ZERO,
        refundReceiver: eth::Address::ZERO,
        nonce: eth::U256::from(nonce),
    }
}

fn next_nonce(current: u64, pending: &[PendingTransaction]) -> u64 {
    pending
        .iter()
        .map(|tx| tx.nonce + 1)
        .fold(current, u64::max)
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct SafeInfo {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct PendingTransaction {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    nonce: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultisigTransaction {
    transaction_hash: Option<eth::TxHash>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Proposal {
    to: String,
    value: String,
    data: String,
    operation: u8,
    safe_tx_gas: String,
    base_gas: String,
    gas_price: String,
    gas_token: String,
    refund_receiver: String,
    nonce: String,
    contract_transaction_hash: String,
    sender: String,
    signature: String,
    origin: &'static str,
}

impl Proposal {
    fn new(tx: &SafeTx, hash: eth::B256, sender: eth::Address, signature: &[u8]) -> Self {
        Self {
            to: tx.to.to_checksum(None),
            value: tx.value.to_string(),
            data: hex::encode_prefixed(&tx.data),
            operation: tx.operation,
            safe_tx_gas: tx.safeTxGas.to_string(),
            base_gas: tx.baseGas.to_string(),
            gas_price: tx.gasPrice.to_string(),
            gas_token: tx.gasToken.to_checksum(None),
            refund_receiver: tx.refundReceiver.to_checksum(None),
            nonce: tx.nonce.to_string(),
            contract_transaction_hash: hash.to_string(),
            sender: sender.to_checksum(None),
            signature: hex::encode_prefixed(signature),
            origin: "pool-creator",
        }
    }
}
