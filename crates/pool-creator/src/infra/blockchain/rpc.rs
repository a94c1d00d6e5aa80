use {
    super::{Blockchain, Receipt, SendError, Transaction, USER_REJECTED_REQUEST, contracts},
    crate::domain::{
        call::{Reads, TokenReads},
        eth,
        pool::Protocol,
        sequencer::{OnChainSnapshot, PoolSnapshot, SurgeSnapshot, TokenSnapshot},
    },
    alloy::{
        network::{EthereumWallet, TransactionBuilder as _},
        providers::{DynProvider, Provider, ProviderBuilder},
        rpc::types::{TransactionReceipt, TransactionRequest},
        signers::local::PrivateKeySigner,
        transports::TransportError,
    },
    anyhow::{Context, Result},
    std::time::{Duration, SystemTime, UNIX_EPOCH},
    url::Url,
};

/// Slack added to the underlying a vault asks for when minting shares, in
/// basis points. Vault share prices only grow between reading and minting.
const MINT_COST_EPSILON_BPS: u64 = 5;

#[derive(Clone, Debug)]
pub struct Config {
    pub poll_interval: Duration,
    pub receipt_timeout: Duration,
}

/// [`Blockchain`] over a JSON-RPC node with an optional local signer.
pub struct Rpc {
    provider: DynProvider,
    signer: Option<eth::Address>,
    account: eth::Address,
    config: Config,
}

impl Rpc {
    /// `account` defaults to the signer; it differs when transactions are
    /// executed by a multisig the signer owns.
    pub fn new(
        url: Url,
        signer: Option<PrivateKeySigner>,
        account: Option<eth::Address>,
        config: Config,
    ) -> Result<Self> {
        let signer_address = signer.as_ref().map(|signer| signer.address());
        let account = account
            .or(signer_address)
            .context("either a private key or an account is needed")?;
        let provider = match signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };
        Ok(Self {
            provider,
            signer: signer_address,
            account,
            config,
        })
    }

    async fn token_snapshot(&self, reads: &Reads, token: &TokenReads) -> Result<TokenSnapshot> {
        let erc20 = contracts::IERC20::new(token.token, &self.provider);
        let balance = erc20
            .balanceOf(self.account)
            .call()
            .await
            .context("balanceOf")?;
        let allowance = match token.spender {
            Some(spender) => erc20
                .allowance(self.account, spender)
                .call()
                .await
                .context("allowance")?,
            None => eth::U256::ZERO,
        };

        let router_allowance = match (reads.protocol, reads.permit2, reads.router) {
            (Protocol::BalancerV3, Some(permit2), Some(router)) => {
                let allowance = contracts::IPermit2::new(permit2, &self.provider)
                    .allowance(self.account, token.token, router)
                    .call()
                    .await
                    .context("Permit2 allowance")?;
                if allowance.expiration.to::<u64>() > now() {
                    eth::U256::from(allowance.amount)
                } else {
                    eth::U256::ZERO
                }
            }
            _ => eth::U256::ZERO,
        };

        let (underlying_allowance, mint_cost) = match token.wrap {
            Some((underlying, vault)) => {
                let cost = contracts::IERC4626::new(vault, &self.provider)
                    .previewMint(token.amount)
                    .call()
                    .await
                    .context("previewMint")?;
                let allowance = contracts::IERC20::new(underlying, &self.provider)
                    .allowance(self.account, vault)
                    .call()
                    .await
                    .context("underlying allowance")?;
                (allowance, with_epsilon(cost))
            }
            None => (eth::U256::ZERO, eth::U256::ZERO),
        };

        Ok(TokenSnapshot {
            allowance,
            router_allowance,
            underlying_allowance,
            mint_cost,
            balance,
        })
    }

    async fn cow_amm_snapshot(&self, pool: eth::Address) -> Result<PoolSnapshot> {
        let bpool = contracts::BPool::new(pool, &self.provider);
        Ok(PoolSnapshot {
            bound: bpool
                .getCurrentTokens()
                .call()
                .await
                .context("getCurrentTokens")?,
            swap_fee: bpool.getSwapFee().call().await.context("getSwapFee")?,
            finalized: bpool.isFinalized().call().await.context("isFinalized")?,
            surge: None,
        })
    }

    async fn balancer_v3_snapshot(&self, reads: &Reads, pool: eth::Address) -> Result<PoolSnapshot> {
        let vault = contracts::IVault::new(
            reads
                .balancer_vault
                .context("no Balancer vault address is configured")?,
            &self.provider,
        );
        let surge = match reads.surge_hook {
            Some(hook) => {
                let hook = contracts::IStableSurgeHook::new(hook, &self.provider);
                Some(SurgeSnapshot {
                    max_surge_fee: hook
                        .getMaxSurgeFeePercentage(pool)
                        .call()
                        .await
                        .context("getMaxSurgeFeePercentage")?,
                    surge_threshold: hook
                        .getSurgeThresholdPercentage(pool)
                        .call()
                        .await
                        .context("getSurgeThresholdPercentage")?,
                })
            }
            None => None,
        };
        Ok(PoolSnapshot {
            bound: vault
                .getPoolTokens(pool)
                .call()
                .await
                .context("getPoolTokens")?,
            swap_fee: vault
                .getStaticSwapFeePercentage(pool)
                .call()
                .await
                .context("getStaticSwapFeePercentage")?,
            finalized: vault
                .isPoolInitialized(pool)
                .call()
                .await
                .context("isPoolInitialized")?,
            surge,
        })
    }

    fn request(&self, from: eth::Address, tx: &Transaction) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(from)
            .with_to(tx.to)
            .with_input(tx.data.clone())
    }
}

#[async_trait::async_trait]
impl Blockchain for Rpc {
    fn account(&self) -> eth::Address {
        self.account
    }

    async fn simulate(&self, tx: &Transaction) -> Result<(), SendError> {
        self.provider
            .call(self.request(self.account, tx))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn send(&self, tx: &Transaction) -> Result<eth::TxHash, SendError> {
        let signer = self
            .signer
            .context("no private key is configured to sign transactions")?;
        let pending = self
            .provider
            .send_transaction(self.request(signer, tx))
            .await
            .map_err(classify)?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, hash: eth::TxHash) -> Result<Receipt> {
        let poll = async {
            let mut interval = tokio::time::interval(self.config.poll_interval);
            loop {
                interval.tick().await;
                if let Some(receipt) = self
                    .provider
                    .get_transaction_receipt(hash)
                    .await
                    .context("eth_getTransactionReceipt")?
                {
                    return Ok::<_, anyhow::Error>(receipt);
                }
                tracing::trace!(?hash, "transaction not mined yet");
            }
        };
        let receipt = tokio::time::timeout(self.config.receipt_timeout, poll)
            .await
            .with_context(|| format!("no receipt for {hash} after {:?}", self.config.receipt_timeout))??;
        Ok(Receipt {
            hash: receipt.transaction_hash,
            success: receipt.status(),
            created_pool: created_pool(&receipt),
        })
    }

    async fn snapshot(&self, reads: &Reads) -> Result<OnChainSnapshot> {
        let tokens = futures::future::try_join_all(
            reads
                .tokens
                .iter()
                .map(|token| self.token_snapshot(reads, token)),
        )
        .await?;
        let pool = match (reads.pool, reads.protocol) {
            (None, _) => None,
            (Some(pool), Protocol::CowAmm) => Some(self.cow_amm_snapshot(pool).await?),
            (Some(pool), Protocol::BalancerV3) => Some(self.balancer_v3_snapshot(reads, pool).await?),
        };
        Ok(OnChainSnapshot { pool, tokens })
    }
}

/// Maps node errors to what happened from the user's point of view.
fn classify(err: TransportError) -> SendError {
    if let Some(payload) = err.as_error_resp() {
        if payload.code == USER_REJECTED_REQUEST {
            return SendError::Rejected;
        }
        if let Some(data) = payload.as_revert_data() {
            return SendError::Reverted {
                reason: alloy::sol_types::decode_revert_reason(&data),
            };
        }
        if payload.message.contains("revert") {
            return SendError::Reverted {
                reason: Some(payload.message.to_string()),
            };
        }
    }
    SendError::Other(err.into())
}

fn created_pool(receipt: &TransactionReceipt) -> Option<eth::Address> {
    receipt.inner.logs().iter().find_map(|log| {
        log.log_decode::<contracts::IBasePoolFactory::PoolCreated>()
            .map(|event| event.inner.data.pool)
            .or_else(|_| {
                log.log_decode::<contracts::BCoWFactory::LOG_NEW_POOL>()
                    .map(|event| event.inner.data.bPool)
            })
            .ok()
    })
}

/// `ceil(amount * (10_000 + epsilon) / 10_000)`
fn with_epsilon(amount: eth::U256) -> eth::U256 {
    let bps = eth::U256::from(10_000);
    amount
        .saturating_mul(bps + eth::U256::from(MINT_COST_EPSILON_BPS))
        .div_ceil(bps)
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
