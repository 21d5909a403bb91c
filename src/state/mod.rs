use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{LimitsConfig, RelayConfig};
use crate::contract::{MintSubmitter, RelayMinter, TapNftContract};
use crate::ens::{ENS_REGISTRY_ADDRESS, EnsResolver, RecipientResolver};
use crate::eth::EthClient;
use crate::eth::address::Address;
use crate::eth::tx::TxSigner;
use crate::store::RelayStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RelayStore>,
    pub resolver: Arc<dyn RecipientResolver>,
    /// Read-side contract view; `None` while CONTRACT_ADDRESS is missing or
    /// malformed (mint and lookup then fail with a server error).
    pub contract: Option<TapNftContract>,
    /// Write capability; requires both the contract and the relayer key.
    pub minter: Option<Arc<dyn MintSubmitter>>,
    pub tap_key: Option<String>,
    pub chain_id: u64,
    pub deploy_block: u64,
    pub limits: LimitsConfig,
    pub start_time: Instant,
}

impl AppState {
    /// Wires chain clients, the resolver, and the contract bindings from
    /// configuration. Missing mint prerequisites are logged, not fatal: the
    /// lookup and health endpoints stay useful without them.
    pub fn build(config: &RelayConfig, store: Arc<dyn RelayStore>) -> Result<Self> {
        let chain_client = EthClient::new(&config.chain.rpc_url, config.chain.request_timeout())
            .context("Failed to initialize chain RPC client")?;
        let ens_client = EthClient::new(&config.ens.rpc_url, config.chain.request_timeout())
            .context("Failed to initialize ENS RPC client")?;

        let registry_hex = config
            .ens
            .registry_address
            .as_deref()
            .unwrap_or(ENS_REGISTRY_ADDRESS);
        let registry =
            Address::parse(registry_hex).context("Invalid ENS registry address")?;
        let resolver: Arc<dyn RecipientResolver> = Arc::new(EnsResolver::new(
            ens_client,
            registry,
            config.cache.resolve_max_capacity,
            Duration::from_secs(config.cache.resolve_ttl_seconds),
        ));

        let contract = match config.chain.contract_address.as_deref() {
            Some(raw) => match Address::parse(raw) {
                Ok(address) => Some(TapNftContract::new(chain_client.clone(), address)),
                Err(err) => {
                    warn!("CONTRACT_ADDRESS is not a valid address, mint disabled: {err}");
                    None
                }
            },
            None => {
                warn!("CONTRACT_ADDRESS is not configured, mint disabled");
                None
            }
        };

        let minter = match (&contract, config.secrets.relayer_key.as_deref()) {
            (Some(contract), Some(key)) => match TxSigner::from_hex_key(key) {
                Ok(signer) => {
                    let minter = RelayMinter::new(
                        contract.clone(),
                        signer,
                        config.chain.chain_id,
                        u128::from(config.chain.gas_limit),
                        config.chain.confirm_timeout(),
                        config.chain.receipt_poll_interval(),
                    );
                    info!(relayer = %minter.relayer_address(), "Relayer signer configured");
                    Some(Arc::new(minter) as Arc<dyn MintSubmitter>)
                }
                Err(err) => {
                    warn!("RELAYER_PRIVATE_KEY is invalid, mint disabled: {err}");
                    None
                }
            },
            (_, None) => {
                warn!("RELAYER_PRIVATE_KEY is not configured, mint disabled");
                None
            }
            (None, _) => None,
        };

        if config.secrets.tap_key.is_none() {
            warn!("TAP_KEY is not configured; every mint request will be rejected");
        }

        Ok(Self {
            store,
            resolver,
            contract,
            minter,
            tap_key: config.secrets.tap_key.clone(),
            chain_id: config.chain.chain_id,
            deploy_block: config.chain.deploy_block,
            limits: config.limits.clone(),
            start_time: Instant::now(),
        })
    }

    /// Health-endpoint view of relayer key presence.
    pub fn relayer_status(&self) -> &'static str {
        if self.minter.is_some() {
            "configured"
        } else {
            "missing"
        }
    }

    pub fn contract_hex(&self) -> String {
        self.contract
            .as_ref()
            .map(|c| c.address().to_checksum())
            .unwrap_or_default()
    }
}
