use alloy_primitives::Address;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ChainError;

/// What the gateway reports for a transaction hash. Distinct from
/// [`broker_types::TxStatus`]: `None` isn't persisted, it's the trigger the
/// Transactions reconciler loop uses to promote an aged `Pending` to `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayTxStatus {
    Pending,
    Ok,
    Fail,
    None,
}

/// Thin REST client over the gateway's read-only surface. Broadcast of
/// prebuilt signed transactions also goes through here (`execute`).
pub struct ChainGateway {
    base_url: String,
    gas_station_url: String,
    client: reqwest::Client,
}

impl ChainGateway {
    pub fn new(base_url: impl Into<String>, gas_station_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            gas_station_url: gas_station_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_decimal(&self, path: &str) -> Result<Decimal, ChainError> {
        #[derive(Deserialize)]
        struct Resp {
            amount: Decimal,
        }
        let resp = self.client.get(format!("{}{}", self.base_url, path)).send().await?;
        Ok(resp.json::<Resp>().await.map_err(|e| ChainError::Protocol(e.to_string()))?.amount)
    }

    pub async fn get_allowance(&self, owner: Address, asset: Address) -> Result<Decimal, ChainError> {
        self.get_decimal(&format!("/broker/getAllowance/{owner}/{asset}")).await
    }

    pub async fn get_nonce(&self, owner: Address) -> Result<Option<u64>, ChainError> {
        #[derive(Deserialize)]
        struct Resp {
            nonce: Option<u64>,
        }
        let resp = self
            .client
            .get(format!("{}/broker/getNonce/{owner}", self.base_url))
            .send()
            .await?;
        Ok(resp.json::<Resp>().await.map_err(|e| ChainError::Protocol(e.to_string()))?.nonce)
    }

    pub async fn get_stake(&self, owner: Address) -> Result<Decimal, ChainError> {
        self.get_decimal(&format!("/broker/getStake/{owner}")).await
    }

    pub async fn get_transaction_status(&self, hash: &str) -> Result<GatewayTxStatus, ChainError> {
        #[derive(Deserialize)]
        struct Resp {
            status: String,
        }
        let resp = self
            .client
            .get(format!("{}/broker/getTransactionStatus/{hash}", self.base_url))
            .send()
            .await?;
        let status = resp.json::<Resp>().await.map_err(|e| ChainError::Protocol(e.to_string()))?.status;
        Ok(match status.as_str() {
            "PENDING" => GatewayTxStatus::Pending,
            "OK" => GatewayTxStatus::Ok,
            "FAIL" => GatewayTxStatus::Fail,
            _ => GatewayTxStatus::None,
        })
    }

    pub async fn get_liabilities(&self, owner: Address) -> Result<Vec<broker_types::Liability>, ChainError> {
        let resp = self
            .client
            .get(format!("{}/broker/getLiabilities/{owner}", self.base_url))
            .send()
            .await?;
        Ok(resp
            .json::<Vec<broker_types::Liability>>()
            .await
            .map_err(|e| ChainError::Protocol(e.to_string()))?)
    }

    pub async fn get_contract_balance(&self, owner: Address, asset: Address) -> Result<Decimal, ChainError> {
        self.get_decimal(&format!("/broker/getContractBalance/{owner}?asset={asset}")).await
    }

    pub async fn get_wallet_balance(&self, owner: Address, asset: Address) -> Result<Decimal, ChainError> {
        self.get_decimal(&format!("/broker/getWalletBalance/{owner}?asset={asset}")).await
    }

    /// "fast" gwei feed divided by 10, rounded up, rejected above 300.
    pub async fn fast_gas_price_gwei(&self) -> Result<u64, ChainError> {
        #[derive(Deserialize)]
        struct Resp {
            fast: u64,
        }
        let resp = self.client.get(&self.gas_station_url).send().await?;
        let fast = resp.json::<Resp>().await.map_err(|e| ChainError::Protocol(e.to_string()))?.fast;
        Ok((fast + 9) / 10)
    }

    pub async fn execute(&self, signed_tx_raw: &str) -> Result<(), ChainError> {
        self.client
            .post(format!("{}/broker/execute", self.base_url))
            .json(&serde_json::json!({ "signedTxRaw": signed_tx_raw }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ChainError::Http(e.to_string()))?;
        Ok(())
    }
}
