//! The on-chain side of the broker: order hashing/signing, gateway reads,
//! and the six write operations that discharge liabilities. A single
//! `ChainClient` instance is shared (by `Arc`) between `broker-engine`
//! (trade signing) and `broker-reconciler` (liability planning); it is
//! reentrant and holds no per-call state beyond its initialized handles.

mod contracts;
mod error;
mod gateway;

pub use error::ChainError;
pub use gateway::{ChainGateway, GatewayTxStatus};

use std::sync::Arc;

use alloy_consensus::{SignableTransaction, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{keccak256, Address, Bytes, TxKind, U256};
use alloy_signer::Signer as _;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{eip712_domain, SolCall, SolStruct};
use broker_types::{order::EipOrder, BlockchainOrder, SubOrder, Trade, TokenRegistry, Transaction, TxMethod, TxStatus};
use rust_decimal::Decimal;

use contracts::OrionBroker;

/// `{name:"Orion Exchange", version:"1", salt:0xf2d8...}`, `chainId` filled
/// in per-instance (production=1, else=3).
fn domain(chain_id: u64) -> alloy_sol_types::Eip712Domain {
    eip712_domain! {
        name: "Orion Exchange",
        version: "1",
        chain_id: chain_id,
        salt: alloy_primitives::b256!("f2d857f4a3edcb9b78b4d503bfe733db1e3f6cdc2b7971ee739626c97e86a557"),
    }
}

const GAS_LIMIT_DEPOSIT_ETH: u64 = 70_000;
const GAS_LIMIT_DEPOSIT_ERC20: u64 = 150_000;
const GAS_LIMIT_APPROVE: u64 = 70_000;
const GAS_LIMIT_LOCK_STAKE: u64 = 70_000;
const GAS_LIMIT_RELEASE_STAKE: u64 = 100_000;
const GAS_LIMIT_WITHDRAW: u64 = 150_000;
const GAS_PRICE_CAP_GWEI: u64 = 300;

pub struct ChainClientConfig {
    pub chain_id: u64,
    pub contract_address: Address,
    pub broker_address: Address,
    pub matcher_address: Address,
    /// `ORN`'s address; the fee asset is always ORN.
    pub fee_asset: Address,
}

pub struct ChainClient {
    config: ChainClientConfig,
    gateway: ChainGateway,
    signer: PrivateKeySigner,
    tokens: Arc<TokenRegistry>,
}

impl ChainClient {
    pub fn new(
        config: ChainClientConfig,
        gateway: ChainGateway,
        signer: PrivateKeySigner,
        tokens: Arc<TokenRegistry>,
    ) -> Self {
        Self { config, gateway, signer, tokens }
    }

    pub fn broker_address(&self) -> Address {
        self.config.broker_address
    }

    /// Deterministic byte-concatenation hash, used to fill
    /// `BlockchainOrder.id`.
    pub fn hash_order(order: &BlockchainOrder) -> String {
        format!("{:#x}", keccak256(order.preimage()))
    }

    /// Builds and signs the on-chain order for a filled/canceled sub-order.
    /// Pure function of `(sub_order, trade)`: two calls with identical
    /// inputs produce byte-identical `id`/`signature`; there is no retry
    /// logic because there is nothing to retry.
    pub async fn sign_trade(&self, sub_order: &SubOrder, trade: &Trade) -> Result<BlockchainOrder, ChainError> {
        let base_asset = self.asset_address(&base_symbol(&sub_order.symbol))?;
        let quote_asset = self.asset_address(&quote_symbol(&sub_order.symbol))?;

        let scale = Decimal::from(broker_types::order::BASE_UNIT_SCALE);
        let amount = (trade.amount * scale).round().to_string().parse::<u64>().unwrap_or(0);
        let price = (trade.price * scale).round().to_string().parse::<u64>().unwrap_or(0);

        let mut order = BlockchainOrder {
            id: String::new(),
            sender: self.signer.address(),
            matcher: self.config.matcher_address,
            base_asset,
            quote_asset,
            matcher_fee_asset: self.config.fee_asset,
            amount,
            price,
            // Matcher fee is zero in the current protocol, but the field
            // still occupies its 8 bytes.
            matcher_fee: 0,
            nonce: sub_order.id as u64,
            expiration: (sub_order.timestamp + broker_types::order::DEFAULT_EXPIRATION_MS) as u64,
            buy_side: sub_order.side.buy_side_byte(),
            signature: String::new(),
        };
        order.id = Self::hash_order(&order);

        let eip_order: EipOrder = order.as_eip712();
        let digest = eip_order.eip712_signing_hash(&domain(self.config.chain_id));
        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| ChainError::Protocol(e.to_string()))?;
        order.signature = format!("0x{}", hex::encode(signature.as_bytes()));

        Ok(order)
    }

    /// EIP-191 personal-message signature used to authenticate the broker
    /// to the hub on `connect`.
    pub async fn sign_personal_message(&self, payload: &str) -> Result<String, ChainError> {
        let signature = self
            .signer
            .sign_message(payload.as_bytes())
            .await
            .map_err(|e| ChainError::Protocol(e.to_string()))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// Native ETH has no token contract; the gateway represents it with the
    /// zero address, the same convention the contract itself uses for
    /// `depositETH`'s implicit asset.
    fn asset_address(&self, symbol: &str) -> Result<Address, ChainError> {
        if symbol.eq_ignore_ascii_case("ETH") {
            return Ok(Address::ZERO);
        }
        self.tokens
            .address_of(symbol)
            .ok_or_else(|| ChainError::UnknownAsset(symbol.to_string()))
    }

    pub async fn get_allowance(&self, asset: &str) -> Result<Decimal, ChainError> {
        let addr = self.asset_address(asset)?;
        self.gateway.get_allowance(self.config.broker_address, addr).await
    }

    pub async fn get_nonce(&self) -> Result<Option<u64>, ChainError> {
        self.gateway.get_nonce(self.config.broker_address).await
    }

    pub async fn get_stake(&self) -> Result<Decimal, ChainError> {
        self.gateway.get_stake(self.config.broker_address).await
    }

    pub async fn get_transaction_status(&self, hash: &str) -> Result<GatewayTxStatus, ChainError> {
        self.gateway.get_transaction_status(hash).await
    }

    pub async fn get_liabilities(&self) -> Result<Vec<broker_types::Liability>, ChainError> {
        self.gateway.get_liabilities(self.config.broker_address).await
    }

    pub async fn get_contract_balance(&self, asset: &str) -> Result<Decimal, ChainError> {
        let addr = self.asset_address(asset)?;
        self.gateway.get_contract_balance(self.config.broker_address, addr).await
    }

    pub async fn get_wallet_balance(&self, asset: &str) -> Result<Decimal, ChainError> {
        let addr = self.asset_address(asset)?;
        self.gateway.get_wallet_balance(self.config.broker_address, addr).await
    }

    pub async fn deposit_eth(&self, amount: Decimal) -> Result<Transaction, ChainError> {
        let call = OrionBroker::depositETHCall {};
        self.write(TxMethod::DepositEth, "ETH", amount, call.abi_encode(), to_wei(amount))
            .await
    }

    pub async fn deposit_erc20(&self, amount: Decimal, asset: &str) -> Result<Transaction, ChainError> {
        let addr = self.asset_address(asset)?;
        let call = OrionBroker::depositERC20Call { asset: addr, amount: decimal_to_u256(amount) };
        self.write(TxMethod::DepositErc20, asset, amount, call.abi_encode(), U256::ZERO)
            .await
    }

    pub async fn withdraw(&self, amount: Decimal, asset: &str) -> Result<Transaction, ChainError> {
        let addr = self.asset_address(asset)?;
        let call = OrionBroker::withdrawCall { asset: addr, amount: decimal_to_u256(amount) };
        self.write(TxMethod::Withdraw, asset, amount, call.abi_encode(), U256::ZERO)
            .await
    }

    pub async fn approve_erc20(&self, amount: Decimal, asset: &str) -> Result<Transaction, ChainError> {
        let addr = self.asset_address(asset)?;
        let call = OrionBroker::approveCall { asset: addr, amount: decimal_to_u256(amount) };
        self.write(TxMethod::ApproveErc20, asset, amount, call.abi_encode(), U256::ZERO)
            .await
    }

    pub async fn lock_stake(&self, amount: Decimal) -> Result<Transaction, ChainError> {
        let call = OrionBroker::lockStakeCall { amount: decimal_to_u256(amount) };
        self.write(TxMethod::LockStake, "ORN", amount, call.abi_encode(), U256::ZERO)
            .await
    }

    pub async fn release_stake(&self) -> Result<Transaction, ChainError> {
        let call = OrionBroker::releaseStakeCall {};
        self.write(TxMethod::ReleaseStake, "ORN", Decimal::ZERO, call.abi_encode(), U256::ZERO)
            .await
    }

    /// `populate -> fill(chainId, from, nonce, gasPrice, gasLimit) -> sign
    /// -> broadcast`. Every write op funnels through here so the gas cap /
    /// nonce-availability checks live in exactly one place.
    async fn write(
        &self,
        method: TxMethod,
        asset: &str,
        amount: Decimal,
        data: Vec<u8>,
        value: U256,
    ) -> Result<Transaction, ChainError> {
        let gwei = self.gateway.fast_gas_price_gwei().await?;
        if gwei > GAS_PRICE_CAP_GWEI {
            return Err(ChainError::GasPriceTooHigh { gwei });
        }
        let nonce = self
            .gateway
            .get_nonce(self.config.broker_address)
            .await?
            .ok_or_else(|| ChainError::NonceUnavailable(self.config.broker_address.to_string()))?;

        let gas_limit = match method {
            TxMethod::DepositEth => GAS_LIMIT_DEPOSIT_ETH,
            TxMethod::DepositErc20 => GAS_LIMIT_DEPOSIT_ERC20,
            TxMethod::ApproveErc20 => GAS_LIMIT_APPROVE,
            TxMethod::LockStake => GAS_LIMIT_LOCK_STAKE,
            TxMethod::ReleaseStake => GAS_LIMIT_RELEASE_STAKE,
            TxMethod::Withdraw => GAS_LIMIT_WITHDRAW,
        };

        let tx = TxLegacy {
            chain_id: Some(self.config.chain_id),
            nonce,
            gas_price: (gwei as u128) * 1_000_000_000,
            gas_limit,
            to: TxKind::Call(self.config.contract_address),
            value,
            input: Bytes::from(data),
        };

        let signature_hash = tx.signature_hash();
        let signature = self
            .signer
            .sign_hash(&signature_hash)
            .await
            .map_err(|e| ChainError::Protocol(e.to_string()))?;
        let signed = tx.into_signed(signature);

        let mut raw = Vec::new();
        signed.encode_2718(&mut raw);
        let hash = format!("{:#x}", signed.hash());

        self.gateway.execute(&hex::encode(&raw)).await?;

        Ok(Transaction {
            transaction_hash: hash,
            method,
            asset: asset.to_string(),
            amount,
            create_time: now_ms(),
            status: TxStatus::Pending,
        })
    }
}

fn decimal_to_u256(amount: Decimal) -> U256 {
    let scaled = (amount * Decimal::from(broker_types::order::BASE_UNIT_SCALE)).round();
    U256::from(scaled.to_string().parse::<u128>().unwrap_or(0))
}

fn to_wei(amount: Decimal) -> U256 {
    let scaled = (amount * Decimal::new(1_000_000_000_000_000_000, 0)).round();
    U256::from(scaled.to_string().parse::<u128>().unwrap_or(0))
}

fn base_symbol(symbol: &str) -> String {
    symbol.split('-').next().unwrap_or(symbol).to_string()
}

fn quote_symbol(symbol: &str) -> String {
    symbol.split('-').nth(1).unwrap_or(symbol).to_string()
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_split() {
        assert_eq!(base_symbol("BTC-USDT"), "BTC");
        assert_eq!(quote_symbol("BTC-USDT"), "USDT");
    }
}
