// Copyright 2025 Chainflip Labs GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{anyhow, bail, Context, Result};
use ethers::{
	prelude::*,
	types::{transaction::eip2718::TypedTransaction, Address},
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::{constants::EVM_HTTP_REQUEST_TIMEOUT, types::Chain};

#[derive(Clone)]
pub struct EvmRpcClient {
	provider: Provider<Http>,
	endpoint: String,
}

fn http_client() -> Result<Client> {
	Ok(Client::builder().timeout(EVM_HTTP_REQUEST_TIMEOUT).build()?)
}

impl EvmRpcClient {
	pub fn new(endpoint: &str) -> Result<Self> {
		let url = url::Url::parse(endpoint).context(format!("Invalid endpoint: {endpoint}"))?;
		Ok(Self {
			provider: Provider::new(Http::new_with_client(url, http_client()?)),
			endpoint: endpoint.to_string(),
		})
	}

	/// Fails unless the node serves `chain`.
	pub async fn check_chain_id(&self, chain: Chain) -> Result<()> {
		let chain_id = self.chain_id().await?;
		if chain_id != U256::from(chain.chain_id) {
			bail!(
				"Endpoint {} serves chain id {chain_id}, expected {} for {chain}",
				self.endpoint,
				chain.chain_id
			)
		}
		Ok(())
	}
}

/// Typed access to an EVM node.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait EvmRpcApi: Send + Sync + 'static {
	async fn block_number(&self) -> Result<u64>;

	/// The latest header if `block_number` is `None`
	async fn header_by_number(&self, block_number: Option<u64>) -> Result<Block<H256>>;

	async fn block_with_txs(&self, block_number: u64) -> Result<Block<Transaction>>;

	/// Fails if the node doesn't know the transaction. Pending transactions have no
	/// `block_number`.
	async fn transaction_by_hash(&self, tx_hash: H256) -> Result<Transaction>;

	/// Fails if there is no receipt yet.
	async fn transaction_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt>;

	/// Sender of the transaction at `index` in the block, as reported by the node.
	async fn transaction_sender(&self, block_hash: H256, index: u64) -> Result<Address>;

	async fn estimate_gas(&self, tx: TypedTransaction) -> Result<U256>;

	async fn get_logs(&self, filter: Filter) -> Result<Vec<Log>>;

	async fn suggest_gas_price(&self) -> Result<U256>;

	async fn chain_id(&self) -> Result<U256>;

	async fn send_raw_transaction(&self, raw_tx: Bytes) -> Result<H256>;
}

#[async_trait::async_trait]
impl EvmRpcApi for EvmRpcClient {
	async fn block_number(&self) -> Result<u64> {
		Ok(self.provider.get_block_number().await?.as_u64())
	}

	async fn header_by_number(&self, block_number: Option<u64>) -> Result<Block<H256>> {
		let block_id: BlockId = match block_number {
			Some(block_number) => BlockNumber::Number(block_number.into()).into(),
			None => BlockNumber::Latest.into(),
		};
		self.provider
			.get_block(block_id)
			.await?
			.ok_or_else(|| anyhow!("Getting header for block {block_id:?} returned None"))
	}

	async fn block_with_txs(&self, block_number: u64) -> Result<Block<Transaction>> {
		self.provider.get_block_with_txs(U64::from(block_number)).await?.ok_or_else(|| {
			anyhow!("Getting block with txs for block number {block_number} returned None")
		})
	}

	async fn transaction_by_hash(&self, tx_hash: H256) -> Result<Transaction> {
		self.provider
			.get_transaction(tx_hash)
			.await?
			.ok_or_else(|| anyhow!("Transaction {tx_hash:?} not found"))
	}

	async fn transaction_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt> {
		self.provider
			.get_transaction_receipt(tx_hash)
			.await?
			.ok_or_else(|| anyhow!("Receipt for transaction {tx_hash:?} not found"))
	}

	async fn transaction_sender(&self, block_hash: H256, index: u64) -> Result<Address> {
		self.provider
			.get_transaction_by_block_and_index(block_hash, index.into())
			.await?
			.map(|tx| tx.from)
			.ok_or_else(|| anyhow!("No transaction at index {index} of block {block_hash:?}"))
	}

	async fn estimate_gas(&self, tx: TypedTransaction) -> Result<U256> {
		Ok(self.provider.estimate_gas(&tx, None).await?)
	}

	async fn get_logs(&self, filter: Filter) -> Result<Vec<Log>> {
		Ok(self.provider.get_logs(&filter).await?)
	}

	async fn suggest_gas_price(&self) -> Result<U256> {
		Ok(self.provider.get_gas_price().await?)
	}

	async fn chain_id(&self) -> Result<U256> {
		Ok(self.provider.get_chainid().await?)
	}

	async fn send_raw_transaction(&self, raw_tx: Bytes) -> Result<H256> {
		Ok(self.provider.send_raw_transaction(raw_tx).await?.tx_hash())
	}
}

/// Transaction as returned by the minimal JSON-RPC client. Only the fields every
/// transaction type carries are decoded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTransaction {
	pub hash: H256,
	pub from: Address,
	pub to: Option<Address>,
	pub input: Bytes,
	pub value: U256,
	pub nonce: U256,
	pub transaction_index: Option<U64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonBlock {
	pub hash: H256,
	pub number: U64,
	#[serde(default)]
	pub transactions: Vec<JsonTransaction>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
	code: i64,
	message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
	result: Option<T>,
	error: Option<JsonRpcError>,
}

/// The endpoint answered, but not with a valid JSON-RPC response. Asking another endpoint
/// for the same data is not expected to help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{endpoint} returned an undecodable {method} response: {reason}")]
pub struct UndecodableResponse {
	pub endpoint: String,
	pub method: &'static str,
	pub reason: String,
}

// Some providers serve block bodies the typed client can't decode (e.g. new tx types), so
// blocks are also available as plain JSON.
#[derive(Clone)]
pub struct EvmJsonRpcClient {
	http_client: Client,
	endpoint: String,
}

impl EvmJsonRpcClient {
	pub fn new(endpoint: &str) -> Result<Self> {
		Ok(Self { http_client: http_client()?, endpoint: endpoint.to_string() })
	}
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait EvmJsonRpcApi: Send + Sync + 'static {
	async fn block_by_number(&self, block_number: u64) -> Result<JsonBlock>;
}

#[async_trait::async_trait]
impl EvmJsonRpcApi for EvmJsonRpcClient {
	async fn block_by_number(&self, block_number: u64) -> Result<JsonBlock> {
		let body = self
			.http_client
			.post(&self.endpoint)
			.json(&json!({
				"jsonrpc": "2.0",
				"id": 1,
				"method": "eth_getBlockByNumber",
				"params": [format!("{block_number:#x}"), true],
			}))
			.send()
			.await
			.context(format!("Failed to request block {block_number}"))?
			.bytes()
			.await
			.context(format!("Failed to read block {block_number}"))?;
		let response = serde_json::from_slice::<JsonRpcResponse<JsonBlock>>(&body).map_err(|e| {
			UndecodableResponse {
				endpoint: self.endpoint.clone(),
				method: "eth_getBlockByNumber",
				reason: format!("block {block_number}: {e}"),
			}
		})?;

		if let Some(error) = response.error {
			bail!("eth_getBlockByNumber failed with code {}: {}", error.code, error.message)
		}
		response.result.ok_or_else(|| anyhow!("Block {block_number} not found"))
	}
}
