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

use std::{
	future::Future,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use anyhow::{anyhow, Context, Result};
use ethers::{
	prelude::*,
	types::{transaction::eip2718::TypedTransaction, Address},
};
use tracing::{debug, warn};

use super::rpc::{
	EvmJsonRpcApi, EvmJsonRpcClient, EvmRpcApi, EvmRpcClient, JsonBlock, UndecodableResponse,
};

/// Ordered list of interchangeable clients. Calls go to the head, and a failing head is
/// rotated to the back. The head is shared by all callers.
pub struct ClientRotation<C> {
	clients: Vec<C>,
	head: AtomicUsize,
}

impl<C: Clone> ClientRotation<C> {
	pub fn new(clients: Vec<C>) -> Result<Self> {
		if clients.is_empty() {
			return Err(anyhow!("At least one client is required"))
		}
		Ok(Self { clients, head: AtomicUsize::new(0) })
	}

	fn head(&self) -> (usize, C) {
		let index = self.head.load(Ordering::SeqCst) % self.clients.len();
		(index, self.clients[index].clone())
	}

	/// Concurrent failures of the same head only rotate once.
	fn rotate_from(&self, failed_index: usize) {
		let _ = self.head.compare_exchange(
			failed_index,
			(failed_index + 1) % self.clients.len(),
			Ordering::SeqCst,
			Ordering::SeqCst,
		);
	}

	/// Tries each client at most once, starting from the head, and returns the last error
	/// if all of them fail. An undecodable response ends the call at once.
	pub async fn call<T, F, Fut>(&self, method: &'static str, call: F) -> Result<T>
	where
		F: Fn(C) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut last_error = None;
		for _ in 0..self.clients.len() {
			let (index, client) = self.head();
			match call(client).await {
				Ok(value) => return Ok(value),
				Err(error) if error.downcast_ref::<UndecodableResponse>().is_some() => {
					warn!(method, endpoint_index = index, "{error:#}");
					self.rotate_from(index);
					return Err(error.context(format!("{method} failed")))
				},
				Err(error) => {
					debug!(method, endpoint_index = index, "Rpc call failed: {error:#}");
					self.rotate_from(index);
					last_error = Some(error);
				},
			}
		}
		Err(last_error
			.unwrap_or_else(|| anyhow!("No client available"))
			.context(format!("{method} failed on all {} endpoints", self.clients.len())))
	}
}

/// Rpc client backed by redundant endpoints, with a typed and a raw JSON rotation.
pub struct EvmClientFallback {
	rpc: ClientRotation<Arc<dyn EvmRpcApi>>,
	json_rpc: ClientRotation<Arc<dyn EvmJsonRpcApi>>,
}

impl EvmClientFallback {
	pub fn new(
		rpc_clients: Vec<Arc<dyn EvmRpcApi>>,
		json_rpc_clients: Vec<Arc<dyn EvmJsonRpcApi>>,
	) -> Result<Self> {
		Ok(Self {
			rpc: ClientRotation::new(rpc_clients)?,
			json_rpc: ClientRotation::new(json_rpc_clients)?,
		})
	}

	pub fn from_endpoints(endpoints: &[String]) -> Result<Self> {
		let mut rpc_clients: Vec<Arc<dyn EvmRpcApi>> = Vec::with_capacity(endpoints.len());
		let mut json_rpc_clients: Vec<Arc<dyn EvmJsonRpcApi>> =
			Vec::with_capacity(endpoints.len());
		for endpoint in endpoints {
			rpc_clients.push(Arc::new(EvmRpcClient::new(endpoint)?));
			json_rpc_clients.push(Arc::new(EvmJsonRpcClient::new(endpoint)?));
		}
		Self::new(rpc_clients, json_rpc_clients).context("No endpoints configured")
	}
}

#[async_trait::async_trait]
impl EvmRpcApi for EvmClientFallback {
	async fn block_number(&self) -> Result<u64> {
		self.rpc.call("block_number", |client| async move { client.block_number().await }).await
	}

	async fn header_by_number(&self, block_number: Option<u64>) -> Result<Block<H256>> {
		self.rpc
			.call("header_by_number", move |client| async move {
				client.header_by_number(block_number).await
			})
			.await
	}

	async fn block_with_txs(&self, block_number: u64) -> Result<Block<Transaction>> {
		self.rpc
			.call("block_with_txs", move |client| async move {
				client.block_with_txs(block_number).await
			})
			.await
	}

	async fn transaction_by_hash(&self, tx_hash: H256) -> Result<Transaction> {
		self.rpc
			.call("transaction_by_hash", move |client| async move {
				client.transaction_by_hash(tx_hash).await
			})
			.await
	}

	async fn transaction_receipt(&self, tx_hash: H256) -> Result<TransactionReceipt> {
		self.rpc
			.call("transaction_receipt", move |client| async move {
				client.transaction_receipt(tx_hash).await
			})
			.await
	}

	async fn transaction_sender(&self, block_hash: H256, index: u64) -> Result<Address> {
		self.rpc
			.call("transaction_sender", move |client| async move {
				client.transaction_sender(block_hash, index).await
			})
			.await
	}

	async fn estimate_gas(&self, tx: TypedTransaction) -> Result<U256> {
		self.rpc
			.call("estimate_gas", |client| {
				let tx = tx.clone();
				async move { client.estimate_gas(tx).await }
			})
			.await
	}

	async fn get_logs(&self, filter: Filter) -> Result<Vec<Log>> {
		self.rpc
			.call("get_logs", |client| {
				let filter = filter.clone();
				async move { client.get_logs(filter).await }
			})
			.await
	}

	async fn suggest_gas_price(&self) -> Result<U256> {
		self.rpc
			.call("suggest_gas_price", |client| async move { client.suggest_gas_price().await })
			.await
	}

	async fn chain_id(&self) -> Result<U256> {
		self.rpc.call("chain_id", |client| async move { client.chain_id().await }).await
	}

	async fn send_raw_transaction(&self, raw_tx: Bytes) -> Result<H256> {
		self.rpc
			.call("send_raw_transaction", |client| {
				let raw_tx = raw_tx.clone();
				async move { client.send_raw_transaction(raw_tx).await }
			})
			.await
	}
}

#[async_trait::async_trait]
impl EvmJsonRpcApi for EvmClientFallback {
	async fn block_by_number(&self, block_number: u64) -> Result<JsonBlock> {
		self.json_rpc
			.call("block_by_number", move |client| async move {
				client.block_by_number(block_number).await
			})
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::{
		super::rpc::{MockEvmJsonRpcApi, MockEvmRpcApi},
		*,
	};

	fn fallback(rpc_clients: Vec<MockEvmRpcApi>) -> EvmClientFallback {
		EvmClientFallback::new(
			rpc_clients
				.into_iter()
				.map(|client| Arc::new(client) as Arc<dyn EvmRpcApi>)
				.collect(),
			vec![Arc::new(MockEvmJsonRpcApi::new()) as Arc<dyn EvmJsonRpcApi>],
		)
		.unwrap()
	}

	#[tokio::test]
	async fn failed_endpoint_is_rotated_for_later_calls() {
		let mut first = MockEvmRpcApi::new();
		first.expect_block_number().times(1).returning(|| Err(anyhow!("first is down")));
		let mut second = MockEvmRpcApi::new();
		second.expect_block_number().times(1).returning(|| Ok(100));
		second.expect_chain_id().times(1).returning(|| Ok(U256::from(1337)));

		let client = fallback(vec![first, second]);

		assert_eq!(client.block_number().await.unwrap(), 100);
		// The first endpoint is not retried: the second one stays at the head.
		assert_eq!(client.chain_id().await.unwrap(), U256::from(1337));
	}

	#[tokio::test]
	async fn last_error_is_returned_when_all_endpoints_fail() {
		let mut first = MockEvmRpcApi::new();
		first.expect_suggest_gas_price().times(1).returning(|| Err(anyhow!("first is down")));
		let mut second = MockEvmRpcApi::new();
		second.expect_suggest_gas_price().times(1).returning(|| Err(anyhow!("second is down")));

		let error = fallback(vec![first, second]).suggest_gas_price().await.unwrap_err();

		assert!(format!("{error:#}").contains("second is down"));
	}

	#[tokio::test]
	async fn rotation_wraps_around() {
		let mut first = MockEvmRpcApi::new();
		first.expect_block_number().times(1).returning(|| Ok(7));
		let mut second = MockEvmRpcApi::new();
		second.expect_block_number().times(1).returning(|| Err(anyhow!("second is down")));

		let client = fallback(vec![first, second]);
		client.rpc.rotate_from(0);

		assert_eq!(client.block_number().await.unwrap(), 7);
	}

	#[tokio::test]
	async fn json_rotation_is_independent() {
		let mut json_client = MockEvmJsonRpcApi::new();
		json_client.expect_block_by_number().times(1).returning(|number| {
			Ok(JsonBlock { hash: H256::repeat_byte(1), number: number.into(), transactions: vec![] })
		});
		let mut rpc_client = MockEvmRpcApi::new();
		rpc_client.expect_block_number().never();

		let client = EvmClientFallback::new(
			vec![Arc::new(rpc_client) as Arc<dyn EvmRpcApi>],
			vec![Arc::new(json_client) as Arc<dyn EvmJsonRpcApi>],
		)
		.unwrap();

		assert_eq!(client.block_by_number(12).await.unwrap().number, U64::from(12));
	}

	#[tokio::test]
	async fn undecodable_response_is_not_retried_on_other_endpoints() {
		let undecodable = UndecodableResponse {
			endpoint: "http://bad-node:8545".to_string(),
			method: "eth_getBlockByNumber",
			reason: "block 12: expected value at line 1 column 1".to_string(),
		};
		let mut bad_client = MockEvmJsonRpcApi::new();
		let error = undecodable.clone();
		bad_client.expect_block_by_number().times(1).returning(move |_| Err(error.clone().into()));
		let mut good_client = MockEvmJsonRpcApi::new();
		good_client.expect_block_by_number().never();

		let client = EvmClientFallback::new(
			vec![Arc::new(MockEvmRpcApi::new()) as Arc<dyn EvmRpcApi>],
			vec![
				Arc::new(bad_client) as Arc<dyn EvmJsonRpcApi>,
				Arc::new(good_client) as Arc<dyn EvmJsonRpcApi>,
			],
		)
		.unwrap();

		let error = client.block_by_number(12).await.unwrap_err();

		assert_eq!(error.downcast_ref::<UndecodableResponse>(), Some(&undecodable));
		assert!(format!("{error:#}").contains("http://bad-node:8545"));
	}

	#[test]
	fn empty_rotation_is_rejected() {
		assert!(ClientRotation::<Arc<dyn EvmRpcApi>>::new(vec![]).is_err());
	}
}
