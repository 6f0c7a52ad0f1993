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

//! Interface to the coordinating chain. The transport lives outside this crate.

use anyhow::Result;
use ethers::types::U256;

#[cfg(test)]
use mockall::automock;

use crate::types::{
	Chain, CoinType, CrossChainTx, CrosschainFlags, InboundTracker, MsgVoteInbound,
	MsgVoteOutbound, Order, OutboundTracker, ReceiveStatus,
};

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ZetacoreClient: Send + Sync + 'static {
	fn zeta_chain_id(&self) -> i64;

	/// The account submitting votes, used as the `creator` of vote messages
	fn operator_address(&self) -> String;

	/// Returns the zeta tx hash and the ballot index. An empty zeta tx hash means this
	/// observer had already voted.
	async fn post_vote_inbound(
		&self,
		gas_limit: u64,
		retry_gas_limit: u64,
		msg: MsgVoteInbound,
	) -> Result<(String, String)>;

	async fn post_vote_outbound(&self, msg: MsgVoteOutbound) -> Result<(String, String)>;

	async fn post_gas_price(
		&self,
		chain: Chain,
		gas_price: u64,
		supply: String,
		block_number: u64,
	) -> Result<String>;

	async fn get_all_outbound_tracker_by_chain(
		&self,
		chain_id: i64,
		order: Order,
	) -> Result<Vec<OutboundTracker>>;

	/// Returns the zeta tx hash, empty when the tracker already lists `tx_hash`.
	async fn add_tx_hash_to_outbound_tracker(
		&self,
		chain_id: i64,
		nonce: u64,
		tx_hash: String,
		proof: Option<Vec<u8>>,
		block_hash: String,
		tx_index: i64,
	) -> Result<String>;

	async fn get_cctx_by_nonce(&self, chain_id: i64, nonce: u64) -> Result<CrossChainTx>;

	async fn get_inbound_trackers_for_chain(&self, chain_id: i64) -> Result<Vec<InboundTracker>>;

	async fn get_crosschain_flags(&self) -> Result<CrosschainFlags>;

	async fn get_block_height(&self) -> Result<i64>;
}

/// Observed outcome of an outbound transaction, as voted on by `post_vote_outbound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedOutbound {
	pub cctx_index: String,
	pub outbound_hash: String,
	pub block_height: u64,
	pub gas_used: u64,
	pub effective_gas_price: U256,
	pub effective_gas_limit: u64,
	pub amount: U256,
	pub status: ReceiveStatus,
	pub chain: Chain,
	pub nonce: u64,
	pub coin_type: CoinType,
}

impl ObservedOutbound {
	pub fn into_vote(self, creator: String) -> MsgVoteOutbound {
		MsgVoteOutbound {
			creator,
			cctx_hash: self.cctx_index,
			observed_outbound_hash: self.outbound_hash,
			observed_outbound_block_height: self.block_height,
			observed_outbound_gas_used: self.gas_used,
			observed_outbound_effective_gas_price: self.effective_gas_price,
			observed_outbound_effective_gas_limit: self.effective_gas_limit,
			value_received: self.amount,
			status: self.status,
			outbound_chain: self.chain.chain_id,
			outbound_tss_nonce: self.nonce,
			coin_type: self.coin_type,
		}
	}
}
