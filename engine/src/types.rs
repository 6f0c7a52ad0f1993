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

//! Types shared with the coordinating chain: chains, chain params, CCTXs, trackers and
//! vote messages.

use ethers::{types::U256, utils::keccak256};
use serde::{Deserialize, Serialize};

use crate::constants::GWEI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chain {
	pub chain_id: i64,
	pub chain_name: &'static str,
}

pub const ETH_MAINNET: Chain = Chain { chain_id: 1, chain_name: "eth_mainnet" };
pub const BSC_MAINNET: Chain = Chain { chain_id: 56, chain_name: "bsc_mainnet" };
pub const POLYGON_MAINNET: Chain = Chain { chain_id: 137, chain_name: "polygon_mainnet" };
pub const GOERLI_TESTNET: Chain = Chain { chain_id: 5, chain_name: "goerli_testnet" };
pub const SEPOLIA_TESTNET: Chain = Chain { chain_id: 11155111, chain_name: "sepolia_testnet" };
pub const BSC_TESTNET: Chain = Chain { chain_id: 97, chain_name: "bsc_testnet" };
pub const MUMBAI_TESTNET: Chain = Chain { chain_id: 80001, chain_name: "mumbai_testnet" };
pub const AMOY_TESTNET: Chain = Chain { chain_id: 80002, chain_name: "amoy_testnet" };
pub const GOERLI_LOCALNET: Chain = Chain { chain_id: 1337, chain_name: "goerli_localnet" };
pub const ZETA_MAINNET: Chain = Chain { chain_id: 7000, chain_name: "zeta_mainnet" };
pub const ZETA_TESTNET: Chain = Chain { chain_id: 7001, chain_name: "zeta_testnet" };
pub const ZETA_MOCKNET: Chain = Chain { chain_id: 70000, chain_name: "zeta_mocknet" };
pub const ZETA_PRIVNET: Chain = Chain { chain_id: 101, chain_name: "zeta_privnet" };
pub const BTC_MAINNET: Chain = Chain { chain_id: 8332, chain_name: "btc_mainnet" };
pub const BTC_TESTNET: Chain = Chain { chain_id: 18332, chain_name: "btc_testnet" };
pub const BTC_REGTEST: Chain = Chain { chain_id: 18444, chain_name: "btc_regtest" };

const KNOWN_CHAINS: [Chain; 16] = [
	ETH_MAINNET,
	BSC_MAINNET,
	POLYGON_MAINNET,
	GOERLI_TESTNET,
	SEPOLIA_TESTNET,
	BSC_TESTNET,
	MUMBAI_TESTNET,
	AMOY_TESTNET,
	GOERLI_LOCALNET,
	ZETA_MAINNET,
	ZETA_TESTNET,
	ZETA_MOCKNET,
	ZETA_PRIVNET,
	BTC_MAINNET,
	BTC_TESTNET,
	BTC_REGTEST,
];

impl Chain {
	pub fn from_chain_id(chain_id: i64) -> Option<Chain> {
		KNOWN_CHAINS.into_iter().find(|chain| chain.chain_id == chain_id)
	}

	pub fn from_chain_name(chain_name: &str) -> Option<Chain> {
		KNOWN_CHAINS.into_iter().find(|chain| chain.chain_name == chain_name)
	}

	pub fn is_zeta_chain(&self) -> bool {
		[ZETA_MAINNET, ZETA_TESTNET, ZETA_MOCKNET, ZETA_PRIVNET].contains(self)
	}

	/// Chains of the Ethereum family price gas in whole gwei.
	pub fn is_ethereum_chain(&self) -> bool {
		[ETH_MAINNET, GOERLI_TESTNET, SEPOLIA_TESTNET, GOERLI_LOCALNET].contains(self)
	}

	pub fn is_evm_chain(&self) -> bool {
		!self.is_zeta_chain() && ![BTC_MAINNET, BTC_TESTNET, BTC_REGTEST].contains(self)
	}
}

impl std::fmt::Display for Chain {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}({})", self.chain_name, self.chain_id)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoinType {
	Zeta,
	Gas,
	#[serde(rename = "ERC20")]
	Erc20,
	Cmd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CctxStatus {
	PendingInbound,
	PendingOutbound,
	OutboundMined,
	PendingRevert,
	Reverted,
	Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiveStatus {
	Created,
	Success,
	Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
	Ascending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosschainFlags {
	pub is_inbound_enabled: bool,
	pub is_outbound_enabled: bool,
}

/// Per-chain parameters, owned by the coordinating chain and refreshed at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
	pub chain_id: i64,
	pub confirmation_count: u64,
	/// Interval of the gas price loop, in seconds
	pub gas_price_ticker: u64,
	/// Interval of the inbound loop, in seconds
	pub inbound_ticker: u64,
	/// Interval of the outbound loop, in seconds
	pub outbound_ticker: u64,
	pub zeta_token_contract_address: String,
	pub connector_contract_address: String,
	pub erc20_custody_contract_address: String,
	pub is_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHashEntry {
	pub tx_hash: String,
	pub tx_signer: String,
	pub proved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTracker {
	pub index: String,
	pub chain_id: i64,
	pub nonce: u64,
	pub hash_list: Vec<TxHashEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTracker {
	pub chain_id: i64,
	pub tx_hash: String,
	pub coin_type: CoinType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundParams {
	pub sender: String,
	pub sender_chain_id: i64,
	pub tx_origin: String,
	pub coin_type: CoinType,
	pub asset: String,
	pub amount: U256,
	pub observed_hash: String,
	pub observed_external_height: u64,
	pub finalized_zeta_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundParams {
	pub receiver: String,
	pub receiver_chain_id: i64,
	pub coin_type: CoinType,
	pub amount: U256,
	pub tss_nonce: u64,
	pub gas_limit: u64,
	/// Decimal string, as set by the coordinating chain
	pub gas_price: String,
	pub hash: String,
	pub observed_external_height: u64,
	pub tss_pubkey: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainTx {
	/// 0x-prefixed 32 byte hex, used as the send hash of outbound calls
	pub index: String,
	pub relayed_message: String,
	pub cctx_status: CctxStatus,
	pub inbound_params: InboundParams,
	pub outbound_params: Vec<OutboundParams>,
}

impl CrossChainTx {
	/// The outbound currently being processed: the revert outbound once one was added.
	pub fn current_outbound_params(&self) -> Option<&OutboundParams> {
		self.outbound_params.last()
	}

	pub fn original_outbound_params(&self) -> Option<&OutboundParams> {
		self.outbound_params.first()
	}

	pub fn is_pending(&self) -> bool {
		matches!(self.cctx_status, CctxStatus::PendingOutbound | CctxStatus::PendingRevert)
	}
}

fn ballot_digest<T: Serialize>(msg: &T) -> String {
	let bytes = serde_json::to_vec(msg).expect("Serialization is not expected to fail");
	format!("0x{}", hex::encode(keccak256(bytes)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgVoteInbound {
	pub creator: String,
	pub sender: String,
	pub sender_chain_id: i64,
	pub tx_origin: String,
	pub receiver: String,
	pub receiver_chain: i64,
	pub amount: U256,
	pub message: String,
	pub inbound_hash: String,
	pub inbound_block_height: u64,
	pub gas_limit: u64,
	pub coin_type: CoinType,
	pub asset: String,
	pub event_index: u64,
}

impl MsgVoteInbound {
	/// Ballot identifier. Every observer voting on the same event must produce the same
	/// digest, so the submitter is not part of it.
	pub fn digest(&self) -> String {
		ballot_digest(&MsgVoteInbound { creator: String::new(), ..self.clone() })
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgVoteOutbound {
	pub creator: String,
	pub cctx_hash: String,
	pub observed_outbound_hash: String,
	pub observed_outbound_block_height: u64,
	pub observed_outbound_gas_used: u64,
	pub observed_outbound_effective_gas_price: U256,
	pub observed_outbound_effective_gas_limit: u64,
	pub value_received: U256,
	pub status: ReceiveStatus,
	pub outbound_chain: i64,
	pub outbound_tss_nonce: u64,
	pub coin_type: CoinType,
}

/// Rounds a wei amount up to the next whole gwei.
pub fn round_up_to_gwei(wei: U256) -> U256 {
	let gwei = U256::from(GWEI);
	let remainder = wei % gwei;
	if remainder.is_zero() {
		wei
	} else {
		wei - remainder + gwei
	}
}


#[cfg(test)]
mod tests {
	use super::{test_utils::*, *};

	#[test]
	fn digest_does_not_depend_on_the_submitter() {
		let vote = test_inbound_vote();
		let other_observer = MsgVoteInbound { creator: "zeta1another".to_string(), ..vote.clone() };

		assert_eq!(vote.digest(), other_observer.digest());
	}

	#[test]
	fn digest_depends_on_the_observed_event() {
		let vote = test_inbound_vote();
		let other_event = MsgVoteInbound { event_index: 1, ..vote.clone() };

		assert_ne!(vote.digest(), other_event.digest());
		assert!(vote.digest().starts_with("0x"));
	}

	#[test]
	fn chain_lookup() {
		assert_eq!(Chain::from_chain_id(1337), Some(GOERLI_LOCALNET));
		assert_eq!(Chain::from_chain_name("bsc_testnet"), Some(BSC_TESTNET));
		assert_eq!(Chain::from_chain_id(424242), None);

		assert!(SEPOLIA_TESTNET.is_ethereum_chain());
		assert!(!BSC_TESTNET.is_ethereum_chain());
		assert!(BSC_TESTNET.is_evm_chain());
		assert!(ZETA_PRIVNET.is_zeta_chain());
		assert!(!ZETA_PRIVNET.is_evm_chain());
		assert!(!BTC_REGTEST.is_evm_chain());
	}

	#[test]
	fn gwei_rounding() {
		assert_eq!(round_up_to_gwei(U256::from(GWEI)), U256::from(GWEI));
		assert_eq!(round_up_to_gwei(U256::from(GWEI + 1)), U256::from(2 * GWEI));
		assert_eq!(round_up_to_gwei(U256::from(1u64)), U256::from(GWEI));
		assert_eq!(round_up_to_gwei(U256::zero()), U256::zero());
	}
}
