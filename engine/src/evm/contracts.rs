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

//! Bindings for the connector and custody contracts, limited to the events and calls the
//! client uses.

use anyhow::anyhow;
use ethers::{
	prelude::*,
	types::{Address, Log, H256},
};
use thiserror::Error;
use utilities::clean_eth_address;

abigen!(
	ZetaConnector,
	r#"[
		event ZetaSent(address sourceTxOriginAddress, address indexed zetaTxSenderAddress, uint256 indexed destinationChainId, bytes destinationAddress, uint256 zetaValueAndGas, uint256 destinationGasLimit, bytes message, bytes zetaParams)
		event ZetaReceived(bytes zetaTxSenderAddress, uint256 indexed sourceChainId, address indexed destinationAddress, uint256 zetaValue, bytes message, bytes32 indexed internalSendHash)
		event ZetaReverted(address zetaTxSenderAddress, uint256 sourceChainId, uint256 indexed destinationChainId, bytes destinationAddress, uint256 remainingZetaValue, bytes message, bytes32 indexed internalSendHash)
		function onReceive(bytes zetaTxSenderAddress, uint256 sourceChainId, address destinationAddress, uint256 zetaValue, bytes message, bytes32 internalSendHash) external
		function onRevert(address zetaTxSenderAddress, uint256 sourceChainId, bytes destinationAddress, uint256 destinationChainId, uint256 remainingZetaValue, bytes message, bytes32 internalSendHash) external
	]"#
);

abigen!(
	ERC20Custody,
	r#"[
		event Deposited(bytes recipient, address indexed asset, uint256 amount, bytes message)
		event Withdrawn(address indexed recipient, address indexed asset, uint256 amount)
		function withdraw(address recipient, address asset, uint256 amount) external
		function whitelist(address asset) external
	]"#
);

// Number of topics of each event: the signature plus one per indexed parameter.
pub const TOPICS_ZETA_SENT: usize = 3;
pub const TOPICS_ZETA_RECEIVED: usize = 4;
pub const TOPICS_ZETA_REVERTED: usize = 3;
pub const TOPICS_WITHDRAWN: usize = 3;
pub const TOPICS_DEPOSITED: usize = 2;

pub fn parse_contract_address(name: &str, address: &str) -> anyhow::Result<Address> {
	clean_eth_address(address)
		.map(Address::from)
		.map_err(|e| anyhow!("Invalid {name} contract address {address:?}: {e}"))
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LogCheckError {
	#[error("log is removed, chain reorg?")]
	Removed,
	#[error("log emitter address mismatch: want {want:?} got {got:?}")]
	EmitterMismatch { want: Address, got: Address },
	#[error("log tx hash is empty")]
	EmptyTxHash,
	#[error("log tx hash mismatch: want {want:?} got {got:?}")]
	TxHashMismatch { want: H256, got: H256 },
	#[error("number of topics mismatch: want {want} got {got}")]
	TopicCountMismatch { want: usize, got: usize },
}

/// Sanity checks an event log before trusting its content. `want_tx_hash` is only checked
/// when the expected transaction is known.
pub fn check_evm_tx_log(
	log: &Log,
	want_address: Address,
	want_tx_hash: Option<H256>,
	want_topics: usize,
) -> Result<(), LogCheckError> {
	if log.removed == Some(true) {
		return Err(LogCheckError::Removed)
	}
	if log.address != want_address {
		return Err(LogCheckError::EmitterMismatch { want: want_address, got: log.address })
	}
	let tx_hash = match log.transaction_hash {
		Some(tx_hash) if !tx_hash.is_zero() => tx_hash,
		_ => return Err(LogCheckError::EmptyTxHash),
	};
	if let Some(want) = want_tx_hash {
		if want != tx_hash {
			return Err(LogCheckError::TxHashMismatch { want, got: tx_hash })
		}
	}
	if log.topics.len() != want_topics {
		return Err(LogCheckError::TopicCountMismatch { want: want_topics, got: log.topics.len() })
	}
	Ok(())
}
