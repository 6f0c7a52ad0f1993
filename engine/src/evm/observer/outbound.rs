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

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use ethers::{
	contract::parse_log,
	types::{Address, Transaction, TransactionReceipt, H256, U256, U64},
	utils::to_checksum,
};
use tracing::{debug, error, info, warn};

use super::EvmObserver;
use crate::{
	chain_observer::ChainObserver,
	evm::contracts::{
		check_evm_tx_log, WithdrawnFilter, ZetaReceivedFilter, ZetaRevertedFilter, TOPICS_WITHDRAWN,
		TOPICS_ZETA_RECEIVED, TOPICS_ZETA_REVERTED,
	},
	types::{CoinType, CrossChainTx, Order, ReceiveStatus},
	zetacore::ObservedOutbound,
};

/// The address in the last 20 bytes of `bytes`, left padded with zeros if shorter.
pub fn bytes_to_address(bytes: &[u8]) -> Address {
	let mut address = [0u8; 20];
	let len = bytes.len().min(20);
	address[20 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
	Address::from(address)
}

fn is_successful(receipt: &TransactionReceipt) -> bool {
	receipt.status == Some(U64::one())
}

impl EvmObserver {
	pub(super) async fn observe_outbound_trackers(&self) -> Result<()> {
		if !self.app_context.crosschain_flags().is_outbound_enabled ||
			!self.chain_params().is_supported
		{
			debug!(chain = %self.chain, "Outbound observation is disabled");
			return Ok(())
		}

		let trackers = self
			.zetacore
			.get_all_outbound_tracker_by_chain(self.chain.chain_id, Order::Ascending)
			.await?;
		for tracker in trackers {
			let nonce = tracker.nonce;
			if self.is_tx_confirmed(nonce) {
				continue
			}

			let mut confirmed = Vec::new();
			for entry in &tracker.hash_list {
				let Ok(tx_hash) = H256::from_str(&entry.tx_hash) else {
					warn!(chain = %self.chain, nonce, "Invalid tracker hash {}", entry.tx_hash);
					continue
				};
				if let Some(found) = self.check_confirmed_tx(tx_hash, nonce).await {
					info!(chain = %self.chain, nonce, ?tx_hash, "Confirmed outbound");
					confirmed.push(found);
				}
			}

			match confirmed.len() {
				0 => {},
				1 => {
					let (receipt, transaction) = confirmed.remove(0);
					self.set_tx_and_receipt(nonce, receipt, transaction);
				},
				count => error!(
					chain = %self.chain,
					nonce,
					"{count} outbounds confirmed for the same nonce, can't tell which one is genuine"
				),
			}
		}
		Ok(())
	}

	/// Returns `(included, confirmed)`, voting on the outcome once the outbound is confirmed.
	pub(super) async fn check_outbound_processed(
		&self,
		cctx: &CrossChainTx,
	) -> Result<(bool, bool)> {
		let params = cctx
			.current_outbound_params()
			.context(format!("CCTX {} has no outbound params", cctx.index))?;
		let nonce = params.tss_nonce;
		let Some((receipt, transaction)) = self.get_tx_and_receipt(nonce) else {
			return Ok((false, false))
		};
		let coin_type = cctx.inbound_params.coin_type;

		let (amount, status) = if self.compliance.is_cctx_restricted(cctx) {
			let status =
				if is_successful(&receipt) { ReceiveStatus::Success } else { ReceiveStatus::Failed };
			(params.amount, status)
		} else {
			self.parse_outbound_received_value(cctx, &receipt, &transaction, coin_type)
				.context(format!(
					"Failed to parse outbound {:?} of nonce {nonce} on {}",
					receipt.transaction_hash, self.chain
				))?
		};

		let observed = ObservedOutbound {
			cctx_index: cctx.index.clone(),
			outbound_hash: format!("{:?}", receipt.transaction_hash),
			block_height: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
			gas_used: receipt.gas_used.map(|gas| gas.low_u64()).unwrap_or_default(),
			effective_gas_price: transaction.gas_price.unwrap_or_default(),
			effective_gas_limit: transaction.gas.low_u64(),
			amount,
			status,
			chain: self.chain,
			nonce,
			coin_type,
		};
		match self
			.zetacore
			.post_vote_outbound(observed.into_vote(self.zetacore.operator_address()))
			.await
		{
			Ok((zeta_hash, ballot)) if !zeta_hash.is_empty() => info!(
				chain = %self.chain,
				nonce,
				tx_hash = ?receipt.transaction_hash,
				%zeta_hash,
				%ballot,
				"Outbound vote posted"
			),
			Ok(_) => {},
			Err(e) => error!(
				chain = %self.chain,
				nonce,
				tx_hash = ?receipt.transaction_hash,
				"Failed to post outbound vote: {e:#}"
			),
		}
		Ok((true, true))
	}

	/// The value received by the outbound receiver, taken from the connector or custody event
	/// matching `cctx` when there is one.
	pub fn parse_outbound_received_value(
		&self,
		cctx: &CrossChainTx,
		receipt: &TransactionReceipt,
		transaction: &Transaction,
		coin_type: CoinType,
	) -> Result<(U256, ReceiveStatus)> {
		if !is_successful(receipt) {
			return Ok((U256::zero(), ReceiveStatus::Failed))
		}
		let value = match coin_type {
			CoinType::Zeta => self.parse_and_check_zeta_event(cctx, receipt)?,
			CoinType::Erc20 => self.parse_and_check_withdrawn_event(cctx, receipt)?,
			CoinType::Gas | CoinType::Cmd => transaction.value,
		};
		Ok((value, ReceiveStatus::Success))
	}

	fn parse_and_check_zeta_event(
		&self,
		cctx: &CrossChainTx,
		receipt: &TransactionReceipt,
	) -> Result<U256> {
		let connector = self.connector_address()?;
		let params = cctx.current_outbound_params().context("CCTX has no outbound params")?;
		let tx_hash = receipt.transaction_hash;

		for log in &receipt.logs {
			if let Ok(received) = parse_log::<ZetaReceivedFilter>(log.clone()) {
				check_evm_tx_log(log, connector, Some(tx_hash), TOPICS_ZETA_RECEIVED)
					.context("Invalid ZetaReceived event")?;
				let receiver = to_checksum(&received.destination_address, None);
				if !receiver.eq_ignore_ascii_case(&params.receiver) {
					bail!(
						"Receiver mismatch in ZetaReceived event: want {} got {receiver}",
						params.receiver
					)
				}
				if received.zeta_value != params.amount {
					bail!(
						"Amount mismatch in ZetaReceived event: want {} got {}",
						params.amount,
						received.zeta_value
					)
				}
				check_internal_send_hash(cctx, received.internal_send_hash, "ZetaReceived")?;
				return Ok(received.zeta_value)
			}

			if let Ok(reverted) = parse_log::<ZetaRevertedFilter>(log.clone()) {
				check_evm_tx_log(log, connector, Some(tx_hash), TOPICS_ZETA_REVERTED)
					.context("Invalid ZetaReverted event")?;
				let receiver = to_checksum(&bytes_to_address(&reverted.destination_address), None);
				if !receiver.eq_ignore_ascii_case(&cctx.inbound_params.sender) {
					bail!(
						"Receiver mismatch in ZetaReverted event: want {} got {receiver}",
						cctx.inbound_params.sender
					)
				}
				if reverted.remaining_zeta_value != params.amount {
					bail!(
						"Amount mismatch in ZetaReverted event: want {} got {}",
						params.amount,
						reverted.remaining_zeta_value
					)
				}
				check_internal_send_hash(cctx, reverted.internal_send_hash, "ZetaReverted")?;
				return Ok(reverted.remaining_zeta_value)
			}
		}
		Err(anyhow!("No ZetaReceived or ZetaReverted event found in {tx_hash:?}"))
	}

	fn parse_and_check_withdrawn_event(
		&self,
		cctx: &CrossChainTx,
		receipt: &TransactionReceipt,
	) -> Result<U256> {
		let custody = self.custody_address()?;
		let params = cctx.current_outbound_params().context("CCTX has no outbound params")?;
		let tx_hash = receipt.transaction_hash;

		for log in &receipt.logs {
			let Ok(withdrawn) = parse_log::<WithdrawnFilter>(log.clone()) else { continue };
			check_evm_tx_log(log, custody, Some(tx_hash), TOPICS_WITHDRAWN)
				.context("Invalid Withdrawn event")?;
			let recipient = to_checksum(&withdrawn.recipient, None);
			if !recipient.eq_ignore_ascii_case(&params.receiver) {
				bail!("Receiver mismatch in Withdrawn event: want {} got {recipient}", params.receiver)
			}
			let asset = to_checksum(&withdrawn.asset, None);
			if !asset.eq_ignore_ascii_case(&cctx.inbound_params.asset) {
				bail!(
					"Asset mismatch in Withdrawn event: want {} got {asset}",
					cctx.inbound_params.asset
				)
			}
			if withdrawn.amount != params.amount {
				bail!(
					"Amount mismatch in Withdrawn event: want {} got {}",
					params.amount,
					withdrawn.amount
				)
			}
			return Ok(withdrawn.amount)
		}
		Err(anyhow!("No Withdrawn event found in {tx_hash:?}"))
	}
}

fn check_internal_send_hash(cctx: &CrossChainTx, hash: [u8; 32], event: &str) -> Result<()> {
	let hash = format!("{:?}", H256(hash));
	if hash != cctx.index {
		bail!("CCTX index mismatch in {event} event: want {} got {hash}", cctx.index)
	}
	Ok(())
}
