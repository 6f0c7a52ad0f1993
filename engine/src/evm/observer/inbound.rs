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

use std::{collections::HashSet, str::FromStr};

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ethers::{
	contract::{parse_log, EthEvent},
	types::{Address, Filter, Log, Transaction, H256},
	utils::to_checksum,
};
use tracing::{debug, error, info, warn};

use super::{EvmObserver, ObserverError};
use crate::{
	chain_observer::ChainObserver,
	compliance::print_compliance_log,
	confirmation::{confirmed_height, has_enough_confirmations},
	constants::{
		DONATION_MESSAGE, INBOUND_NATIVE_TRANSFER_GAS_LIMIT, MAX_BLOCKS_PER_PERIOD,
		POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT, POST_VOTE_INBOUND_GAS_LIMIT,
		POST_VOTE_INBOUND_MESSAGE_PASSING_EXECUTION_GAS_LIMIT,
	},
	evm::{
		contracts::{
			check_evm_tx_log, DepositedFilter, ZetaSentFilter, TOPICS_DEPOSITED, TOPICS_ZETA_SENT,
		},
		observer::{is_unsupported_tx_type_error, CachedBlock},
	},
	memo::parse_memo_receiver,
	types::{Chain, CoinType, MsgVoteInbound},
};

const NO_TRANSACTIONS_ERROR: &str = "block header indicates no transactions";

/// `[last_scanned + 1, min(last_scanned + batch_size, confirmed)]`
pub fn block_range_to_scan(confirmed: u64, last_scanned: u64, batch_size: u64) -> (u64, u64) {
	(last_scanned + 1, (last_scanned + batch_size).min(confirmed))
}

fn log_position(log: &Log) -> (u64, u64, u64) {
	(
		log.block_number.map(|n| n.as_u64()).unwrap_or_default(),
		log.transaction_index.map(|n| n.as_u64()).unwrap_or_default(),
		log.log_index.map(|n| n.as_u64()).unwrap_or_default(),
	)
}

/// Last block to report as scanned when a log in `block_number` must be processed again.
/// Never reports less than `start - 1`, even for logs without a block number.
fn retry_from(block_number: u64, start: u64) -> u64 {
	block_number.saturating_sub(1).max(start - 1)
}

fn log_tx_hash(log: &Log) -> H256 {
	log.transaction_hash.unwrap_or_default()
}

fn bytes_to_hex(bytes: &[u8]) -> String {
	format!("0x{}", hex::encode(bytes))
}

impl EvmObserver {
	pub(super) async fn observe_inbound_events(&self) -> Result<()> {
		let flags = self.zetacore.get_crosschain_flags().await?;
		self.app_context.set_crosschain_flags(flags.clone());
		if !flags.is_inbound_enabled {
			debug!(chain = %self.chain, "Inbound is disabled, skipping");
			return Ok(())
		}

		let tip = self.rpc.block_number().await?;
		let last_block = self.last_block();
		if tip < last_block {
			return Err(ObserverError::HeightRegression { last_block, tip }.into())
		}
		self.set_last_block(tip);

		let confirmation_count = self.chain_params().confirmation_count;
		let Some(confirmed) = confirmed_height(tip, confirmation_count) else {
			debug!(chain = %self.chain, "Tip {tip} is below the confirmation count {confirmation_count}");
			return Ok(())
		};
		let last_scanned = self.last_block_scanned();
		if last_scanned >= confirmed {
			debug!(chain = %self.chain, "No new confirmed block");
			return Ok(())
		}

		let (start, end) = block_range_to_scan(confirmed, last_scanned, MAX_BLOCKS_PER_PERIOD);

		let zeta_sent = self.observe_zeta_sent(start, end).await;
		let deposited = self.observe_erc20_deposited(start, end).await;
		let tss_received = self.observe_tss_received(start, end).await;

		let lowest = zeta_sent.min(deposited).min(tss_received);
		if lowest > last_scanned {
			info!(
				chain = %self.chain,
				zeta_sent, deposited, tss_received, "Scanned inbounds through block {lowest}"
			);
			self.set_last_block_scanned(lowest);
			self.persist_last_block_scanned(lowest);
		}
		Ok(())
	}

	/// Valid logs of `event` emitted by `address`, in chain order.
	async fn filter_sorted_logs<E: EthEvent>(
		&self,
		address: Address,
		want_topics: usize,
		start: u64,
		end: u64,
	) -> Result<Vec<(Log, E)>> {
		let filter = Filter::new()
			.address(address)
			.topic0(E::signature())
			.from_block(start)
			.to_block(end);
		let logs = self.rpc.get_logs(filter).await?;

		let mut events = logs
			.into_iter()
			.filter_map(|log| {
				if let Err(e) = check_evm_tx_log(&log, address, None, want_topics) {
					warn!(
						chain = %self.chain,
						tx_hash = ?log.transaction_hash,
						"Invalid {} event: {e}",
						E::name()
					);
					return None
				}
				match parse_log::<E>(log.clone()) {
					Ok(event) => Some((log, event)),
					Err(e) => {
						warn!(
							chain = %self.chain,
							tx_hash = ?log.transaction_hash,
							"Failed to decode {} event: {e}",
							E::name()
						);
						None
					},
				}
			})
			.collect::<Vec<_>>();
		events.sort_by_key(|(log, _)| log_position(log));
		Ok(events)
	}

	async fn post_inbound_vote(
		&self,
		msg: MsgVoteInbound,
		execution_gas_limit: u64,
	) -> Result<String> {
		let inbound_hash = msg.inbound_hash.clone();
		let (zeta_hash, ballot) = self
			.zetacore
			.post_vote_inbound(POST_VOTE_INBOUND_GAS_LIMIT, execution_gas_limit, msg)
			.await?;
		if !zeta_hash.is_empty() {
			info!(
				chain = %self.chain,
				tx_hash = %inbound_hash,
				%zeta_hash,
				%ballot,
				"Inbound vote posted"
			);
		}
		Ok(ballot)
	}

	/// Returns the last block fully processed.
	async fn observe_zeta_sent(&self, start: u64, end: u64) -> u64 {
		let events = match self.connector_address() {
			Ok(connector) =>
				self.filter_sorted_logs::<ZetaSentFilter>(connector, TOPICS_ZETA_SENT, start, end)
					.await,
			Err(e) => Err(e),
		};
		let events = match events {
			Ok(events) => events,
			Err(e) => {
				warn!(chain = %self.chain, "Failed to get ZetaSent events in [{start}, {end}]: {e:#}");
				return start - 1
			},
		};

		let mut processed_txs = HashSet::new();
		for (log, event) in events {
			let (block_number, _, _) = log_position(&log);
			let tx_hash = log_tx_hash(&log);
			if !processed_txs.insert(tx_hash) {
				warn!(chain = %self.chain, ?tx_hash, "More than one ZetaSent event in tx, skipping");
				continue
			}
			let Some(msg) = self.build_inbound_vote_for_zeta_sent(&log, &event) else {
				continue
			};
			if let Err(e) =
				self.post_inbound_vote(msg, POST_VOTE_INBOUND_MESSAGE_PASSING_EXECUTION_GAS_LIMIT).await
			{
				error!(chain = %self.chain, ?tx_hash, "Failed to vote on ZetaSent event: {e:#}");
				return retry_from(block_number, start)
			}
		}
		end
	}

	async fn observe_erc20_deposited(&self, start: u64, end: u64) -> u64 {
		let events = match self.custody_address() {
			Ok(custody) =>
				self.filter_sorted_logs::<DepositedFilter>(custody, TOPICS_DEPOSITED, start, end)
					.await,
			Err(e) => Err(e),
		};
		let events = match events {
			Ok(events) => events,
			Err(e) => {
				warn!(chain = %self.chain, "Failed to get Deposited events in [{start}, {end}]: {e:#}");
				return start - 1
			},
		};

		let mut processed_txs = HashSet::new();
		for (log, event) in events {
			let (block_number, tx_index, _) = log_position(&log);
			let tx_hash = log_tx_hash(&log);
			if processed_txs.contains(&tx_hash) {
				warn!(chain = %self.chain, ?tx_hash, "More than one Deposited event in tx, skipping");
				continue
			}

			let sender = match self.deposit_sender(&log, tx_hash, tx_index).await {
				Ok(sender) => sender,
				Err(e) => {
					error!(chain = %self.chain, ?tx_hash, "Failed to get deposit sender: {e:#}");
					return retry_from(block_number, start)
				},
			};
			if let Some(msg) = self.build_inbound_vote_for_deposited(&log, &event, sender) {
				if let Err(e) =
					self.post_inbound_vote(msg, POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT).await
				{
					error!(chain = %self.chain, ?tx_hash, "Failed to vote on Deposited event: {e:#}");
					return retry_from(block_number, start)
				}
			}
			processed_txs.insert(tx_hash);
		}
		end
	}

	async fn deposit_sender(&self, log: &Log, tx_hash: H256, tx_index: u64) -> Result<Address> {
		let transaction = self.rpc.transaction_by_hash(tx_hash).await?;
		let block_hash = log.block_hash.context("Log has no block hash")?;
		self.get_transaction_sender(&transaction, block_hash, tx_index).await
	}

	async fn observe_tss_received(&self, start: u64, end: u64) -> u64 {
		if !self.chain_params().is_supported {
			return start - 1
		}
		let tss_address = self.tss.evm_address();
		if tss_address.is_zero() {
			warn!(chain = %self.chain, "{}", ObserverError::TssAddressNotSet);
			return start - 1
		}

		for block_number in start..=end {
			match self.get_header_cached(block_number).await {
				Ok(header) if header.transactions.is_empty() => continue,
				Ok(_) => {},
				Err(e) => {
					error!(chain = %self.chain, "Failed to get header {block_number}: {e:#}");
					return block_number - 1
				},
			}

			let block = match self.get_block_cached(block_number).await {
				Ok(block) => block,
				Err(e) if format!("{e:#}").contains(NO_TRANSACTIONS_ERROR) => {
					debug!(chain = %self.chain, "Skipping empty block {block_number}");
					continue
				},
				Err(e) => {
					error!(chain = %self.chain, "Failed to get block {block_number}: {e:#}");
					return block_number - 1
				},
			};
			let block_hash = block.hash().unwrap_or_default();

			let processed = match &block {
				CachedBlock::Typed(block) => {
					let mut processed = true;
					for transaction in
						block.transactions.iter().filter(|tx| tx.to == Some(tss_address))
					{
						if !self.process_inbound_to_tss(transaction, block_number, block_hash).await
						{
							processed = false;
							break
						}
					}
					processed
				},
				CachedBlock::Json(block) => {
					let mut processed = true;
					for json_transaction in
						block.transactions.iter().filter(|tx| tx.to == Some(tss_address))
					{
						let transaction =
							match self.rpc.transaction_by_hash(json_transaction.hash).await {
								Ok(transaction) => transaction,
								Err(e) if is_unsupported_tx_type_error(&e) => {
									warn!(
										chain = %self.chain,
										tx_hash = ?json_transaction.hash,
										"Skipping transaction of unsupported type to TSS"
									);
									continue
								},
								Err(e) => {
									error!(
										chain = %self.chain,
										tx_hash = ?json_transaction.hash,
										"Failed to get transaction: {e:#}"
									);
									processed = false;
									break
								},
							};
						if !self.process_inbound_to_tss(&transaction, block_number, block_hash).await
						{
							processed = false;
							break
						}
					}
					processed
				},
			};
			if !processed {
				return block_number - 1
			}
		}
		end
	}

	/// Returns false if the transaction must be processed again.
	async fn process_inbound_to_tss(
		&self,
		transaction: &Transaction,
		block_number: u64,
		block_hash: H256,
	) -> bool {
		let tx_hash = transaction.hash;
		let receipt = match self.rpc.transaction_receipt(tx_hash).await {
			Ok(receipt) => receipt,
			Err(e) => {
				error!(chain = %self.chain, ?tx_hash, "Failed to get receipt: {e:#}");
				return false
			},
		};
		if receipt.status != Some(1u64.into()) {
			info!(chain = %self.chain, ?tx_hash, "Transaction to TSS failed, ignoring");
			return true
		}
		if *transaction.input == *DONATION_MESSAGE.as_bytes() {
			info!(chain = %self.chain, ?tx_hash, "Donation to TSS, ignoring");
			return true
		}
		let sender = match self
			.get_transaction_sender(transaction, block_hash, receipt.transaction_index.as_u64())
			.await
		{
			Ok(sender) => sender,
			Err(e) => {
				error!(chain = %self.chain, ?tx_hash, "Failed to get sender: {e:#}");
				return false
			},
		};

		let Some(msg) = self.build_inbound_vote_for_tss_transfer(transaction, sender, block_number)
		else {
			return true
		};
		match self.post_inbound_vote(msg, POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT).await {
			Ok(_) => true,
			Err(e) => {
				error!(chain = %self.chain, ?tx_hash, "Failed to vote on transfer to TSS: {e:#}");
				false
			},
		}
	}

	fn is_restricted_inbound(
		&self,
		tx_hash: H256,
		sender: &str,
		receiver: &str,
		addresses: &[&str],
		coin_type: CoinType,
	) -> bool {
		if self.compliance.contains_restricted_address(addresses) {
			print_compliance_log(
				false,
				self.chain.chain_id,
				&format!("{tx_hash:?}"),
				sender,
				receiver,
				&format!("{coin_type:?}"),
			);
			return true
		}
		false
	}

	pub(super) fn build_inbound_vote_for_zeta_sent(
		&self,
		log: &Log,
		event: &ZetaSentFilter,
	) -> Option<MsgVoteInbound> {
		let tx_hash = log_tx_hash(log);
		let Some(destination_chain) = u64::try_from(event.destination_chain_id)
			.ok()
			.and_then(|chain_id| i64::try_from(chain_id).ok())
			.and_then(Chain::from_chain_id)
		else {
			warn!(
				chain = %self.chain,
				?tx_hash,
				"Unsupported destination chain id {}",
				event.destination_chain_id
			);
			return None
		};

		let destination_address = bytes_to_hex(&event.destination_address);
		if !destination_chain.is_zeta_chain() {
			let Some(destination_params) =
				self.app_context.evm_chain_params(destination_chain.chain_id)
			else {
				warn!(chain = %self.chain, ?tx_hash, "No chain params for {destination_chain}");
				return None
			};
			if destination_address
				.eq_ignore_ascii_case(&destination_params.zeta_token_contract_address)
			{
				warn!(
					chain = %self.chain,
					?tx_hash,
					"Potential attack: destination address on {destination_chain} is the ZETA token contract {destination_address}"
				);
				return None
			}
		}

		let sender = to_checksum(&event.zeta_tx_sender_address, None);
		let tx_origin = to_checksum(&event.source_tx_origin_address, None);
		if self.is_restricted_inbound(
			tx_hash,
			&sender,
			&destination_address,
			&[&sender, &destination_address, &tx_origin],
			CoinType::Zeta,
		) {
			return None
		}
		if *event.message == *DONATION_MESSAGE.as_bytes() {
			info!(chain = %self.chain, ?tx_hash, "Donation, ignoring");
			return None
		}

		let (block_number, _, log_index) = log_position(log);
		info!(
			chain = %self.chain,
			?tx_hash,
			block_number,
			%sender,
			amount = %event.zeta_value_and_gas,
			"ZetaSent inbound detected"
		);
		Some(MsgVoteInbound {
			creator: self.zetacore.operator_address(),
			sender,
			sender_chain_id: self.chain.chain_id,
			tx_origin,
			receiver: destination_address,
			receiver_chain: destination_chain.chain_id,
			amount: event.zeta_value_and_gas,
			message: BASE64.encode(&event.message),
			inbound_hash: format!("{tx_hash:?}"),
			inbound_block_height: block_number,
			gas_limit: event.destination_gas_limit.low_u64(),
			coin_type: CoinType::Zeta,
			asset: String::new(),
			event_index: log_index,
		})
	}

	pub(super) fn build_inbound_vote_for_deposited(
		&self,
		log: &Log,
		event: &DepositedFilter,
		sender: Address,
	) -> Option<MsgVoteInbound> {
		let tx_hash = log_tx_hash(log);
		let sender = to_checksum(&sender, None);
		let receiver = bytes_to_hex(&event.recipient);
		let message = hex::encode(&event.message);
		let memo_receiver = parse_memo_receiver(&message);
		if self.is_restricted_inbound(
			tx_hash,
			&sender,
			&receiver,
			&[&sender, &receiver, &memo_receiver],
			CoinType::Erc20,
		) {
			return None
		}
		if *event.message == *DONATION_MESSAGE.as_bytes() {
			info!(chain = %self.chain, ?tx_hash, "Donation, ignoring");
			return None
		}

		let (block_number, _, log_index) = log_position(log);
		info!(
			chain = %self.chain,
			?tx_hash,
			block_number,
			%sender,
			amount = %event.amount,
			"ERC20 deposit detected"
		);
		Some(MsgVoteInbound {
			creator: self.zetacore.operator_address(),
			sender,
			sender_chain_id: self.chain.chain_id,
			tx_origin: String::new(),
			receiver,
			receiver_chain: self.zetacore.zeta_chain_id(),
			amount: event.amount,
			message,
			inbound_hash: format!("{tx_hash:?}"),
			inbound_block_height: block_number,
			gas_limit: POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT,
			coin_type: CoinType::Erc20,
			asset: to_checksum(&event.asset, None),
			event_index: log_index,
		})
	}

	pub(super) fn build_inbound_vote_for_tss_transfer(
		&self,
		transaction: &Transaction,
		sender: Address,
		block_number: u64,
	) -> Option<MsgVoteInbound> {
		let tx_hash = transaction.hash;
		let sender = to_checksum(&sender, None);
		let message = hex::encode(&transaction.input);
		let memo_receiver = parse_memo_receiver(&message);
		if self.is_restricted_inbound(
			tx_hash,
			&sender,
			&sender,
			&[&sender, &memo_receiver],
			CoinType::Gas,
		) {
			return None
		}
		if *transaction.input == *DONATION_MESSAGE.as_bytes() {
			info!(chain = %self.chain, ?tx_hash, "Donation, ignoring");
			return None
		}

		info!(
			chain = %self.chain,
			?tx_hash,
			block_number,
			%sender,
			amount = %transaction.value,
			"Transfer to TSS detected"
		);
		Some(MsgVoteInbound {
			creator: self.zetacore.operator_address(),
			sender: sender.clone(),
			sender_chain_id: self.chain.chain_id,
			tx_origin: sender.clone(),
			receiver: sender,
			receiver_chain: self.zetacore.zeta_chain_id(),
			amount: transaction.value,
			message,
			inbound_hash: format!("{tx_hash:?}"),
			inbound_block_height: block_number,
			gas_limit: INBOUND_NATIVE_TRANSFER_GAS_LIMIT,
			coin_type: CoinType::Gas,
			asset: String::new(),
			event_index: 0,
		})
	}

	pub(super) async fn observe_tracker_suggestions(&self) -> Result<()> {
		let trackers = self.zetacore.get_inbound_trackers_for_chain(self.chain.chain_id).await?;
		for tracker in trackers {
			info!(
				chain = %self.chain,
				tx_hash = %tracker.tx_hash,
				coin_type = ?tracker.coin_type,
				"Checking inbound tracker"
			);
			let tx_hash = H256::from_str(&tracker.tx_hash)
				.context(format!("Invalid inbound tracker hash {}", tracker.tx_hash))?;
			let ballot = match tracker.coin_type {
				CoinType::Zeta => self.check_receipt_for_coin_type_zeta(tx_hash, true).await?,
				CoinType::Erc20 => self.check_receipt_for_coin_type_erc20(tx_hash, true).await?,
				CoinType::Gas => self.check_receipt_for_coin_type_gas(tx_hash, true).await?,
				CoinType::Cmd => {
					warn!(chain = %self.chain, ?tx_hash, "Inbound tracker of type Cmd ignored");
					continue
				},
			};
			info!(
				chain = %self.chain,
				?tx_hash,
				%ballot,
				coin_type = ?tracker.coin_type,
				"Vote submitted for inbound tracker"
			);
		}
		Ok(())
	}

	fn ensure_confirmed(&self, tx_hash: H256, receipt_height: Option<u64>) -> Result<()> {
		let receipt_height = receipt_height.context(format!("Receipt of {tx_hash:?} not mined"))?;
		if !has_enough_confirmations(
			receipt_height,
			self.last_block(),
			self.chain_params().confirmation_count,
		) {
			bail!(
				"{tx_hash:?} is not confirmed yet: receipt block {receipt_height} current block {}",
				self.last_block()
			)
		}
		Ok(())
	}

	/// Returns the ballot of the ZetaSent event of `tx_hash`, voting on it if `vote`.
	pub async fn check_receipt_for_coin_type_zeta(&self, tx_hash: H256, vote: bool) -> Result<String> {
		let connector = self.connector_address()?;
		let receipt = self.rpc.transaction_receipt(tx_hash).await?;
		self.ensure_confirmed(tx_hash, receipt.block_number.map(|n| n.as_u64()))?;

		let msg = receipt
			.logs
			.iter()
			.filter_map(|log| {
				let event = parse_log::<ZetaSentFilter>(log.clone()).ok()?;
				if let Err(e) = check_evm_tx_log(log, connector, Some(tx_hash), TOPICS_ZETA_SENT) {
					error!(chain = %self.chain, ?tx_hash, "Invalid ZetaSent event: {e}");
					return None
				}
				self.build_inbound_vote_for_zeta_sent(log, &event)
			})
			.next()
			.context(format!("No ZetaSent event found in {tx_hash:?}"))?;

		let ballot = msg.digest();
		if vote {
			self.post_inbound_vote(msg, POST_VOTE_INBOUND_MESSAGE_PASSING_EXECUTION_GAS_LIMIT)
				.await?;
		}
		Ok(ballot)
	}

	pub async fn check_receipt_for_coin_type_erc20(
		&self,
		tx_hash: H256,
		vote: bool,
	) -> Result<String> {
		let custody = self.custody_address()?;
		let transaction = self.rpc.transaction_by_hash(tx_hash).await?;
		let receipt = self.rpc.transaction_receipt(tx_hash).await?;
		let block_hash = receipt.block_hash.context(format!("Receipt of {tx_hash:?} not mined"))?;
		let sender = self
			.get_transaction_sender(&transaction, block_hash, receipt.transaction_index.as_u64())
			.await?;
		self.ensure_confirmed(tx_hash, receipt.block_number.map(|n| n.as_u64()))?;

		let msg = receipt
			.logs
			.iter()
			.filter_map(|log| {
				let event = parse_log::<DepositedFilter>(log.clone()).ok()?;
				if let Err(e) = check_evm_tx_log(log, custody, Some(tx_hash), TOPICS_DEPOSITED) {
					error!(chain = %self.chain, ?tx_hash, "Invalid Deposited event: {e}");
					return None
				}
				self.build_inbound_vote_for_deposited(log, &event, sender)
			})
			.next()
			.context(format!("No Deposited event found in {tx_hash:?}"))?;

		let ballot = msg.digest();
		if vote {
			self.post_inbound_vote(msg, POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT).await?;
		}
		Ok(ballot)
	}

	pub async fn check_receipt_for_coin_type_gas(&self, tx_hash: H256, vote: bool) -> Result<String> {
		let tss_address = self.tss.evm_address();
		if tss_address.is_zero() {
			return Err(ObserverError::TssAddressNotSet.into())
		}

		let transaction = self.rpc.transaction_by_hash(tx_hash).await?;
		if transaction.block_number.is_none() {
			bail!("{tx_hash:?} is still pending")
		}
		match transaction.to {
			None => bail!("{tx_hash:?} has no recipient"),
			Some(to) if to != tss_address => bail!("{tx_hash:?} is sent to {to:?}, not the TSS"),
			Some(_) => {},
		}

		let receipt = self.rpc.transaction_receipt(tx_hash).await?;
		if receipt.status != Some(1u64.into()) {
			bail!("{tx_hash:?} failed")
		}
		let block_hash = receipt.block_hash.context(format!("Receipt of {tx_hash:?} not mined"))?;
		let sender = self
			.get_transaction_sender(&transaction, block_hash, receipt.transaction_index.as_u64())
			.await?;
		let receipt_height = receipt.block_number.map(|n| n.as_u64());
		self.ensure_confirmed(tx_hash, receipt_height)?;

		let msg = self
			.build_inbound_vote_for_tss_transfer(
				&transaction,
				sender,
				receipt_height.unwrap_or_default(),
			)
			.context(format!("No vote built for {tx_hash:?}"))?;
		let ballot = msg.digest();
		if vote {
			self.post_inbound_vote(msg, POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT).await?;
		}
		Ok(ballot)
	}
}

#[cfg(test)]
mod tests {
	use ethers::{
		abi::{self, Token},
		types::{Block, TransactionReceipt, ValueOrArray, U256, U64},
	};
	use mockall::{predicate::eq, Sequence};
	use utilities::assert_err;

	use super::{super::test_utils::*, *};
	use crate::{
		evm::rpc::{MockEvmJsonRpcApi, MockEvmRpcApi},
		types::{CrosschainFlags, InboundTracker, BSC_TESTNET, ETH_MAINNET, ZETA_PRIVNET},
		zetacore::MockZetacoreClient,
	};

	const CONNECTOR: &str = "0xD28D6A0b8189305551a0A8bd247a6ECa9CE781Ca";
	const CUSTODY: &str = "0xff3135df4F2775f4091b81f4c7B6359CfA07862a";

	fn connector() -> Address {
		Address::from_str(CONNECTOR).unwrap()
	}

	fn custody() -> Address {
		Address::from_str(CUSTODY).unwrap()
	}

	fn depositor() -> Address {
		Address::repeat_byte(0x22)
	}

	fn zetacore_with_flags(inbound_enabled: bool) -> MockZetacoreClient {
		let mut zetacore = mock_zetacore();
		zetacore.expect_get_crosschain_flags().returning(move || {
			Ok(CrosschainFlags { is_inbound_enabled: inbound_enabled, is_outbound_enabled: true })
		});
		zetacore
	}

	fn emitted_log(address: Address, block_number: u64, tx_index: u64, log_index: u64) -> Log {
		Log {
			address,
			block_hash: Some(H256::from_low_u64_be(block_number)),
			block_number: Some(U64::from(block_number)),
			transaction_hash: Some(H256::from_low_u64_be(block_number * 100 + tx_index)),
			transaction_index: Some(U64::from(tx_index)),
			log_index: Some(U256::from(log_index)),
			removed: Some(false),
			..Default::default()
		}
	}

	fn deposited_log(block_number: u64, tx_index: u64, log_index: u64) -> Log {
		Log {
			log_index: Some(U256::from(log_index)),
			..deposited_log_with(block_number, tx_index, Address::repeat_byte(0x33), &[])
		}
	}

	fn deposited_log_with(
		block_number: u64,
		tx_index: u64,
		recipient: Address,
		message: &[u8],
	) -> Log {
		Log {
			topics: vec![DepositedFilter::signature(), H256::from(Address::repeat_byte(0xa5))],
			data: abi::encode(&[
				Token::Bytes(recipient.as_bytes().to_vec()),
				Token::Uint(U256::from(1_000u64)),
				Token::Bytes(message.to_vec()),
			])
			.into(),
			..emitted_log(custody(), block_number, tx_index, 0)
		}
	}

	fn zeta_sent_event(destination_chain_id: i64, destination_address: Address) -> ZetaSentFilter {
		ZetaSentFilter {
			source_tx_origin_address: Address::repeat_byte(0x44),
			zeta_tx_sender_address: Address::repeat_byte(0x55),
			destination_chain_id: U256::from(destination_chain_id),
			destination_address: destination_address.as_bytes().to_vec().into(),
			zeta_value_and_gas: U256::from(5_000u64),
			destination_gas_limit: U256::from(250_000u64),
			message: vec![0xde, 0xad].into(),
			zeta_params: Default::default(),
		}
	}

	/// Node answering every scan with no events and empty headers, apart from what
	/// `configure` sets up first.
	fn scanning_rpc(tip: u64, configure: impl FnOnce(&mut MockEvmRpcApi)) -> MockEvmRpcApi {
		let mut rpc = MockEvmRpcApi::new();
		configure(&mut rpc);
		rpc.expect_block_number().returning(move || Ok(tip));
		rpc.expect_get_logs().returning(|_| Ok(vec![]));
		rpc.expect_header_by_number().returning(|_| Ok(Block::default()));
		rpc
	}

	#[tokio::test]
	async fn scan_stops_before_the_block_that_failed_to_vote() {
		let rpc = scanning_rpc(502, |rpc| {
			rpc.expect_get_logs()
				.withf(|filter: &Filter| filter.address == Some(ValueOrArray::Value(custody())))
				.returning(|_| Ok(vec![deposited_log(499, 0, 0)]));
			rpc.expect_transaction_by_hash()
				.returning(|hash| Ok(Transaction { hash, ..Default::default() }));
			rpc.expect_transaction_sender().returning(|_, _| Ok(depositor()));
		});
		let mut zetacore = zetacore_with_flags(true);
		zetacore
			.expect_post_vote_inbound()
			.times(1)
			.returning(|_, _, _| Err(anyhow::anyhow!("zetacore unavailable")));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), zetacore);
		observer.set_last_block_scanned(495);

		observer.observe_inbound_events().await.unwrap();

		assert_eq!(observer.last_block(), 502);
		assert_eq!(observer.last_block_scanned(), 498);
		assert_eq!(observer.db.last_block_scanned().unwrap(), Some(498));
	}

	#[tokio::test]
	async fn deposits_are_voted_in_chain_order_once_per_transaction() {
		let rpc = scanning_rpc(502, |rpc| {
			rpc.expect_get_logs()
				.withf(|filter: &Filter| filter.address == Some(ValueOrArray::Value(custody())))
				.returning(|_| {
					Ok(vec![
						deposited_log(498, 0, 0),
						deposited_log(497, 1, 4),
						deposited_log(497, 1, 3),
					])
				});
			rpc.expect_transaction_by_hash()
				.returning(|hash| Ok(Transaction { hash, ..Default::default() }));
			rpc.expect_transaction_sender().returning(|_, _| Ok(depositor()));
		});
		let mut zetacore = zetacore_with_flags(true);
		let mut seq = Sequence::new();
		for (block_number, event_index) in [(497, 3), (498, 0)] {
			zetacore
				.expect_post_vote_inbound()
				.withf(move |gas_limit, execution_gas_limit, msg| {
					*gas_limit == POST_VOTE_INBOUND_GAS_LIMIT &&
						*execution_gas_limit == POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT &&
						msg.inbound_block_height == block_number &&
						msg.event_index == event_index
				})
				.times(1)
				.in_sequence(&mut seq)
				.returning(|_, _, _| Ok(("zeta_hash".to_string(), "ballot".to_string())));
		}
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), zetacore);
		observer.set_last_block_scanned(495);

		observer.observe_inbound_events().await.unwrap();

		assert_eq!(observer.last_block_scanned(), 500);
	}

	#[tokio::test]
	async fn scan_waits_for_confirmed_blocks() {
		let (_dir, observer) =
			new_test_observer(scanning_rpc(497, |_| {}), MockEvmJsonRpcApi::new(), zetacore_with_flags(true));
		observer.set_last_block_scanned(495);

		observer.observe_inbound_events().await.unwrap();

		assert_eq!(observer.last_block(), 497);
		assert_eq!(observer.last_block_scanned(), 495);
	}

	#[tokio::test]
	async fn tip_going_backwards_is_an_error() {
		let (_dir, observer) = new_test_observer(
			scanning_rpc(502, |_| {}),
			MockEvmJsonRpcApi::new(),
			zetacore_with_flags(true),
		);
		observer.set_last_block(600);

		let error = assert_err!(observer.observe_inbound_events().await);

		assert_eq!(
			error.downcast_ref::<ObserverError>(),
			Some(&ObserverError::HeightRegression { last_block: 600, tip: 502 })
		);
		assert_eq!(observer.last_block(), 600);
	}

	#[tokio::test]
	async fn nothing_is_scanned_while_inbound_is_disabled() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), zetacore_with_flags(false));

		observer.observe_inbound_events().await.unwrap();

		assert!(!observer.app_context.crosschain_flags().is_inbound_enabled);
	}

	#[tokio::test]
	async fn transfers_to_tss_skip_donations_and_failed_transactions() {
		let tss = tss_address();
		let sender = Address::repeat_byte(0x66);
		let transfer = |index: u64, to: Address, input: &[u8]| Transaction {
			hash: H256::from_low_u64_be(0x1000 + index),
			to: Some(to),
			value: 7_000u64.into(),
			input: input.to_vec().into(),
			transaction_index: Some(U64::from(index)),
			..Default::default()
		};
		let transactions = vec![
			transfer(0, tss, DONATION_MESSAGE.as_bytes()),
			transfer(1, tss, &[]),
			transfer(2, tss, &[0xab]),
			transfer(3, Address::repeat_byte(0x77), &[]),
		];
		let header_hashes = transactions.iter().map(|tx| tx.hash).collect::<Vec<_>>();

		let rpc = scanning_rpc(499, |rpc| {
			rpc.expect_header_by_number().with(eq(Some(497))).returning(move |_| {
				Ok(Block { transactions: header_hashes.clone(), ..Default::default() })
			});
			rpc.expect_block_with_txs()
				.with(eq(497))
				.times(1)
				.returning(move |number| Ok(block_with(number, transactions.clone())));
			rpc.expect_transaction_receipt().returning(|hash| {
				let index = hash.to_low_u64_be() - 0x1000;
				Ok(TransactionReceipt {
					transaction_hash: hash,
					transaction_index: U64::from(index),
					status: Some(U64::from(if index == 1 { 0 } else { 1 })),
					..Default::default()
				})
			});
			rpc.expect_transaction_sender()
				.with(eq(H256::from_low_u64_be(497)), eq(2))
				.returning(move |_, _| Ok(sender));
		});
		let mut zetacore = zetacore_with_flags(true);
		zetacore
			.expect_post_vote_inbound()
			.withf(move |_, execution_gas_limit, msg| {
				let sender = to_checksum(&sender, None);
				*execution_gas_limit == POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT &&
					msg.coin_type == CoinType::Gas &&
					msg.gas_limit == INBOUND_NATIVE_TRANSFER_GAS_LIMIT &&
					msg.sender == sender &&
					msg.receiver == sender &&
					msg.tx_origin == sender &&
					msg.message == "ab" &&
					msg.receiver_chain == ZETA_PRIVNET.chain_id &&
					msg.inbound_hash == format!("{:?}", H256::from_low_u64_be(0x1002))
			})
			.times(1)
			.returning(|_, _, _| Ok(("zeta_hash".to_string(), "ballot".to_string())));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), zetacore);
		observer.set_last_block_scanned(496);

		observer.observe_inbound_events().await.unwrap();

		assert_eq!(observer.last_block_scanned(), 497);
	}

	#[test]
	fn zeta_sent_vote_carries_the_event() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), mock_zetacore());
		let log = emitted_log(connector(), 120, 3, 9);
		let receiver = Address::repeat_byte(0x88);

		let msg = observer
			.build_inbound_vote_for_zeta_sent(&log, &zeta_sent_event(BSC_TESTNET.chain_id, receiver))
			.unwrap();

		assert_eq!(msg.creator, OPERATOR);
		assert_eq!(msg.sender, to_checksum(&Address::repeat_byte(0x55), None));
		assert_eq!(msg.tx_origin, to_checksum(&Address::repeat_byte(0x44), None));
		assert_eq!(msg.receiver, format!("{receiver:?}"));
		assert_eq!(msg.receiver_chain, BSC_TESTNET.chain_id);
		assert_eq!(msg.amount, U256::from(5_000u64));
		assert_eq!(msg.message, "3q0=");
		assert_eq!(msg.gas_limit, 250_000);
		assert_eq!(msg.coin_type, CoinType::Zeta);
		assert_eq!(msg.asset, "");
		assert_eq!(msg.inbound_block_height, 120);
		assert_eq!(msg.event_index, 9);
		assert_eq!(msg.inbound_hash, format!("{:?}", H256::from_low_u64_be(12003)));
	}

	#[test]
	fn zeta_sent_to_an_unusable_destination_is_ignored() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), mock_zetacore());
		let log = emitted_log(connector(), 120, 0, 0);
		let receiver = Address::repeat_byte(0x88);
		let zeta_token = Address::from_str(BSC_TESTNET_ZETA_TOKEN).unwrap();

		for event in [
			zeta_sent_event(12345, receiver),
			zeta_sent_event(ETH_MAINNET.chain_id, receiver),
			zeta_sent_event(BSC_TESTNET.chain_id, zeta_token),
			ZetaSentFilter {
				zeta_tx_sender_address: Address::from_str(RESTRICTED_ADDRESS).unwrap(),
				..zeta_sent_event(BSC_TESTNET.chain_id, receiver)
			},
			ZetaSentFilter {
				message: DONATION_MESSAGE.as_bytes().to_vec().into(),
				..zeta_sent_event(BSC_TESTNET.chain_id, receiver)
			},
		] {
			assert_eq!(observer.build_inbound_vote_for_zeta_sent(&log, &event), None);
		}

		// The coordinating chain needs no chain params.
		assert!(observer
			.build_inbound_vote_for_zeta_sent(&log, &zeta_sent_event(ZETA_PRIVNET.chain_id, receiver))
			.is_some());
	}

	#[test]
	fn deposit_to_a_restricted_memo_receiver_is_ignored() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), mock_zetacore());
		let log = deposited_log(200, 0, 1);
		let mut event = parse_log::<DepositedFilter>(log.clone()).unwrap();

		let msg = observer.build_inbound_vote_for_deposited(&log, &event, depositor()).unwrap();
		assert_eq!(msg.sender, to_checksum(&depositor(), None));
		assert_eq!(msg.receiver, format!("{:?}", Address::repeat_byte(0x33)));
		assert_eq!(msg.asset, to_checksum(&Address::repeat_byte(0xa5), None));
		assert_eq!(msg.receiver_chain, ZETA_PRIVNET.chain_id);
		assert_eq!(msg.coin_type, CoinType::Erc20);
		assert_eq!(msg.gas_limit, POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT);
		assert_eq!(msg.tx_origin, "");

		let mut memo = Address::from_str(RESTRICTED_ADDRESS).unwrap().as_bytes().to_vec();
		memo.extend([1, 2, 3]);
		event.message = memo.into();
		assert_eq!(observer.build_inbound_vote_for_deposited(&log, &event, depositor()), None);
	}

	#[test]
	fn restricted_receiver_is_ignored_even_from_a_clean_sender() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), mock_zetacore());
		let restricted = Address::from_str(RESTRICTED_ADDRESS).unwrap();

		let zeta_sent_log = emitted_log(connector(), 120, 0, 0);
		assert_eq!(
			observer.build_inbound_vote_for_zeta_sent(
				&zeta_sent_log,
				&zeta_sent_event(BSC_TESTNET.chain_id, restricted)
			),
			None
		);

		let deposit_log = deposited_log_with(200, 0, restricted, &[]);
		let deposit = parse_log::<DepositedFilter>(deposit_log.clone()).unwrap();
		assert_eq!(observer.build_inbound_vote_for_deposited(&deposit_log, &deposit, depositor()), None);

		let mut memo = restricted.as_bytes().to_vec();
		memo.extend([1, 2, 3]);
		let transfer = Transaction {
			hash: H256::repeat_byte(0x98),
			to: Some(tss_address()),
			value: 7_000u64.into(),
			input: memo.into(),
			..Default::default()
		};
		assert_eq!(
			observer.build_inbound_vote_for_tss_transfer(&transfer, Address::repeat_byte(0x66), 300),
			None
		);
	}

	#[test]
	fn donated_deposit_is_ignored() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), mock_zetacore());
		let log = deposited_log_with(200, 0, Address::repeat_byte(0x33), DONATION_MESSAGE.as_bytes());
		let event = parse_log::<DepositedFilter>(log.clone()).unwrap();
		assert_eq!(event.amount, U256::from(1_000u64));

		assert_eq!(observer.build_inbound_vote_for_deposited(&log, &event, depositor()), None);
	}

	#[tokio::test]
	async fn ignored_deposits_do_not_hold_back_the_scan() {
		let rpc = scanning_rpc(502, |rpc| {
			rpc.expect_get_logs()
				.withf(|filter: &Filter| filter.address == Some(ValueOrArray::Value(custody())))
				.returning(|_| {
					Ok(vec![
						deposited_log_with(
							497,
							0,
							Address::from_str(RESTRICTED_ADDRESS).unwrap(),
							&[],
						),
						deposited_log_with(
							498,
							0,
							Address::repeat_byte(0x33),
							DONATION_MESSAGE.as_bytes(),
						),
					])
				});
			rpc.expect_transaction_by_hash()
				.returning(|hash| Ok(Transaction { hash, ..Default::default() }));
			rpc.expect_transaction_sender().returning(|_, _| Ok(depositor()));
		});
		let mut zetacore = zetacore_with_flags(true);
		zetacore.expect_post_vote_inbound().never();
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), zetacore);
		observer.set_last_block_scanned(495);

		observer.observe_inbound_events().await.unwrap();

		assert_eq!(observer.last_block_scanned(), 500);
	}

	#[tokio::test]
	async fn failed_vote_on_a_log_without_block_number_keeps_the_scan_in_place() {
		let rpc = scanning_rpc(502, |rpc| {
			rpc.expect_get_logs()
				.withf(|filter: &Filter| filter.address == Some(ValueOrArray::Value(custody())))
				.returning(|_| Ok(vec![Log { block_number: None, ..deposited_log(497, 0, 0) }]));
			rpc.expect_transaction_by_hash()
				.returning(|hash| Ok(Transaction { hash, ..Default::default() }));
			rpc.expect_transaction_sender().returning(|_, _| Ok(depositor()));
		});
		let mut zetacore = zetacore_with_flags(true);
		zetacore
			.expect_post_vote_inbound()
			.times(1)
			.returning(|_, _, _| Err(anyhow::anyhow!("zetacore unavailable")));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), zetacore);
		observer.set_last_block_scanned(495);

		observer.observe_inbound_events().await.unwrap();

		assert_eq!(observer.last_block_scanned(), 495);
	}

	fn gas_tracker_rpc(to: Address) -> MockEvmRpcApi {
		let mut rpc = MockEvmRpcApi::new();
		rpc.expect_transaction_by_hash().returning(move |hash| {
			Ok(Transaction {
				hash,
				block_number: Some(U64::from(100)),
				to: Some(to),
				value: 9_000u64.into(),
				..Default::default()
			})
		});
		rpc.expect_transaction_receipt().returning(|hash| {
			Ok(TransactionReceipt {
				transaction_hash: hash,
				block_hash: Some(H256::from_low_u64_be(100)),
				block_number: Some(U64::from(100)),
				status: Some(U64::one()),
				..Default::default()
			})
		});
		rpc.expect_transaction_sender().returning(|_, _| Ok(depositor()));
		rpc
	}

	#[tokio::test]
	async fn gas_tracker_ballot_is_computed_without_voting() {
		let (_dir, observer) =
			new_test_observer(gas_tracker_rpc(tss_address()), MockEvmJsonRpcApi::new(), mock_zetacore());
		let tx_hash = H256::repeat_byte(0x99);

		observer.set_last_block(101);
		assert_err!(observer.check_receipt_for_coin_type_gas(tx_hash, false).await);

		observer.set_last_block(102);
		let ballot = observer.check_receipt_for_coin_type_gas(tx_hash, false).await.unwrap();
		let transaction = Transaction {
			hash: tx_hash,
			value: 9_000u64.into(),
			..Default::default()
		};
		let expected = observer
			.build_inbound_vote_for_tss_transfer(&transaction, depositor(), 100)
			.unwrap()
			.digest();
		assert_eq!(ballot, expected);
	}

	#[tokio::test]
	async fn gas_tracker_not_sent_to_tss_is_rejected() {
		let (_dir, observer) = new_test_observer(
			gas_tracker_rpc(Address::repeat_byte(0x77)),
			MockEvmJsonRpcApi::new(),
			mock_zetacore(),
		);
		observer.set_last_block(200);

		assert_err!(observer.check_receipt_for_coin_type_gas(H256::repeat_byte(0x99), true).await);
	}

	#[tokio::test]
	async fn inbound_trackers_are_voted_and_commands_skipped() {
		let tx_hash = format!("{:?}", H256::repeat_byte(0x99));
		let trackers = vec![
			InboundTracker {
				chain_id: observer_chain_id(),
				tx_hash: tx_hash.clone(),
				coin_type: CoinType::Cmd,
			},
			InboundTracker { chain_id: observer_chain_id(), tx_hash, coin_type: CoinType::Gas },
		];
		let mut zetacore = mock_zetacore();
		zetacore
			.expect_get_inbound_trackers_for_chain()
			.with(eq(observer_chain_id()))
			.returning(move |_| Ok(trackers.clone()));
		zetacore
			.expect_post_vote_inbound()
			.withf(|_, _, msg| msg.coin_type == CoinType::Gas)
			.times(1)
			.returning(|_, _, _| Ok((String::new(), "ballot".to_string())));
		let (_dir, observer) =
			new_test_observer(gas_tracker_rpc(tss_address()), MockEvmJsonRpcApi::new(), zetacore);
		observer.set_last_block(200);

		observer.observe_tracker_suggestions().await.unwrap();
	}

	#[tokio::test]
	async fn invalid_tracker_hash_is_an_error() {
		let mut zetacore = mock_zetacore();
		zetacore.expect_get_inbound_trackers_for_chain().returning(|chain_id| {
			Ok(vec![InboundTracker {
				chain_id,
				tx_hash: "not a hash".to_string(),
				coin_type: CoinType::Zeta,
			}])
		});
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), zetacore);

		assert_err!(observer.observe_tracker_suggestions().await);
	}

	fn observer_chain_id() -> i64 {
		crate::types::test_utils::TEST_CHAIN.chain_id
	}

	#[test]
	fn scan_window_is_bounded_by_the_batch_size() {
		assert_eq!(block_range_to_scan(1000, 495, 100), (496, 595));
		assert_eq!(block_range_to_scan(500, 495, 100), (496, 500));
	}

	#[test]
	fn retry_never_goes_below_the_window_start() {
		assert_eq!(retry_from(499, 496), 498);
		assert_eq!(retry_from(496, 496), 495);
		assert_eq!(retry_from(0, 496), 495);
		assert_eq!(retry_from(0, 1), 0);
	}
}
