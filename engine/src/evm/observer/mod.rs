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

//! Observer of one EVM chain: scans inbound events, confirms outbounds signed by the TSS
//! and reports gas prices.

mod gas_price;
mod inbound;
mod outbound;
mod rpc_status;

use std::{
	collections::HashMap,
	num::NonZeroUsize,
	path::Path,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex, RwLock,
	},
};

use anyhow::{anyhow, Context, Result};
use ethers::{
	types::{Address, Block, Transaction, TransactionReceipt, H256, U256},
	utils::to_checksum,
};
use lru::LruCache;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use rpc_status::check_rpc_status;

use super::{
	contracts::parse_contract_address,
	rpc::{EvmJsonRpcApi, EvmRpcApi, JsonBlock},
};
use crate::{
	chain_observer::ChainObserver,
	compliance::RestrictedAddressBook,
	confirmation::has_enough_confirmations,
	constants::{
		BLOCK_CACHE_SIZE, CHECK_CONFIRMED_TX_TIMEOUT, HEADER_CACHE_SIZE, SCAN_FROM_ENV_SUFFIX,
		SCAN_FROM_LATEST,
	},
	context::AppContext,
	db::ChainDb,
	tss::TssSigner,
	types::{Chain, ChainParams, CrossChainTx},
	zetacore::ZetacoreClient,
};

// Error messages of nodes and decoders for blocks the typed client cannot represent.
const UNSUPPORTED_TX_TYPE_ERRORS: [&str; 3] =
	["transaction type not supported", "unknown variant", "data did not match any variant"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ObserverError {
	#[error("block number should not decrease: last {last_block} current {tip}")]
	HeightRegression { last_block: u64, tip: u64 },
	#[error("transaction index {index} out of range [0, {len}) in block {block_number}")]
	TxIndexOutOfRange { index: u64, len: usize, block_number: u64 },
	#[error("transaction at index {index} of block {block_number} is {got:?}, want {want:?}")]
	TxHashMismatch { index: u64, block_number: u64, want: H256, got: H256 },
	#[error("TSS address not set")]
	TssAddressNotSet,
}

impl ObserverError {
	pub fn is_fatal(&self) -> bool {
		matches!(self, ObserverError::HeightRegression { .. })
	}
}

/// A block as decoded by the typed client, or by the JSON client when the typed one can't.
#[derive(Debug, Clone)]
pub enum CachedBlock {
	Typed(Arc<Block<Transaction>>),
	Json(Arc<JsonBlock>),
}

impl CachedBlock {
	pub fn hash(&self) -> Option<H256> {
		match self {
			CachedBlock::Typed(block) => block.hash,
			CachedBlock::Json(block) => Some(block.hash),
		}
	}

	pub fn transaction_count(&self) -> usize {
		match self {
			CachedBlock::Typed(block) => block.transactions.len(),
			CachedBlock::Json(block) => block.transactions.len(),
		}
	}

	pub fn transaction_hash_at(&self, index: usize) -> Option<H256> {
		match self {
			CachedBlock::Typed(block) => block.transactions.get(index).map(|tx| tx.hash),
			CachedBlock::Json(block) => block.transactions.get(index).map(|tx| tx.hash),
		}
	}
}

/// Where inbound scanning starts when the `{chain_name}_SCAN_FROM` variable is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFrom {
	Latest,
	Height(u64),
}

pub fn parse_scan_from(value: &str) -> Result<ScanFrom> {
	if value == SCAN_FROM_LATEST {
		return Ok(ScanFrom::Latest)
	}
	value
		.parse::<u64>()
		.map(ScanFrom::Height)
		.context(format!("Invalid scan start height: {value}"))
}

#[derive(Default)]
struct OutboundState {
	pending_transactions: HashMap<String, Transaction>,
	confirmed_receipts: HashMap<String, TransactionReceipt>,
	confirmed_transactions: HashMap<String, Transaction>,
}

pub struct EvmObserverClients {
	pub zetacore: Arc<dyn ZetacoreClient>,
	pub tss: Arc<dyn TssSigner>,
	pub rpc: Arc<dyn EvmRpcApi>,
	pub json_rpc: Arc<dyn EvmJsonRpcApi>,
}

pub struct EvmObserver {
	chain: Chain,
	zetacore: Arc<dyn ZetacoreClient>,
	tss: Arc<dyn TssSigner>,
	rpc: Arc<dyn EvmRpcApi>,
	json_rpc: Arc<dyn EvmJsonRpcApi>,
	app_context: Arc<AppContext>,
	compliance: Arc<RestrictedAddressBook>,
	db: ChainDb,
	chain_params: RwLock<ChainParams>,
	// External chain tip
	last_block: AtomicU64,
	last_block_scanned: AtomicU64,
	block_cache: Mutex<LruCache<u64, CachedBlock>>,
	header_cache: Mutex<LruCache<u64, Arc<Block<H256>>>>,
	outbound_state: Mutex<OutboundState>,
	cancellation_token: CancellationToken,
}

impl EvmObserver {
	/// Opens the chain database and restores the scan position and the confirmed outbounds.
	pub async fn new(
		chain: Chain,
		chain_params: ChainParams,
		clients: EvmObserverClients,
		app_context: Arc<AppContext>,
		compliance: Arc<RestrictedAddressBook>,
		db_path: &Path,
	) -> Result<Self> {
		let db = ChainDb::open_for_chain(db_path, chain)
			.context(format!("Failed to open the database of {chain}"))?;
		let observer = Self::with_db(chain, chain_params, clients, app_context, compliance, db);

		observer.build_last_block().await?;
		observer.build_receipts_map()?;
		observer.build_transactions_map()?;

		info!(
			chain = %chain,
			last_block_scanned = observer.last_block_scanned(),
			"Observer initialized"
		);
		Ok(observer)
	}

	fn with_db(
		chain: Chain,
		chain_params: ChainParams,
		clients: EvmObserverClients,
		app_context: Arc<AppContext>,
		compliance: Arc<RestrictedAddressBook>,
		db: ChainDb,
	) -> Self {
		Self {
			chain,
			zetacore: clients.zetacore,
			tss: clients.tss,
			rpc: clients.rpc,
			json_rpc: clients.json_rpc,
			app_context,
			compliance,
			db,
			chain_params: RwLock::new(chain_params),
			last_block: AtomicU64::new(0),
			last_block_scanned: AtomicU64::new(0),
			block_cache: Mutex::new(LruCache::new(
				NonZeroUsize::new(BLOCK_CACHE_SIZE).expect("Cache size is non-zero"),
			)),
			header_cache: Mutex::new(LruCache::new(
				NonZeroUsize::new(HEADER_CACHE_SIZE).expect("Cache size is non-zero"),
			)),
			outbound_state: Mutex::new(OutboundState::default()),
			cancellation_token: CancellationToken::new(),
		}
	}

	pub fn last_block(&self) -> u64 {
		self.last_block.load(Ordering::SeqCst)
	}

	pub fn set_last_block(&self, height: u64) {
		self.last_block.store(height, Ordering::SeqCst);
	}

	pub fn last_block_scanned(&self) -> u64 {
		self.last_block_scanned.load(Ordering::SeqCst)
	}

	pub fn set_last_block_scanned(&self, height: u64) {
		self.last_block_scanned.store(height, Ordering::SeqCst);
	}

	fn persist_last_block_scanned(&self, height: u64) {
		if let Err(e) = self.db.set_last_block_scanned(height) {
			error!(chain = %self.chain, "Failed to persist last scanned block {height}: {e:#}");
		}
	}

	async fn latest_height(&self) -> Result<u64> {
		let header = self.rpc.header_by_number(None).await?;
		header
			.number
			.map(|number| number.as_u64())
			.ok_or_else(|| anyhow!("Latest header of {} has no number", self.chain))
	}

	async fn build_last_block(&self) -> Result<()> {
		let env_var = format!("{}{SCAN_FROM_ENV_SUFFIX}", self.chain.chain_name);
		let scan_from = match std::env::var(&env_var) {
			Ok(value) if !value.is_empty() => {
				info!(chain = %self.chain, "{env_var} is set, scanning from {value}");
				Some(parse_scan_from(&value)?)
			},
			_ => None,
		};
		self.restore_last_block_scanned(scan_from).await
	}

	async fn restore_last_block_scanned(&self, scan_from: Option<ScanFrom>) -> Result<()> {
		let height = match scan_from {
			Some(ScanFrom::Latest) => self.latest_height().await?,
			Some(ScanFrom::Height(height)) => height,
			None => match self.db.last_block_scanned()? {
				Some(height) => height,
				None => {
					info!(chain = %self.chain, "No scan position stored, starting from the tip");
					let height = self.latest_height().await?;
					self.persist_last_block_scanned(height);
					height
				},
			},
		};
		self.set_last_block_scanned(height);
		Ok(())
	}

	fn build_receipts_map(&self) -> Result<()> {
		let receipts = self.db.load_receipts()?;
		self.outbound_state
			.lock()
			.expect("Should be able to get lock")
			.confirmed_receipts
			.extend(receipts);
		Ok(())
	}

	fn build_transactions_map(&self) -> Result<()> {
		let transactions = self.db.load_transactions()?;
		self.outbound_state
			.lock()
			.expect("Should be able to get lock")
			.confirmed_transactions
			.extend(transactions);
		Ok(())
	}

	/// `"{chain_id}-{tss_address}-{nonce}"`, the key of outbound state in memory and on disk
	pub fn get_tx_id(&self, nonce: u64) -> String {
		format!("{}-{}-{}", self.chain.chain_id, to_checksum(&self.tss.evm_address(), None), nonce)
	}

	pub fn connector_address(&self) -> Result<Address> {
		parse_contract_address("connector", &self.chain_params().connector_contract_address)
	}

	pub fn custody_address(&self) -> Result<Address> {
		parse_contract_address("ERC20 custody", &self.chain_params().erc20_custody_contract_address)
	}

	pub fn set_pending_tx(&self, nonce: u64, transaction: Transaction) {
		let tx_id = self.get_tx_id(nonce);
		self.outbound_state
			.lock()
			.expect("Should be able to get lock")
			.pending_transactions
			.insert(tx_id, transaction);
	}

	pub fn get_pending_tx(&self, nonce: u64) -> Option<Transaction> {
		let tx_id = self.get_tx_id(nonce);
		self.outbound_state
			.lock()
			.expect("Should be able to get lock")
			.pending_transactions
			.get(&tx_id)
			.cloned()
	}

	/// Records the confirmed outbound of `nonce`, replacing its pending transaction if any.
	pub fn set_tx_and_receipt(
		&self,
		nonce: u64,
		receipt: TransactionReceipt,
		transaction: Transaction,
	) {
		let tx_id = self.get_tx_id(nonce);
		{
			let mut state = self.outbound_state.lock().expect("Should be able to get lock");
			state.pending_transactions.remove(&tx_id);
			state.confirmed_receipts.insert(tx_id.clone(), receipt.clone());
			state.confirmed_transactions.insert(tx_id.clone(), transaction.clone());
		}
		if let Err(e) = self.db.put_confirmed_outbound(&tx_id, &receipt, &transaction) {
			error!(chain = %self.chain, nonce, "Failed to persist confirmed outbound {tx_id}: {e:#}");
		}
	}

	pub fn get_tx_and_receipt(&self, nonce: u64) -> Option<(TransactionReceipt, Transaction)> {
		let tx_id = self.get_tx_id(nonce);
		let state = self.outbound_state.lock().expect("Should be able to get lock");
		Some((
			state.confirmed_receipts.get(&tx_id)?.clone(),
			state.confirmed_transactions.get(&tx_id)?.clone(),
		))
	}

	pub fn is_tx_confirmed(&self, nonce: u64) -> bool {
		let tx_id = self.get_tx_id(nonce);
		let state = self.outbound_state.lock().expect("Should be able to get lock");
		state.confirmed_receipts.contains_key(&tx_id) &&
			state.confirmed_transactions.contains_key(&tx_id)
	}

	pub async fn get_header_cached(&self, block_number: u64) -> Result<Arc<Block<H256>>> {
		let cached =
			self.header_cache.lock().expect("Should be able to get lock").get(&block_number).cloned();
		if let Some(header) = cached {
			return Ok(header)
		}
		let header = Arc::new(self.rpc.header_by_number(Some(block_number)).await?);
		self.header_cache
			.lock()
			.expect("Should be able to get lock")
			.put(block_number, header.clone());
		Ok(header)
	}

	/// Falls back on the JSON client for blocks carrying transactions the typed client can't
	/// decode.
	pub async fn get_block_cached(&self, block_number: u64) -> Result<CachedBlock> {
		let cached =
			self.block_cache.lock().expect("Should be able to get lock").get(&block_number).cloned();
		if let Some(block) = cached {
			return Ok(block)
		}

		let block = match self.rpc.block_with_txs(block_number).await {
			Ok(block) => CachedBlock::Typed(Arc::new(block)),
			Err(e) if is_unsupported_tx_type_error(&e) => {
				debug!(chain = %self.chain, "Fetching block {block_number} as JSON: {e:#}");
				CachedBlock::Json(Arc::new(
					self.json_rpc
						.block_by_number(block_number)
						.await
						.context(format!("Fallback fetch of block {block_number} failed"))?,
				))
			},
			Err(e) => return Err(e),
		};
		self.block_cache
			.lock()
			.expect("Should be able to get lock")
			.put(block_number, block.clone());
		Ok(block)
	}

	pub fn remove_cached_block(&self, block_number: u64) {
		self.block_cache.lock().expect("Should be able to get lock").pop(&block_number);
	}

	/// The sender as reported by the node, or recovered from the signature if the node fails.
	pub async fn get_transaction_sender(
		&self,
		transaction: &Transaction,
		block_hash: H256,
		tx_index: u64,
	) -> Result<Address> {
		match self.rpc.transaction_sender(block_hash, tx_index).await {
			Ok(sender) => Ok(sender),
			Err(e) => {
				debug!(
					chain = %self.chain,
					tx_hash = ?transaction.hash,
					"Recovering sender locally: {e:#}"
				);
				transaction.recover_from().context(format!(
					"Can't recover the sender of {:?} on {}",
					transaction.hash, self.chain
				))
			},
		}
	}

	/// Succeeds only if `transaction` is the one at `tx_index` in block `block_number`. A
	/// block that disagrees with the receipt is evicted from the cache.
	pub async fn check_tx_inclusion(
		&self,
		transaction: &Transaction,
		block_number: u64,
		tx_index: u64,
	) -> Result<()> {
		let block = self.get_block_cached(block_number).await?;
		let len = block.transaction_count();
		let got = block.transaction_hash_at(tx_index as usize).ok_or(
			ObserverError::TxIndexOutOfRange { index: tx_index, len, block_number },
		)?;
		if got != transaction.hash {
			self.remove_cached_block(block_number);
			return Err(ObserverError::TxHashMismatch {
				index: tx_index,
				block_number,
				want: transaction.hash,
				got,
			}
			.into())
		}
		Ok(())
	}

	/// Returns the receipt and transaction of `tx_hash` if it is a confirmed outbound of the TSS
	/// with `nonce`. A pending candidate is remembered for the signer.
	pub async fn check_confirmed_tx(
		&self,
		tx_hash: H256,
		nonce: u64,
	) -> Option<(TransactionReceipt, Transaction)> {
		let transaction =
			match tokio::time::timeout(CHECK_CONFIRMED_TX_TIMEOUT, self.rpc.transaction_by_hash(tx_hash))
				.await
			{
				Ok(Ok(transaction)) => transaction,
				Ok(Err(e)) => {
					error!(chain = %self.chain, nonce, ?tx_hash, "Failed to get transaction: {e:#}");
					return None
				},
				Err(_) => {
					error!(chain = %self.chain, nonce, ?tx_hash, "Timed out getting transaction");
					return None
				},
			};

		let from = match transaction.recover_from() {
			Ok(from) => from,
			Err(e) => {
				error!(chain = %self.chain, nonce, ?tx_hash, "Local sender recovery failed: {e}");
				return None
			},
		};
		if from != self.tss.evm_address() {
			error!(
				chain = %self.chain,
				nonce,
				?tx_hash,
				"Sender {from:?} is not the TSS address {:?}",
				self.tss.evm_address()
			);
			return None
		}
		if transaction.nonce != U256::from(nonce) {
			error!(chain = %self.chain, nonce, ?tx_hash, "Nonce mismatch, got {}", transaction.nonce);
			return None
		}

		if transaction.block_number.is_none() {
			self.set_pending_tx(nonce, transaction);
			return None
		}

		let receipt = match tokio::time::timeout(
			CHECK_CONFIRMED_TX_TIMEOUT,
			self.rpc.transaction_receipt(tx_hash),
		)
		.await
		{
			Ok(Ok(receipt)) => receipt,
			Ok(Err(e)) => {
				warn!(chain = %self.chain, nonce, ?tx_hash, "Failed to get receipt: {e:#}");
				return None
			},
			Err(_) => {
				warn!(chain = %self.chain, nonce, ?tx_hash, "Timed out getting receipt");
				return None
			},
		};
		let Some(receipt_height) = receipt.block_number.map(|number| number.as_u64()) else {
			error!(chain = %self.chain, nonce, ?tx_hash, "Receipt has no block number");
			return None
		};

		if !has_enough_confirmations(
			receipt_height,
			self.last_block(),
			self.chain_params().confirmation_count,
		) {
			debug!(
				chain = %self.chain,
				nonce,
				?tx_hash,
				"Included in block {receipt_height} but not confirmed at {}",
				self.last_block()
			);
			return None
		}

		if let Err(e) = self
			.check_tx_inclusion(&transaction, receipt_height, receipt.transaction_index.as_u64())
			.await
		{
			error!(chain = %self.chain, nonce, ?tx_hash, "Inclusion check failed: {e:#}");
			return None
		}

		Some((receipt, transaction))
	}
}

fn is_unsupported_tx_type_error(error: &anyhow::Error) -> bool {
	let message = format!("{error:#}");
	UNSUPPORTED_TX_TYPE_ERRORS.iter().any(|pattern| message.contains(pattern))
}

#[async_trait::async_trait]
impl ChainObserver for EvmObserver {
	fn chain(&self) -> Chain {
		self.chain
	}

	fn chain_params(&self) -> ChainParams {
		self.chain_params.read().expect("Should be able to get lock").clone()
	}

	fn set_chain_params(&self, chain_params: ChainParams) {
		*self.chain_params.write().expect("Should be able to get lock") = chain_params;
	}

	fn cancellation_token(&self) -> &CancellationToken {
		&self.cancellation_token
	}

	async fn observe_inbound(&self) -> Result<()> {
		self.observe_inbound_events().await
	}

	async fn observe_inbound_trackers(&self) -> Result<()> {
		self.observe_tracker_suggestions().await
	}

	async fn observe_outbound(&self) -> Result<()> {
		self.observe_outbound_trackers().await
	}

	async fn post_gas_price(&self) -> Result<()> {
		self.post_current_gas_price().await
	}

	async fn check_rpc_status(&self) -> Result<()> {
		check_rpc_status(self.chain, &*self.rpc).await
	}

	async fn is_outbound_processed(&self, cctx: &CrossChainTx) -> Result<(bool, bool)> {
		self.check_outbound_processed(cctx).await
	}
}

#[cfg(test)]
pub(crate) mod test_utils {
	use ethers::{
		types::{
			transaction::eip2718::TypedTransaction, Signature, TransactionRequest, U64,
		},
		utils::keccak256,
	};
	use tempfile::TempDir;
	use utilities::testing::new_temp_directory_with_nonexistent_file;

	use super::*;
	use crate::{
		constants::GWEI,
		evm::rpc::{MockEvmJsonRpcApi, MockEvmRpcApi},
		tss::test_utils::LocalTss,
		types::{
			test_utils::{test_chain_params, TEST_CHAIN},
			ChainParams, CrosschainFlags, BSC_TESTNET, ZETA_PRIVNET,
		},
		zetacore::MockZetacoreClient,
	};

	pub const TSS_SEED: u8 = 0x42;
	pub const OPERATOR: &str = "zeta1observer";
	pub const RESTRICTED_ADDRESS: &str = "0x8a81Ba8eCF2c418CAe624be726F505332DF119C6";
	pub const BSC_TESTNET_ZETA_TOKEN: &str = "0x0000c9ec4042283e8139c74f4c64bcd1e0b9b54f";

	/// A coordinating chain client answering the identity queries every observer makes.
	pub fn mock_zetacore() -> MockZetacoreClient {
		let mut zetacore = MockZetacoreClient::new();
		zetacore.expect_zeta_chain_id().return_const(ZETA_PRIVNET.chain_id);
		zetacore.expect_operator_address().return_const(OPERATOR.to_string());
		zetacore
	}

	pub fn test_app_context() -> Arc<AppContext> {
		Arc::new(AppContext::new(
			[
				test_chain_params(),
				ChainParams {
					chain_id: BSC_TESTNET.chain_id,
					zeta_token_contract_address: BSC_TESTNET_ZETA_TOKEN.to_string(),
					is_supported: true,
					..Default::default()
				},
			],
			CrosschainFlags { is_inbound_enabled: true, is_outbound_enabled: true },
		))
	}

	pub fn new_test_observer(
		rpc: MockEvmRpcApi,
		json_rpc: MockEvmJsonRpcApi,
		zetacore: MockZetacoreClient,
	) -> (TempDir, EvmObserver) {
		let (dir, db_path) = new_temp_directory_with_nonexistent_file();
		let db = ChainDb::open_for_chain(&db_path, TEST_CHAIN).unwrap();
		let observer = EvmObserver::with_db(
			TEST_CHAIN,
			test_chain_params(),
			EvmObserverClients {
				zetacore: Arc::new(zetacore),
				tss: Arc::new(LocalTss::new(TSS_SEED)),
				rpc: Arc::new(rpc),
				json_rpc: Arc::new(json_rpc),
			},
			test_app_context(),
			Arc::new(RestrictedAddressBook::new([RESTRICTED_ADDRESS])),
			db,
		);
		(dir, observer)
	}

	pub fn tss_address() -> Address {
		LocalTss::new(TSS_SEED).evm_address()
	}

	/// A legacy transfer signed by the test TSS, pending unless `block_number` is given.
	pub fn tss_signed_transaction(nonce: u64, block_number: Option<u64>) -> Transaction {
		signed_transaction(&LocalTss::new(TSS_SEED), nonce, block_number)
	}

	pub fn signed_transaction(
		signer: &LocalTss,
		nonce: u64,
		block_number: Option<u64>,
	) -> Transaction {
		let chain_id = TEST_CHAIN.chain_id as u64;
		let to = Address::repeat_byte(0x11);
		let request = TransactionRequest::new()
			.to(to)
			.value(1_000u64)
			.gas(21_000u64)
			.gas_price(GWEI)
			.nonce(nonce)
			.data(vec![])
			.chain_id(chain_id);
		let typed: TypedTransaction = request.into();

		let signature = signer.sign_digest(typed.sighash().0);
		let signature = Signature {
			r: U256::from_big_endian(&signature[..32]),
			s: U256::from_big_endian(&signature[32..64]),
			v: signature[64] as u64 + chain_id * 2 + 35,
		};

		Transaction {
			hash: H256(keccak256(typed.rlp_signed(&signature))),
			nonce: nonce.into(),
			block_number: block_number.map(U64::from),
			transaction_index: block_number.map(|_| U64::zero()),
			from: signer.evm_address(),
			to: Some(to),
			value: 1_000u64.into(),
			gas_price: Some(GWEI.into()),
			gas: 21_000u64.into(),
			input: Default::default(),
			v: signature.v.into(),
			r: signature.r,
			s: signature.s,
			chain_id: Some(chain_id.into()),
			..Default::default()
		}
	}

	pub fn block_with(number: u64, transactions: Vec<Transaction>) -> Block<Transaction> {
		Block {
			hash: Some(H256::from_low_u64_be(number)),
			number: Some(U64::from(number)),
			transactions,
			..Default::default()
		}
	}

	pub fn receipt_for(transaction: &Transaction, block_number: u64) -> TransactionReceipt {
		TransactionReceipt {
			transaction_hash: transaction.hash,
			transaction_index: U64::zero(),
			block_hash: Some(H256::from_low_u64_be(block_number)),
			block_number: Some(U64::from(block_number)),
			status: Some(U64::one()),
			gas_used: Some(21_000u64.into()),
			..Default::default()
		}
	}
}

#[cfg(test)]
mod tests {
	use ethers::types::U64;
	use mockall::predicate::eq;
	use utilities::assert_err;

	use super::{test_utils::*, *};
	use crate::evm::rpc::{JsonTransaction, MockEvmJsonRpcApi, MockEvmRpcApi};

	#[test]
	fn scan_from_values() {
		assert_eq!(parse_scan_from("latest").unwrap(), ScanFrom::Latest);
		assert_eq!(parse_scan_from("1234").unwrap(), ScanFrom::Height(1234));
		assert_err!(parse_scan_from("-1"));
		assert_err!(parse_scan_from("LATEST"));
	}

	#[tokio::test]
	async fn last_block_scanned_starts_at_the_tip_and_is_persisted() {
		let mut rpc = MockEvmRpcApi::new();
		rpc.expect_header_by_number()
			.with(eq(None))
			.times(1)
			.returning(|_| Ok(Block { number: Some(U64::from(500)), ..Default::default() }));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), mock_zetacore());

		observer.restore_last_block_scanned(None).await.unwrap();
		assert_eq!(observer.last_block_scanned(), 500);
		assert_eq!(observer.db.last_block_scanned().unwrap(), Some(500));

		// The stored height is now used without asking the node.
		observer.set_last_block_scanned(0);
		observer.restore_last_block_scanned(None).await.unwrap();
		assert_eq!(observer.last_block_scanned(), 500);
	}

	#[tokio::test]
	async fn scan_from_override_is_not_persisted() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), mock_zetacore());
		observer.db.set_last_block_scanned(100).unwrap();

		observer.restore_last_block_scanned(Some(ScanFrom::Height(42))).await.unwrap();

		assert_eq!(observer.last_block_scanned(), 42);
		assert_eq!(observer.db.last_block_scanned().unwrap(), Some(100));
	}

	#[tokio::test]
	async fn confirmed_outbound_replaces_pending_and_is_reloaded() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), mock_zetacore());
		let pending = tss_signed_transaction(7, None);
		observer.set_pending_tx(7, pending.clone());
		assert_eq!(observer.get_pending_tx(7), Some(pending));
		assert!(!observer.is_tx_confirmed(7));

		let mined = tss_signed_transaction(7, Some(100));
		let receipt = receipt_for(&mined, 100);
		observer.set_tx_and_receipt(7, receipt.clone(), mined.clone());

		assert_eq!(observer.get_pending_tx(7), None);
		assert!(observer.is_tx_confirmed(7));
		assert!(!observer.is_tx_confirmed(8));

		observer.outbound_state.lock().unwrap().confirmed_receipts.clear();
		observer.outbound_state.lock().unwrap().confirmed_transactions.clear();
		observer.build_receipts_map().unwrap();
		observer.build_transactions_map().unwrap();
		assert_eq!(observer.get_tx_and_receipt(7), Some((receipt, mined)));
	}

	#[test]
	fn tx_id_uses_the_checksummed_tss_address() {
		let (_dir, observer) =
			new_test_observer(MockEvmRpcApi::new(), MockEvmJsonRpcApi::new(), mock_zetacore());
		assert_eq!(observer.get_tx_id(3), format!("1337-{}-3", to_checksum(&tss_address(), None)));
	}

	#[tokio::test]
	async fn inclusion_hash_mismatch_evicts_the_block() {
		let transaction = tss_signed_transaction(1, Some(100));
		let other = tss_signed_transaction(2, Some(100));

		let mut rpc = MockEvmRpcApi::new();
		let mut seq = mockall::Sequence::new();
		rpc.expect_block_with_txs()
			.with(eq(100))
			.times(1)
			.in_sequence(&mut seq)
			.returning(move |number| Ok(block_with(number, vec![other.clone()])));
		let refetched = transaction.clone();
		rpc.expect_block_with_txs()
			.with(eq(100))
			.times(1)
			.in_sequence(&mut seq)
			.returning(move |number| Ok(block_with(number, vec![refetched.clone()])));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), mock_zetacore());

		let error = observer.check_tx_inclusion(&transaction, 100, 0).await.unwrap_err();
		assert!(matches!(
			error.downcast_ref::<ObserverError>(),
			Some(ObserverError::TxHashMismatch { .. })
		));

		// The evicted block is fetched again.
		observer.check_tx_inclusion(&transaction, 100, 0).await.unwrap();
	}

	#[tokio::test]
	async fn inclusion_index_out_of_range_keeps_the_block() {
		let transaction = tss_signed_transaction(1, Some(100));
		let cached = transaction.clone();

		let mut rpc = MockEvmRpcApi::new();
		rpc.expect_block_with_txs()
			.times(1)
			.returning(move |number| Ok(block_with(number, vec![cached.clone()])));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), mock_zetacore());

		let error = observer.check_tx_inclusion(&transaction, 100, 3).await.unwrap_err();
		assert_eq!(
			error.downcast_ref::<ObserverError>(),
			Some(&ObserverError::TxIndexOutOfRange { index: 3, len: 1, block_number: 100 })
		);
		observer.check_tx_inclusion(&transaction, 100, 0).await.unwrap();
	}

	#[tokio::test]
	async fn undecodable_block_is_fetched_as_json() {
		let transaction = tss_signed_transaction(1, Some(100));
		let json_transaction = JsonTransaction {
			hash: transaction.hash,
			from: tss_address(),
			to: transaction.to,
			input: Default::default(),
			value: transaction.value,
			nonce: transaction.nonce,
			transaction_index: Some(U64::zero()),
		};

		let mut rpc = MockEvmRpcApi::new();
		rpc.expect_block_with_txs()
			.times(1)
			.returning(|_| Err(anyhow!("transaction type not supported")));
		let mut json_rpc = MockEvmJsonRpcApi::new();
		json_rpc.expect_block_by_number().with(eq(100)).times(1).returning(move |number| {
			Ok(JsonBlock {
				hash: H256::from_low_u64_be(number),
				number: U64::from(number),
				transactions: vec![json_transaction.clone()],
			})
		});
		let (_dir, observer) = new_test_observer(rpc, json_rpc, mock_zetacore());

		assert!(matches!(observer.get_block_cached(100).await.unwrap(), CachedBlock::Json(_)));
		// Served from the cache.
		observer.check_tx_inclusion(&transaction, 100, 0).await.unwrap();
	}

	#[tokio::test]
	async fn pending_candidate_is_remembered() {
		let pending = tss_signed_transaction(7, None);
		let hash = pending.hash;

		let mut rpc = MockEvmRpcApi::new();
		rpc.expect_transaction_by_hash()
			.with(eq(hash))
			.times(1)
			.returning(move |_| Ok(pending.clone()));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), mock_zetacore());

		assert_eq!(observer.check_confirmed_tx(hash, 7).await, None);
		assert_eq!(observer.get_pending_tx(7).map(|tx| tx.hash), Some(hash));
	}

	#[tokio::test]
	async fn candidate_from_another_signer_or_nonce_is_rejected() {
		let foreign = signed_transaction(
			&crate::tss::test_utils::LocalTss::new(0x07),
			7,
			Some(100),
		);
		let wrong_nonce = tss_signed_transaction(8, Some(100));
		let (foreign_hash, wrong_nonce_hash) = (foreign.hash, wrong_nonce.hash);

		let mut rpc = MockEvmRpcApi::new();
		rpc.expect_transaction_by_hash()
			.with(eq(foreign_hash))
			.returning(move |_| Ok(foreign.clone()));
		rpc.expect_transaction_by_hash()
			.with(eq(wrong_nonce_hash))
			.returning(move |_| Ok(wrong_nonce.clone()));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), mock_zetacore());

		assert_eq!(observer.check_confirmed_tx(foreign_hash, 7).await, None);
		assert_eq!(observer.check_confirmed_tx(wrong_nonce_hash, 7).await, None);
		assert_eq!(observer.get_pending_tx(7), None);
	}

	#[tokio::test]
	async fn candidate_needs_enough_confirmations() {
		let mined = tss_signed_transaction(7, Some(100));
		let receipt = receipt_for(&mined, 100);
		let hash = mined.hash;

		let mut rpc = MockEvmRpcApi::new();
		rpc.expect_transaction_by_hash().returning(move |_| Ok(mined.clone()));
		rpc.expect_transaction_receipt().returning(move |_| Ok(receipt.clone()));
		let block_transaction = tss_signed_transaction(7, Some(100));
		rpc.expect_block_with_txs()
			.times(1)
			.returning(move |number| Ok(block_with(number, vec![block_transaction.clone()])));
		let (_dir, observer) = new_test_observer(rpc, MockEvmJsonRpcApi::new(), mock_zetacore());

		// Two confirmations are required.
		observer.set_last_block(101);
		assert_eq!(observer.check_confirmed_tx(hash, 7).await, None);

		observer.set_last_block(102);
		let (receipt, transaction) = observer.check_confirmed_tx(hash, 7).await.unwrap();
		assert_eq!(receipt.transaction_hash, hash);
		assert_eq!(transaction.hash, hash);
	}
}
