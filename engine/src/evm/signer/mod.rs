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

//! Builds, signs and broadcasts the outbound transaction of a CCTX on an EVM chain.

mod broadcast;
mod outbound_data;

pub use broadcast::{broadcast_with_retry, classify_broadcast_error};
pub use outbound_data::{lenient_address, setup_gas, OutboundData};

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use ethers::{
	abi::AbiEncode,
	types::{
		transaction::eip2718::TypedTransaction, Address, Bytes, Signature, TransactionRequest,
		H256, U256,
	},
	utils::{keccak256, to_checksum},
};
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
	chain_observer::{ChainObserver, ChainSigner},
	compliance::{print_compliance_log, RestrictedAddressBook},
	constants::{
		BROADCAST_TIMEOUT, CMD_MIGRATE_TSS_FUNDS, CMD_WHITELIST_ERC20, NATIVE_TRANSFER_GAS_LIMIT,
	},
	context::AppContext,
	evm::{
		contracts::{parse_contract_address, OnReceiveCall, OnRevertCall, WhitelistCall, WithdrawCall},
		observer::EvmObserver,
		rpc::EvmRpcApi,
	},
	outbound_tracker::OutboundTrackerReporter,
	tss::{evm_address_from_pubkey, recover_pubkey, TssSigner},
	types::{CctxStatus, Chain, CoinType, CrossChainTx},
	zetacore::ZetacoreClient,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignerError {
	#[error("signature of {recovered:?} does not match the TSS address {expected:?}")]
	SignatureMismatch { expected: Address, recovered: Address },
	#[error("unknown command {0:?}")]
	UnknownCommand(String),
	#[error("invalid outbound parameters: {0}")]
	InvalidParams(String),
}

struct UnsignedTx {
	to: Address,
	value: U256,
	data: Vec<u8>,
	gas_limit: u64,
	gas_price: U256,
	nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
	pub hash: H256,
	pub raw: Bytes,
	pub nonce: u64,
}

fn u256_chain_id(chain_id: i64) -> U256 {
	U256::from(chain_id.unsigned_abs())
}

pub struct EvmSigner {
	chain: Chain,
	tss: Arc<dyn TssSigner>,
	rpc: Arc<dyn EvmRpcApi>,
	zetacore: Arc<dyn ZetacoreClient>,
	observer: Arc<EvmObserver>,
	compliance: Arc<RestrictedAddressBook>,
	app_context: Arc<AppContext>,
	zeta_connector_address: RwLock<Address>,
	erc20_custody_address: RwLock<Address>,
	tracker_reporter: OutboundTrackerReporter,
}

impl EvmSigner {
	pub fn new(
		observer: Arc<EvmObserver>,
		zetacore: Arc<dyn ZetacoreClient>,
		tss: Arc<dyn TssSigner>,
		rpc: Arc<dyn EvmRpcApi>,
		compliance: Arc<RestrictedAddressBook>,
		app_context: Arc<AppContext>,
	) -> Result<Self> {
		let chain = observer.chain();
		Ok(Self {
			chain,
			zeta_connector_address: RwLock::new(observer.connector_address()?),
			erc20_custody_address: RwLock::new(observer.custody_address()?),
			tracker_reporter: OutboundTrackerReporter::new(chain, rpc.clone(), zetacore.clone()),
			tss,
			rpc,
			zetacore,
			observer,
			compliance,
			app_context,
		})
	}

	fn connector(&self) -> Address {
		*self.zeta_connector_address.read().expect("Should be able to get lock")
	}

	fn custody(&self) -> Address {
		*self.erc20_custody_address.read().expect("Should be able to get lock")
	}

	/// Signs a legacy transaction with the TSS key. The signature is checked against the TSS
	/// public key before the transaction is assembled.
	async fn sign(&self, tx: UnsignedTx, height: u64) -> Result<SignedTx> {
		let chain_id = self.chain.chain_id.unsigned_abs();
		let typed: TypedTransaction = TransactionRequest::new()
			.to(tx.to)
			.value(tx.value)
			.data(tx.data)
			.gas(tx.gas_limit)
			.gas_price(tx.gas_price)
			.nonce(tx.nonce)
			.chain_id(chain_id)
			.into();
		let digest = typed.sighash().0;

		let signature = self
			.tss
			.sign(digest, height, tx.nonce, self.chain.chain_id, String::new())
			.await
			.context(format!("Keysign of nonce {} failed", tx.nonce))?;

		let recovered = recover_pubkey(digest, &signature)?;
		let expected = self.tss.pubkey();
		if recovered != expected {
			return Err(SignerError::SignatureMismatch {
				expected: evm_address_from_pubkey(&expected),
				recovered: evm_address_from_pubkey(&recovered),
			}
			.into())
		}

		let signature = Signature {
			r: U256::from_big_endian(&signature[..32]),
			s: U256::from_big_endian(&signature[32..64]),
			v: signature[64] as u64 + chain_id * 2 + 35,
		};
		let raw = typed.rlp_signed(&signature);
		Ok(SignedTx { hash: H256(keccak256(&raw)), raw, nonce: tx.nonce })
	}

	/// `onReceive` call on the connector, delivering ZETA and the message to the receiver.
	async fn sign_outbound(&self, data: &OutboundData) -> Result<SignedTx> {
		let call = OnReceiveCall {
			zeta_tx_sender_address: data.sender.as_bytes().to_vec().into(),
			source_chain_id: u256_chain_id(data.src_chain_id),
			destination_address: data.to,
			zeta_value: data.amount,
			message: data.message.clone().into(),
			internal_send_hash: data.send_hash,
		};
		self.sign(
			UnsignedTx {
				to: self.connector(),
				value: U256::zero(),
				data: call.encode(),
				gas_limit: data.gas_limit,
				gas_price: data.gas_price,
				nonce: data.nonce,
			},
			data.height,
		)
		.await
	}

	/// `onRevert` call on the connector, returning the remaining ZETA to the original sender.
	async fn sign_revert(&self, cctx: &CrossChainTx, data: &OutboundData) -> Result<SignedTx> {
		let (Some(original), Some(current)) =
			(cctx.original_outbound_params(), cctx.current_outbound_params())
		else {
			return Err(SignerError::InvalidParams(format!("CCTX {} has no outbound", cctx.index))
				.into())
		};
		let call = OnRevertCall {
			zeta_tx_sender_address: data.sender,
			source_chain_id: u256_chain_id(original.receiver_chain_id),
			destination_address: data.to.as_bytes().to_vec().into(),
			destination_chain_id: u256_chain_id(current.receiver_chain_id),
			remaining_zeta_value: data.amount,
			message: data.message.clone().into(),
			internal_send_hash: data.send_hash,
		};
		self.sign(
			UnsignedTx {
				to: self.connector(),
				value: U256::zero(),
				data: call.encode(),
				gas_limit: data.gas_limit,
				gas_price: data.gas_price,
				nonce: data.nonce,
			},
			data.height,
		)
		.await
	}

	/// Consumes the nonce with an empty transfer to the TSS address.
	async fn sign_cancel(&self, data: &OutboundData) -> Result<SignedTx> {
		self.sign(
			UnsignedTx {
				to: self.tss.evm_address(),
				value: U256::zero(),
				data: vec![],
				gas_limit: NATIVE_TRANSFER_GAS_LIMIT,
				gas_price: data.gas_price,
				nonce: data.nonce,
			},
			data.height,
		)
		.await
	}

	async fn sign_gas_withdraw(&self, data: &OutboundData) -> Result<SignedTx> {
		self.sign(
			UnsignedTx {
				to: data.to,
				value: data.amount,
				data: vec![],
				gas_limit: NATIVE_TRANSFER_GAS_LIMIT,
				gas_price: data.gas_price,
				nonce: data.nonce,
			},
			data.height,
		)
		.await
	}

	async fn sign_erc20_withdraw(&self, data: &OutboundData) -> Result<SignedTx> {
		let call = WithdrawCall { recipient: data.to, asset: data.asset, amount: data.amount };
		self.sign(
			UnsignedTx {
				to: self.custody(),
				value: U256::zero(),
				data: call.encode(),
				gas_limit: data.gas_limit,
				gas_price: data.gas_price,
				nonce: data.nonce,
			},
			data.height,
		)
		.await
	}

	/// Admin commands are relayed as `"<command>:<params>"`.
	async fn sign_command(&self, cctx: &CrossChainTx, data: &OutboundData) -> Result<SignedTx> {
		if data.to == Address::zero() {
			return Err(SignerError::InvalidParams(format!(
				"command of CCTX {} has no receiver",
				cctx.index
			))
			.into())
		}
		let parts: Vec<&str> = cctx.relayed_message.split(':').collect();
		let &[command, params] = parts.as_slice() else {
			return Err(SignerError::InvalidParams(format!(
				"command message {:?}",
				cctx.relayed_message
			))
			.into())
		};

		let tx = match command {
			CMD_WHITELIST_ERC20 => {
				let asset = lenient_address(params);
				if asset == Address::zero() {
					return Err(SignerError::InvalidParams(format!(
						"whitelisted asset {params:?}"
					))
					.into())
				}
				UnsignedTx {
					to: self.custody(),
					value: U256::zero(),
					data: WhitelistCall { asset }.encode(),
					gas_limit: data.gas_limit,
					gas_price: data.gas_price,
					nonce: data.nonce,
				}
			},
			CMD_MIGRATE_TSS_FUNDS => UnsignedTx {
				to: data.to,
				value: data.amount,
				data: vec![],
				gas_limit: data.gas_limit,
				gas_price: data.gas_price,
				nonce: data.nonce,
			},
			_ => return Err(SignerError::UnknownCommand(command.to_string()).into()),
		};
		self.sign(tx, data.height).await
	}

	/// Picks the kind of transaction the CCTX needs and signs it.
	async fn sign_cctx(&self, cctx: &CrossChainTx, data: &OutboundData) -> Result<SignedTx> {
		let coin_type = cctx.inbound_params.coin_type;
		if self.compliance.is_cctx_restricted(cctx) {
			print_compliance_log(
				true,
				self.chain.chain_id,
				&cctx.index,
				&cctx.inbound_params.sender,
				&to_checksum(&data.to, None),
				&format!("{coin_type:?}"),
			);
			return self.sign_cancel(data).await
		}

		let zeta_chain_id = self.zetacore.zeta_chain_id();
		let from_zeta = cctx.inbound_params.sender_chain_id == zeta_chain_id;
		let reverts_to_zeta = cctx
			.original_outbound_params()
			.is_some_and(|params| params.receiver_chain_id == zeta_chain_id);

		match (cctx.cctx_status, coin_type) {
			(_, CoinType::Cmd) => self.sign_command(cctx, data).await,
			(CctxStatus::PendingOutbound, CoinType::Gas) if from_zeta =>
				self.sign_gas_withdraw(data).await,
			(CctxStatus::PendingRevert, CoinType::Gas) if reverts_to_zeta =>
				self.sign_gas_withdraw(data).await,
			(CctxStatus::PendingOutbound, CoinType::Erc20) if from_zeta =>
				self.sign_erc20_withdraw(data).await,
			(CctxStatus::PendingRevert, CoinType::Erc20) if reverts_to_zeta =>
				self.sign_erc20_withdraw(data).await,
			(CctxStatus::PendingRevert, _) => self.sign_revert(cctx, data).await,
			(CctxStatus::PendingOutbound, _) => self.sign_outbound(data).await,
			(status, _) => Err(anyhow!("CCTX {} in status {status:?} has no outbound", cctx.index)),
		}
	}

	/// Broadcasts with retries, handing the hash to the tracker reporter once it is known to
	/// the network.
	pub async fn broadcast(&self, signed: &SignedTx) {
		broadcast_with_retry(
			self.chain,
			signed.nonce,
			signed.hash,
			move || {
				let rpc = self.rpc.clone();
				let raw = signed.raw.clone();
				async move {
					tokio::time::timeout(BROADCAST_TIMEOUT, rpc.send_raw_transaction(raw))
						.await
						.map_err(|_| anyhow!("Broadcast timed out after {BROADCAST_TIMEOUT:?}"))?
						.map(|_| ())
				}
			},
			|| {
				self.tracker_reporter.report(signed.nonce, signed.hash);
			},
		)
		.await
	}

	async fn process_outbound(&self, cctx: &CrossChainTx, height: u64) -> Result<()> {
		if !self.app_context.crosschain_flags().is_outbound_enabled {
			info!("Outbound is disabled");
			return Ok(())
		}

		let Some(data) = OutboundData::new(cctx, &self.observer, &*self.rpc, height).await? else {
			return Ok(())
		};
		let signed = self.sign_cctx(cctx, &data).await?;
		info!(tx_hash = ?signed.hash, "Outbound signed");

		self.broadcast(&signed).await;
		Ok(())
	}
}

#[async_trait::async_trait]
impl ChainSigner for EvmSigner {
	async fn try_process_outbound(&self, cctx: &CrossChainTx, height: u64) {
		let nonce = cctx.current_outbound_params().map(|params| params.tss_nonce);
		let span = info_span!("outbound", chain = %self.chain, ?nonce, cctx = %cctx.index);
		async {
			if let Err(e) = self.process_outbound(cctx, height).await {
				match e.downcast_ref::<SignerError>() {
					Some(SignerError::UnknownCommand(_)) => warn!("Skipping CCTX: {e:#}"),
					_ => error!("Failed to process outbound: {e:#}"),
				}
			}
		}
		.instrument(span)
		.await
	}

	fn set_zeta_connector_address(&self, address: String) -> Result<()> {
		let address = parse_contract_address("connector", &address)?;
		let mut current = self.zeta_connector_address.write().expect("Should be able to get lock");
		if *current != address {
			info!(chain = %self.chain, "Connector address updated to {address:?}");
			*current = address;
		}
		Ok(())
	}

	fn set_erc20_custody_address(&self, address: String) -> Result<()> {
		let address = parse_contract_address("custody", &address)?;
		let mut current = self.erc20_custody_address.write().expect("Should be able to get lock");
		if *current != address {
			info!(chain = %self.chain, "Custody address updated to {address:?}");
			*current = address;
		}
		Ok(())
	}

	fn zeta_connector_address(&self) -> String {
		to_checksum(&self.connector(), None)
	}

	fn erc20_custody_address(&self) -> String {
		to_checksum(&self.custody(), None)
	}
}
