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

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ethers::types::{Address, U256};
use tracing::{info, warn};
use utilities::clean_eth_address;

use super::SignerError;
use crate::{
	chain_observer::ChainObserver,
	constants::{MAX_OUTBOUND_GAS_LIMIT, MIN_OUTBOUND_GAS_LIMIT},
	evm::{observer::EvmObserver, rpc::EvmRpcApi},
	types::{round_up_to_gwei, CctxStatus, Chain, CoinType, CrossChainTx, OutboundParams},
};

/// Parses a 0x hex address, yielding the zero address for anything else.
pub fn lenient_address(address: &str) -> Address {
	clean_eth_address(address).map(Address::from).unwrap_or_default()
}

/// Everything needed to sign the outbound of one CCTX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundData {
	pub sender: Address,
	pub src_chain_id: i64,
	pub to: Address,
	pub to_chain: Chain,
	pub asset: Address,
	pub amount: U256,
	pub gas_limit: u64,
	pub gas_price: U256,
	pub nonce: u64,
	pub height: u64,
	pub send_hash: [u8; 32],
	pub message: Vec<u8>,
}

/// The gas limit clamped to the accepted range, and the gas price given by the CCTX. Chains
/// of the Ethereum family fall back on the suggested price, rounded up to a whole gwei.
pub async fn setup_gas(
	params: &OutboundParams,
	chain: Chain,
	rpc: &dyn EvmRpcApi,
) -> Result<(u64, U256)> {
	let gas_limit = params.gas_limit.clamp(MIN_OUTBOUND_GAS_LIMIT, MAX_OUTBOUND_GAS_LIMIT);
	if gas_limit != params.gas_limit {
		warn!(%chain, nonce = params.tss_nonce, "Gas limit {} set to {gas_limit}", params.gas_limit);
	}

	let gas_price = match U256::from_dec_str(&params.gas_price) {
		Ok(gas_price) => gas_price,
		Err(_) if chain.is_ethereum_chain() => round_up_to_gwei(
			rpc.suggest_gas_price()
				.await
				.context(format!("Can't get the gas price of {chain}"))?,
		),
		Err(_) =>
			return Err(SignerError::InvalidParams(format!(
				"gas price {:?} of nonce {}",
				params.gas_price, params.tss_nonce
			))
			.into()),
	};
	Ok((gas_limit, gas_price))
}

impl OutboundData {
	/// Returns `None` when there is nothing to sign: the CCTX is not pending, it was already
	/// processed, or a pending transaction with a higher gas price has the same nonce.
	pub async fn new(
		cctx: &CrossChainTx,
		observer: &EvmObserver,
		rpc: &dyn EvmRpcApi,
		height: u64,
	) -> Result<Option<Self>> {
		let params = cctx
			.current_outbound_params()
			.ok_or_else(|| SignerError::InvalidParams(format!("CCTX {} has no outbound", cctx.index)))?;
		let nonce = params.tss_nonce;

		let (to, to_chain_id) = match cctx.cctx_status {
			CctxStatus::PendingRevert =>
				(lenient_address(&cctx.inbound_params.sender), cctx.inbound_params.sender_chain_id),
			CctxStatus::PendingOutbound => (lenient_address(&params.receiver), params.receiver_chain_id),
			status => {
				info!(nonce, "CCTX in status {status:?} needs no outbound");
				return Ok(None)
			},
		};
		let to_chain = Chain::from_chain_id(to_chain_id)
			.ok_or_else(|| anyhow!("Unknown destination chain {to_chain_id}"))?;
		if to_chain.is_zeta_chain() {
			return Err(anyhow!("Outbound of nonce {nonce} is destined to {to_chain}"))
		}

		let (included, confirmed) = observer
			.is_outbound_processed(cctx)
			.await
			.context(format!("Can't tell if outbound of nonce {nonce} was processed"))?;
		if included || confirmed {
			info!(nonce, "CCTX already processed");
			return Ok(None)
		}

		let (gas_limit, gas_price) = setup_gas(params, observer.chain(), rpc).await?;

		let send_hash: [u8; 32] = hex::decode(cctx.index.trim_start_matches("0x"))
			.ok()
			.and_then(|hash| hash.try_into().ok())
			.ok_or_else(|| SignerError::InvalidParams(format!("CCTX index {}", cctx.index)))?;

		if let Some(pending) = observer.get_pending_tx(nonce) {
			let pending_price = pending.gas_price.unwrap_or_default();
			if gas_price > pending_price {
				info!(nonce, tx_hash = ?pending.hash, "Replacing pending outbound at gas price {gas_price}");
			} else {
				info!(nonce, tx_hash = ?pending.hash, "Waiting for the pending outbound to be included");
				return Ok(None)
			}
		}

		let message = if params.coin_type == CoinType::Cmd {
			vec![]
		} else {
			BASE64.decode(&cctx.relayed_message).unwrap_or_else(|e| {
				warn!(nonce, "Relayed message is not base64: {e}");
				vec![]
			})
		};

		Ok(Some(Self {
			sender: lenient_address(&cctx.inbound_params.sender),
			src_chain_id: cctx.inbound_params.sender_chain_id,
			to,
			to_chain,
			asset: lenient_address(&cctx.inbound_params.asset),
			amount: params.amount,
			gas_limit,
			gas_price,
			nonce,
			height,
			send_hash,
			message,
		}))
	}
}
