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

//! Reports broadcast outbounds to the coordinating chain's outbound tracker, one detached task
//! per transaction hash.

use std::{
	collections::HashSet,
	sync::{Arc, Mutex},
};

use ethers::types::H256;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
	constants::{
		OUTBOUND_INCLUSION_POLL_INTERVAL, OUTBOUND_INCLUSION_TIMEOUT, TRACKER_REPORT_TIMEOUT,
		ZETA_BLOCK_TIME,
	},
	evm::rpc::EvmRpcApi,
	types::Chain,
	zetacore::ZetacoreClient,
};

type InFlight = Arc<Mutex<HashSet<H256>>>;

/// Marks a hash as being reported until dropped.
struct InFlightGuard {
	in_flight: InFlight,
	tx_hash: H256,
}

impl InFlightGuard {
	fn acquire(in_flight: &InFlight, tx_hash: H256) -> Option<Self> {
		in_flight
			.lock()
			.expect("Should be able to get lock")
			.insert(tx_hash)
			.then(|| Self { in_flight: in_flight.clone(), tx_hash })
	}
}

impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.in_flight.lock().expect("Should be able to get lock").remove(&self.tx_hash);
	}
}

#[derive(Clone)]
pub struct OutboundTrackerReporter {
	chain: Chain,
	rpc: Arc<dyn EvmRpcApi>,
	zetacore: Arc<dyn ZetacoreClient>,
	in_flight: InFlight,
}

impl OutboundTrackerReporter {
	pub fn new(chain: Chain, rpc: Arc<dyn EvmRpcApi>, zetacore: Arc<dyn ZetacoreClient>) -> Self {
		Self { chain, rpc, zetacore, in_flight: Default::default() }
	}

	pub fn is_reporting(&self, tx_hash: H256) -> bool {
		self.in_flight.lock().expect("Should be able to get lock").contains(&tx_hash)
	}

	/// Starts reporting `tx_hash`, unless it is already being reported. The task is not tied
	/// to the observer and outlives its cancellation.
	pub fn report(&self, nonce: u64, tx_hash: H256) -> Option<JoinHandle<()>> {
		let Some(guard) = InFlightGuard::acquire(&self.in_flight, tx_hash) else {
			info!(chain = %self.chain, nonce, ?tx_hash, "Outbound is already being reported");
			return None
		};

		let reporter = self.clone();
		Some(tokio::spawn(
			async move {
				let _guard = guard;
				reporter.report_when_included(nonce, tx_hash).await;
			}
			.instrument(info_span!("outbound_tracker", chain = %self.chain, nonce, ?tx_hash)),
		))
	}

	async fn report_when_included(&self, nonce: u64, tx_hash: H256) {
		if let Some(block_number) = self.wait_for_inclusion(tx_hash).await {
			self.add_to_tracker(nonce, tx_hash, block_number).await;
		}
	}

	/// Returns whether to report, with the inclusion height when it is known. A transaction
	/// still pending at the timeout is reported anyway.
	async fn wait_for_inclusion(&self, tx_hash: H256) -> Option<Option<u64>> {
		let start = Instant::now();
		let mut pending = false;
		loop {
			tokio::time::sleep(OUTBOUND_INCLUSION_POLL_INTERVAL).await;

			if start.elapsed() > OUTBOUND_INCLUSION_TIMEOUT {
				info!("Timed out waiting for inclusion, pending: {pending}");
				return pending.then_some(None)
			}

			match self.rpc.transaction_by_hash(tx_hash).await {
				Ok(transaction) if transaction.block_number.is_none() => {
					pending = true;
					debug!("Outbound not included yet");
				},
				Ok(_) => {
					let block_number = match self.rpc.transaction_receipt(tx_hash).await {
						Ok(receipt) => receipt.block_number.map(|n| n.as_u64()),
						Err(e) => {
							info!("Failed to get the receipt of the included outbound: {e:#}");
							None
						},
					};
					return Some(block_number)
				},
				Err(e) => info!("Failed to get outbound: {e:#}"),
			}
		}
	}

	async fn add_to_tracker(&self, nonce: u64, tx_hash: H256, block_number: Option<u64>) {
		let chain_id = self.chain.chain_id;
		let start = Instant::now();
		loop {
			if start.elapsed() > TRACKER_REPORT_TIMEOUT {
				warn!("Timed out adding the outbound to the tracker, it must be added manually");
				return
			}

			match self.zetacore.get_cctx_by_nonce(chain_id, nonce).await {
				Ok(cctx) if !cctx.is_pending() => {
					info!("CCTX is already finalized");
					return
				},
				Ok(_) => {},
				Err(e) => error!("Failed to get CCTX: {e:#}"),
			}

			match self
				.zetacore
				.add_tx_hash_to_outbound_tracker(
					chain_id,
					nonce,
					format!("{tx_hash:?}"),
					None,
					String::new(),
					-1,
				)
				.await
			{
				Ok(zeta_hash) if zeta_hash.is_empty() => {
					info!("Outbound tracker already contains the hash");
					return
				},
				Ok(zeta_hash) => info!(%zeta_hash, ?block_number, "Outbound added to the tracker"),
				Err(e) => error!("Failed to add the outbound to the tracker: {e:#}"),
			}

			tokio::time::sleep(ZETA_BLOCK_TIME).await;
		}
	}
}
