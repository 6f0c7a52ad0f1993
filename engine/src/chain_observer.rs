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

//! Chain family agnostic observer and signer capabilities, and the polling loops that drive
//! an observer.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use utilities::DynamicTicker;

use crate::{
	constants::RPC_STATUS_CHECK_INTERVAL,
	evm::observer::ObserverError,
	logging::{GAS_PRICE_LOOP, INBOUND_LOOP, INBOUND_TRACKER_LOOP, OUTBOUND_LOOP, RPC_STATUS_LOOP},
	types::{Chain, ChainParams, CrossChainTx},
};

#[async_trait::async_trait]
pub trait ChainObserver: Send + Sync + 'static {
	fn chain(&self) -> Chain;

	fn chain_params(&self) -> ChainParams;

	fn set_chain_params(&self, chain_params: ChainParams);

	/// Shared by every loop of this observer.
	fn cancellation_token(&self) -> &CancellationToken;

	async fn observe_inbound(&self) -> Result<()>;

	async fn observe_inbound_trackers(&self) -> Result<()>;

	async fn observe_outbound(&self) -> Result<()>;

	async fn post_gas_price(&self) -> Result<()>;

	async fn check_rpc_status(&self) -> Result<()>;

	/// Returns `(included, confirmed)`. Votes on the outcome once confirmed.
	async fn is_outbound_processed(&self, cctx: &CrossChainTx) -> Result<(bool, bool)>;

	fn stop(&self) {
		info!(chain = %self.chain(), "Stopping observer");
		self.cancellation_token().cancel();
	}
}

#[async_trait::async_trait]
pub trait ChainSigner: Send + Sync + 'static {
	/// Signs and broadcasts the outbound of `cctx`. Failures are logged, the CCTX is picked
	/// up again on a later height.
	async fn try_process_outbound(&self, cctx: &CrossChainTx, height: u64);

	fn set_zeta_connector_address(&self, address: String) -> Result<()>;

	fn set_erc20_custody_address(&self, address: String) -> Result<()>;

	fn zeta_connector_address(&self) -> String;

	fn erc20_custody_address(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverLoop {
	Inbound,
	InboundTrackers,
	Outbound,
	GasPrice,
	RpcStatus,
}

impl ObserverLoop {
	pub const ALL: [ObserverLoop; 5] = [
		ObserverLoop::Inbound,
		ObserverLoop::InboundTrackers,
		ObserverLoop::Outbound,
		ObserverLoop::GasPrice,
		ObserverLoop::RpcStatus,
	];

	pub fn name(&self) -> &'static str {
		match self {
			ObserverLoop::Inbound => INBOUND_LOOP,
			ObserverLoop::InboundTrackers => INBOUND_TRACKER_LOOP,
			ObserverLoop::Outbound => OUTBOUND_LOOP,
			ObserverLoop::GasPrice => GAS_PRICE_LOOP,
			ObserverLoop::RpcStatus => RPC_STATUS_LOOP,
		}
	}

	pub fn interval(&self, chain_params: &ChainParams) -> Duration {
		match self {
			ObserverLoop::Inbound | ObserverLoop::InboundTrackers =>
				Duration::from_secs(chain_params.inbound_ticker),
			ObserverLoop::Outbound => Duration::from_secs(chain_params.outbound_ticker),
			ObserverLoop::GasPrice => Duration::from_secs(chain_params.gas_price_ticker),
			ObserverLoop::RpcStatus => RPC_STATUS_CHECK_INTERVAL,
		}
	}

	async fn run_once<O: ChainObserver>(&self, observer: &O) -> Result<()> {
		match self {
			ObserverLoop::Inbound => observer.observe_inbound().await,
			ObserverLoop::InboundTrackers => observer.observe_inbound_trackers().await,
			ObserverLoop::Outbound => observer.observe_outbound().await,
			ObserverLoop::GasPrice => observer.post_gas_price().await,
			ObserverLoop::RpcStatus => observer.check_rpc_status().await,
		}
	}
}

/// Errors after which the observer of the chain must not continue.
pub fn is_fatal(error: &anyhow::Error) -> bool {
	error.downcast_ref::<ObserverError>().is_some_and(ObserverError::is_fatal)
}

/// Starts every loop of `observer`. The loops end once its cancellation token is cancelled.
pub fn start<O: ChainObserver>(observer: Arc<O>) -> Vec<JoinHandle<()>> {
	start_loops(observer, &ObserverLoop::ALL)
}

pub fn start_loops<O: ChainObserver>(
	observer: Arc<O>,
	observer_loops: &[ObserverLoop],
) -> Vec<JoinHandle<()>> {
	observer_loops
		.iter()
		.map(|observer_loop| {
			let span = info_span!(
				"observer",
				chain = %observer.chain(),
				loop_name = observer_loop.name()
			);
			tokio::spawn(run_loop(observer.clone(), *observer_loop).instrument(span))
		})
		.collect()
}

async fn run_loop<O: ChainObserver>(observer: Arc<O>, observer_loop: ObserverLoop) {
	let cancellation_token = observer.cancellation_token().clone();

	let mut ticker = match DynamicTicker::new(
		format!("{}_{}", observer_loop.name(), observer.chain().chain_name),
		observer_loop.interval(&observer.chain_params()),
	) {
		Ok(ticker) => ticker,
		Err(e) => {
			error!("Loop not started: {e}");
			return
		},
	};

	info!(interval = ?ticker.interval(), "Loop started");

	// Gas prices are needed before the first outbound can be paid for.
	if observer_loop == ObserverLoop::GasPrice {
		if let Err(e) = observer.post_gas_price().await {
			warn!("Failed to post initial gas price: {e:#}");
		}
	}

	loop {
		tokio::select! {
			_ = cancellation_token.cancelled() => {
				info!("Loop stopped");
				return
			}
			_ = ticker.tick() => {
				if let Err(e) = observer_loop.run_once(&*observer).await {
					if is_fatal(&e) {
						error!("Fatal error, stopping the observer: {e:#}");
						observer.stop();
						return
					}
					warn!("{e:#}");
				}

				if ticker.update_interval(observer_loop.interval(&observer.chain_params())) {
					debug!(ticker = ticker.name(), interval = ?ticker.interval(), "Ticker interval updated");
				}
			}
		}
	}
}
