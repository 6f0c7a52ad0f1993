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

//! Periodically reports how far behind each configured EVM endpoint is.

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use tracing::{info, warn};
use utilities::make_periodic_tick;
use zetaclient_engine::{
	constants::RPC_STATUS_CHECK_INTERVAL,
	evm::{observer::check_rpc_status, rpc_fallback::EvmClientFallback},
	logging,
	settings::{CommandLineOptions, Settings},
};

#[tokio::main]
async fn main() -> Result<()> {
	let settings = Settings::new(CommandLineOptions::parse()).context("Error reading settings")?;
	logging::init(&settings.logging)?;

	let clients = settings
		.evm_chains()?
		.into_iter()
		.map(|(chain, evm_chain)| {
			EvmClientFallback::from_endpoints(&evm_chain.endpoints)
				.context(format!("Invalid endpoints for {chain}"))
				.map(|client| (chain, client))
		})
		.collect::<Result<Vec<_>>>()?;
	info!(chains = clients.len(), "Checking RPC status every {RPC_STATUS_CHECK_INTERVAL:?}");

	let mut ticker = make_periodic_tick(RPC_STATUS_CHECK_INTERVAL, true);
	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("Shutting down");
				return Ok(())
			}
			_ = ticker.tick() => {
				join_all(clients.iter().map(|(chain, client)| async move {
					if let Err(e) = check_rpc_status(*chain, client).await {
						warn!(chain = %chain, "RPC status check failed: {e:#}");
					}
				}))
				.await;
			}
		}
	}
}
