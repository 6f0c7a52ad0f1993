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

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{constants::RPC_ALERT_LATENCY, evm::rpc::EvmRpcApi, types::Chain};

/// Time since the block with `timestamp`, zero if it is in the future.
fn block_age(timestamp: u64, now: Duration) -> Duration {
	now.saturating_sub(Duration::from_secs(timestamp))
}

/// Checks that the node answers and follows the chain head.
pub async fn check_rpc_status(chain: Chain, rpc: &dyn EvmRpcApi) -> Result<()> {
	let block_number = rpc.block_number().await.context(format!("RPC of {chain} is down"))?;
	let gas_price =
		rpc.suggest_gas_price().await.context(format!("RPC of {chain} has no gas price"))?;
	let header = rpc
		.header_by_number(Some(block_number))
		.await
		.context(format!("RPC of {chain} can't serve header {block_number}"))?;

	let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
	let age = block_age(header.timestamp.low_u64(), now);
	if age > RPC_ALERT_LATENCY {
		warn!(
			%chain,
			block_number,
			"RPC stale or chain stuck: latest block is {} seconds old",
			age.as_secs()
		);
	} else {
		info!(
			%chain,
			block_number,
			%gas_price,
			"RPC status OK: latest block is {} seconds old",
			age.as_secs()
		);
	}
	Ok(())
}
