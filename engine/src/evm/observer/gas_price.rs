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

use anyhow::{Context, Result};
use tracing::{error, info};

use super::EvmObserver;
use crate::constants::GAS_PRICE_SUPPLY;

impl EvmObserver {
	pub(super) async fn post_current_gas_price(&self) -> Result<()> {
		let gas_price = self.rpc.suggest_gas_price().await.context("Failed to get gas price")?;
		let block_number = self.rpc.block_number().await.context("Failed to get block number")?;

		match self
			.zetacore
			.post_gas_price(self.chain, gas_price.low_u64(), GAS_PRICE_SUPPLY.to_string(), block_number)
			.await
		{
			Ok(zeta_hash) => {
				info!(chain = %self.chain, %gas_price, block_number, %zeta_hash, "Gas price posted");
			},
			Err(e) => {
				let zeta_height = self.zetacore.get_block_height().await.unwrap_or_default();
				error!(
					chain = %self.chain,
					%gas_price,
					block_number,
					zeta_height,
					"Failed to post gas price: {e:#}"
				);
			},
		}
		Ok(())
	}
}
