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

//! Parameters shared by the observers and signers of every chain, refreshed from the
//! coordinating chain.

use std::{collections::HashMap, sync::RwLock};

use crate::types::{ChainParams, CrosschainFlags};

#[derive(Debug, Default)]
pub struct AppContext {
	chain_params: RwLock<HashMap<i64, ChainParams>>,
	crosschain_flags: RwLock<CrosschainFlags>,
}

impl AppContext {
	pub fn new(chain_params: impl IntoIterator<Item = ChainParams>, flags: CrosschainFlags) -> Self {
		Self {
			chain_params: RwLock::new(
				chain_params.into_iter().map(|params| (params.chain_id, params)).collect(),
			),
			crosschain_flags: RwLock::new(flags),
		}
	}

	/// Parameters of a supported EVM chain.
	pub fn evm_chain_params(&self, chain_id: i64) -> Option<ChainParams> {
		self.chain_params
			.read()
			.expect("Should be able to get lock")
			.get(&chain_id)
			.filter(|params| params.is_supported)
			.cloned()
	}

	pub fn set_chain_params(&self, chain_params: ChainParams) {
		self.chain_params
			.write()
			.expect("Should be able to get lock")
			.insert(chain_params.chain_id, chain_params);
	}

	pub fn crosschain_flags(&self) -> CrosschainFlags {
		self.crosschain_flags.read().expect("Should be able to get lock").clone()
	}

	pub fn set_crosschain_flags(&self, flags: CrosschainFlags) {
		*self.crosschain_flags.write().expect("Should be able to get lock") = flags;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::test_utils::{test_chain_params, TEST_CHAIN};

	#[test]
	fn unsupported_chains_have_no_params() {
		let context = AppContext::new([test_chain_params()], CrosschainFlags::default());
		assert_eq!(context.evm_chain_params(TEST_CHAIN.chain_id), Some(test_chain_params()));
		assert_eq!(context.evm_chain_params(56), None);

		context.set_chain_params(ChainParams { is_supported: false, ..test_chain_params() });
		assert_eq!(context.evm_chain_params(TEST_CHAIN.chain_id), None);
	}

	#[test]
	fn flags_are_replaced() {
		let context = AppContext::default();
		assert!(!context.crosschain_flags().is_outbound_enabled);

		context.set_crosschain_flags(CrosschainFlags {
			is_inbound_enabled: true,
			is_outbound_enabled: true,
		});
		assert!(context.crosschain_flags().is_outbound_enabled);
	}
}
