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

use std::collections::HashSet;

use tracing::warn;

use crate::{logging::COMPLIANCE_TARGET, settings::Compliance, types::CrossChainTx};

/// Addresses that must never be served, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct RestrictedAddressBook {
	restricted: HashSet<String>,
}

impl RestrictedAddressBook {
	pub fn new<S: AsRef<str>>(addresses: impl IntoIterator<Item = S>) -> Self {
		Self {
			restricted: addresses
				.into_iter()
				.map(|address| address.as_ref().trim().to_lowercase())
				.filter(|address| !address.is_empty())
				.collect(),
		}
	}

	pub fn from_settings(settings: &Compliance) -> Self {
		Self::new(&settings.restricted_addresses)
	}

	/// Empty entries are ignored, so optional addresses can be passed as "".
	pub fn contains_restricted_address(&self, addresses: &[&str]) -> bool {
		addresses
			.iter()
			.filter(|address| !address.is_empty())
			.any(|address| self.restricted.contains(&address.to_lowercase()))
	}

	/// A CCTX is restricted when its inbound sender or its current receiver is.
	pub fn is_cctx_restricted(&self, cctx: &CrossChainTx) -> bool {
		let receiver = cctx
			.current_outbound_params()
			.map(|params| params.receiver.as_str())
			.unwrap_or_default();
		self.contains_restricted_address(&[cctx.inbound_params.sender.as_str(), receiver])
	}
}

/// Logs a restricted transfer both in the regular log and on the dedicated compliance target.
pub fn print_compliance_log(
	outbound: bool,
	chain_id: i64,
	identifier: &str,
	sender: &str,
	receiver: &str,
	coin_type: &str,
) {
	let direction = if outbound { "outbound" } else { "inbound" };
	warn!(
		chain_id,
		identifier, sender, receiver, coin_type, direction, "Restricted address detected"
	);
	warn!(
		target: COMPLIANCE_TARGET,
		chain_id,
		identifier,
		sender,
		receiver,
		coin_type,
		direction,
		"Restricted address detected"
	);
}
