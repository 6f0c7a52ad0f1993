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

//! Legacy memo layout: `[20 byte receiver][payload]`, hex encoded without a `0x` prefix.

use anyhow::{Context, Result};
use ethers::types::Address;

const ADDRESS_LEN: usize = 20;

/// Splits a hex memo into its receiver address and payload.
///
/// An empty memo yields the zero address and no payload. A memo shorter than an address
/// yields the zero address and the whole memo as payload.
pub fn decode_legacy_memo_hex(message: &str) -> Result<(Address, Vec<u8>)> {
	if message.is_empty() {
		return Ok((Address::zero(), vec![]))
	}

	let data = hex::decode(message).context("Memo should be a hex encoded string")?;
	if data.len() < ADDRESS_LEN {
		return Ok((Address::zero(), data))
	}

	Ok((Address::from_slice(&data[..ADDRESS_LEN]), data[ADDRESS_LEN..].to_vec()))
}

/// The receiver embedded in a memo as a 0x hex string, or "" if there is none.
pub fn parse_memo_receiver(message: &str) -> String {
	match decode_legacy_memo_hex(message) {
		Ok((address, _)) if !address.is_zero() => format!("{address:?}"),
		_ => String::new(),
	}
}
