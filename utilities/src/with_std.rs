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

use core::time::Duration;

mod ticker;
pub use ticker::DynamicTicker;

pub fn clean_hex_address<const LEN: usize>(address_str: &str) -> Result<[u8; LEN], &'static str> {
	let address_hex_str = match address_str.strip_prefix("0x") {
		Some(address_stripped) => address_stripped,
		None => address_str,
	};

	let address: [u8; LEN] = hex::decode(address_hex_str)
		.map_err(|_| "Invalid hex")?
		.try_into()
		.map_err(|_| "Invalid address length")?;

	Ok(address)
}

pub fn clean_eth_address(dirty_eth_address: &str) -> Result<[u8; 20], &'static str> {
	clean_hex_address(dirty_eth_address)
}

#[test]
fn cleans_eth_address() {
	// fail too short
	let input = "0x323232";
	assert!(clean_eth_address(input).is_err());

	// fail invalid chars
	let input = "0xZ29aB9EbDb421CE48b70zetaa6e9a3DBD609C5";
	assert!(clean_eth_address(input).is_err());

	// success with 0x
	let input = "0xB29aB9EbDb421CE48b70699758a6e9a3DBD609C5";
	assert!(clean_eth_address(input).is_ok());

	// success without 0x
	let input = "B29aB9EbDb421CE48b70699758a6e9a3DBD609C5";
	assert!(clean_eth_address(input).is_ok());
}

/// Unwraps an `Ok`, panicking with the expression and the error otherwise.
#[macro_export]
macro_rules! assert_ok {
	($result:expr) => {
		match $result {
			Ok(value) => value,
			Err(error) => panic!("expected Ok from '{}', got Err({:?})", stringify!($result), error),
		}
	};
}

/// Unwraps an `Err`, panicking with the expression and the value otherwise.
#[macro_export]
macro_rules! assert_err {
	($result:expr) => {
		match $result {
			Err(error) => error,
			Ok(value) => panic!("expected Err from '{}', got Ok({:?})", stringify!($result), value),
		}
	};
}

/// Makes a tick that outputs every duration and if ticks are "missed" (as tick() wasn't called for
/// some time) it will immediately output a single tick on the next call to tick() and resume
/// ticking every duration.
///
/// The supplied duration should be >> 5ms due to the underlying implementation of
/// [Interval::poll_tick].
pub fn make_periodic_tick(duration: Duration, yield_immediately: bool) -> tokio::time::Interval {
	let mut interval = tokio::time::interval_at(
		tokio::time::Instant::now() + if yield_immediately { Duration::ZERO } else { duration },
		duration,
	);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	interval
}
