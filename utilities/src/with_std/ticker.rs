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

use crate::make_periodic_tick;

/// A periodic ticker whose interval can be changed while it is in use, for loops whose polling
/// interval is driven by configuration that may change at runtime.
#[derive(Debug)]
pub struct DynamicTicker {
	name: String,
	interval: Duration,
	tick: tokio::time::Interval,
}

impl DynamicTicker {
	pub fn new(name: impl Into<String>, interval: Duration) -> Result<Self, &'static str> {
		if interval.is_zero() {
			return Err("Ticker interval must be non-zero")
		}
		Ok(Self { name: name.into(), interval, tick: make_periodic_tick(interval, false) })
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	pub async fn tick(&mut self) {
		self.tick.tick().await;
	}

	/// Re-arms the ticker if `new_interval` differs from the current one. The next tick is then a
	/// full `new_interval` away. Returns true if the interval changed.
	pub fn update_interval(&mut self, new_interval: Duration) -> bool {
		if new_interval.is_zero() || new_interval == self.interval {
			return false
		}
		self.interval = new_interval;
		self.tick = make_periodic_tick(new_interval, false);
		true
	}
}
