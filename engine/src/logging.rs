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
use tracing_subscriber::EnvFilter;

use crate::settings::Logging;

// ==== Logging targets ====
pub const COMPLIANCE_TARGET: &str = "compliance";

// ==== Loop names, used as the `loop_name` span field ====
pub const INBOUND_LOOP: &str = "observe_inbound";
pub const INBOUND_TRACKER_LOOP: &str = "observe_inbound_trackers";
pub const OUTBOUND_LOOP: &str = "observe_outbound";
pub const GAS_PRICE_LOOP: &str = "post_gas_price";
pub const RPC_STATUS_LOOP: &str = "check_rpc_status";

fn env_filter(settings: &Logging) -> Result<EnvFilter> {
	Ok(EnvFilter::builder()
		.with_default_directive(
			settings
				.default_directive
				.parse()
				.context(format!("Invalid log directive: {}", settings.default_directive))?,
		)
		.from_env_lossy())
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the configured directive.
pub fn init(settings: &Logging) -> Result<()> {
	let builder = tracing_subscriber::fmt().with_env_filter(env_filter(settings)?);

	if settings.json {
		builder.json().try_init()
	} else {
		builder.try_init()
	}
	.map_err(|e| anyhow::anyhow!("Failed to install the tracing subscriber: {e}"))
}
