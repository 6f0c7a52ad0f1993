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

use std::{future::Future, time::Duration};

use anyhow::Result;
use ethers::types::H256;
use rand::Rng;
use tracing::{info, warn};

use crate::{
	constants::{BROADCAST_ATTEMPTS, BROADCAST_INITIAL_BACKOFF, BROADCAST_JITTER_MAX_MS},
	types::Chain,
};

/// Whether a broadcast failure should be retried, and whether the transaction should still be
/// reported to the tracker, as `(retry, report)`.
pub fn classify_broadcast_error(error: &anyhow::Error) -> (bool, bool) {
	let message = format!("{error:#}");
	if message.contains("nonce too low") || message.contains("replacement transaction underpriced")
	{
		(false, false)
	} else if message.contains("already known") {
		(false, true)
	} else {
		(true, false)
	}
}

fn jitter() -> Duration {
	Duration::from_millis(rand::thread_rng().gen_range(0..BROADCAST_JITTER_MAX_MS))
}

/// Sends with backoff until a success or a terminal error, calling `report` at most once.
pub async fn broadcast_with_retry<SendFn, Fut>(
	chain: Chain,
	nonce: u64,
	tx_hash: H256,
	mut send: SendFn,
	report: impl FnOnce(),
) where
	SendFn: FnMut() -> Fut,
	Fut: Future<Output = Result<()>>,
{
	let mut backoff = BROADCAST_INITIAL_BACKOFF;
	for attempt in 0..BROADCAST_ATTEMPTS {
		tokio::time::sleep(jitter()).await;

		match send().await {
			Ok(()) => {
				info!(%chain, nonce, ?tx_hash, attempt, "Outbound broadcast");
				report();
				return
			},
			Err(e) => {
				let (retry, should_report) = classify_broadcast_error(&e);
				warn!(%chain, nonce, ?tx_hash, attempt, retry, "Outbound broadcast failed: {e:#}");
				if should_report {
					report();
					return
				}
				if !retry {
					return
				}
				tokio::time::sleep(backoff).await;
				backoff *= 2;
			},
		}
	}
	warn!(%chain, nonce, ?tx_hash, "Giving up broadcasting the outbound");
}
