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

use std::time::Duration;

// ======= Evm Rpc Client =======

/// Duration before we timeout an HTTP request to an EVM node
pub const EVM_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ======= Inbound =======

/// Maximum number of blocks scanned by one inbound tick
pub const MAX_BLOCKS_PER_PERIOD: u64 = 100;

/// Messages carrying this payload are gifts to the TSS and are never voted on
pub const DONATION_MESSAGE: &str = "I am rich!";

/// Retry gas limit of a message passing (ZetaSent) vote, used once the ballot finalizes
pub const POST_VOTE_INBOUND_MESSAGE_PASSING_EXECUTION_GAS_LIMIT: u64 = 1_000_000;

/// Retry gas limit of deposit and native transfer votes, used once the ballot finalizes
pub const POST_VOTE_INBOUND_EXECUTION_GAS_LIMIT: u64 = 1_500_000;

/// Gas limit of any inbound vote transaction
pub const POST_VOTE_INBOUND_GAS_LIMIT: u64 = 400_000;

/// Gas limit granted on the coordinating chain to the inbound call of a native transfer
pub const INBOUND_NATIVE_TRANSFER_GAS_LIMIT: u64 = 90_000;

// ======= Outbound =======

/// Timeout on the transaction lookup made while confirming an outbound candidate
pub const CHECK_CONFIRMED_TX_TIMEOUT: Duration = Duration::from_secs(3);

/// Gas limit of a plain value transfer
pub const NATIVE_TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Bounds applied to the gas limit requested by a CCTX
pub const MIN_OUTBOUND_GAS_LIMIT: u64 = 100_000;
pub const MAX_OUTBOUND_GAS_LIMIT: u64 = 1_000_000;

pub const GWEI: u64 = 1_000_000_000;

// ======= Admin commands =======

/// Relayed message of a command CCTX: `"{command}:{params}"`
pub const CMD_WHITELIST_ERC20: &str = "cmd_whitelist_erc20";
pub const CMD_MIGRATE_TSS_FUNDS: &str = "cmd_migrate_tss_funds";

// ======= Broadcast =======

pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(1);

pub const BROADCAST_ATTEMPTS: u32 = 5;

pub const BROADCAST_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound (exclusive, in milliseconds) of the random delay before each broadcast
pub const BROADCAST_JITTER_MAX_MS: u64 = 1500;

// ======= Outbound tracker reporter =======

pub const OUTBOUND_INCLUSION_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long the reporter waits for a broadcast transaction to be included
pub const OUTBOUND_INCLUSION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// How long the reporter keeps retrying the tracker update
pub const TRACKER_REPORT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Average block time of the coordinating chain
pub const ZETA_BLOCK_TIME: Duration = Duration::from_millis(6500);

// ======= Gas price =======

/// Supply reported alongside the gas price, kept for compatibility with the vote message
pub const GAS_PRICE_SUPPLY: &str = "100";

// ======= RPC status =======

pub const RPC_STATUS_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// The latest header is considered stale beyond this age
pub const RPC_ALERT_LATENCY: Duration = Duration::from_secs(100);

// ======= Caches =======

pub const BLOCK_CACHE_SIZE: usize = 1000;

pub const HEADER_CACHE_SIZE: usize = 1000;

// ======= Settings environment variables =======

/// Prefix of the environment variables overriding the settings file
pub const CONFIG_ENV_PREFIX: &str = "ZETACLIENT";

/// Suffix of the per-chain environment variable overriding the inbound scan start height
pub const SCAN_FROM_ENV_SUFFIX: &str = "_SCAN_FROM";

/// Value of the scan override meaning "start from the current tip"
pub const SCAN_FROM_LATEST: &str = "latest";
