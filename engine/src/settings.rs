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

use std::{
	collections::BTreeMap,
	ffi::OsStr,
	path::{Path, PathBuf},
};

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

pub use anyhow::Result;

use crate::{constants::CONFIG_ENV_PREFIX, types::Chain};

pub const DEFAULT_SETTINGS_FILE: &str = "config/Settings.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Logging {
	/// Emit json lines instead of human readable output
	pub json: bool,
	/// Directive used when `RUST_LOG` is not set
	pub default_directive: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Db {
	/// Each chain gets its own database under this directory
	pub db_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Compliance {
	#[serde(default)]
	pub restricted_addresses: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Zetacore {
	pub chain_id: i64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EvmChain {
	pub chain_id: i64,
	/// Ordered by preference, the first one is tried first
	pub endpoints: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
	pub logging: Logging,
	pub db: Db,
	#[serde(default)]
	pub compliance: Compliance,
	pub zetacore: Zetacore,
	/// Keyed by chain name
	pub evm_chains: BTreeMap<String, EvmChain>,
}

#[derive(Parser, Debug, Clone, Default)]
#[clap(version)]
pub struct CommandLineOptions {
	#[clap(short = 'c', long = "config-path")]
	pub config_path: Option<String>,

	#[clap(long = "config-root", env = "ZETACLIENT_CONFIG_ROOT")]
	pub config_root: Option<String>,

	#[clap(long = "logging.json")]
	pub logging_json: Option<bool>,
	#[clap(long = "logging.default_directive")]
	pub logging_default_directive: Option<String>,

	#[clap(long = "db.db_path")]
	pub db_path: Option<String>,

	#[clap(long = "zetacore.chain_id")]
	pub zetacore_chain_id: Option<i64>,
}

impl Settings {
	/// Settings loaded from the `config_path` in the `CommandLineOptions`, or
	/// `config/Settings.toml` under the config root if none, with overridden values from the
	/// environment and the `CommandLineOptions`.
	pub fn new(opts: CommandLineOptions) -> Result<Self, ConfigError> {
		let settings_file = match &opts.config_path {
			Some(path) => PathBuf::from(path),
			None => PathBuf::from(opts.config_root.clone().unwrap_or_default())
				.join(DEFAULT_SETTINGS_FILE),
		};
		Self::load_settings_from_all_sources(&settings_file, opts)
	}

	pub fn load_settings_from_all_sources(
		settings_file: &Path,
		opts: CommandLineOptions,
	) -> Result<Self, ConfigError> {
		let settings: Settings = Config::builder()
			.add_source(File::with_name(&settings_file.to_string_lossy()))
			.add_source(Environment::with_prefix(CONFIG_ENV_PREFIX).separator("__"))
			.set_override_option("logging.json", opts.logging_json)?
			.set_override_option(
				"logging.default_directive",
				opts.logging_default_directive,
			)?
			.set_override_option("db.db_path", opts.db_path)?
			.set_override_option("zetacore.chain_id", opts.zetacore_chain_id)?
			.build()?
			.try_deserialize()?;

		settings.validate_settings()?;

		Ok(settings)
	}

	pub fn validate_settings(&self) -> Result<(), ConfigError> {
		is_valid_db_path(self.db.db_path.as_path())
			.map_err(|e| ConfigError::Message(e.to_string()))?;

		if !Chain::from_chain_id(self.zetacore.chain_id).is_some_and(|chain| chain.is_zeta_chain())
		{
			return Err(ConfigError::Message(format!(
				"zetacore.chain_id {} is not a known zeta chain",
				self.zetacore.chain_id
			)))
		}

		self.evm_chains()?;

		Ok(())
	}

	/// The configured EVM chains, resolved against the known chain list.
	pub fn evm_chains(&self) -> Result<Vec<(Chain, &EvmChain)>, ConfigError> {
		self.evm_chains
			.iter()
			.map(|(chain_name, evm_chain)| {
				let chain = Chain::from_chain_name(chain_name)
					.filter(|chain| chain.chain_id == evm_chain.chain_id && chain.is_evm_chain())
					.ok_or_else(|| {
						ConfigError::Message(format!(
							"evm_chains.{chain_name} with chain_id {} is not a known EVM chain",
							evm_chain.chain_id
						))
					})?;

				if evm_chain.endpoints.is_empty() {
					return Err(ConfigError::Message(format!(
						"evm_chains.{chain_name} has no endpoints"
					)))
				}
				for endpoint in &evm_chain.endpoints {
					parse_http_url(endpoint).map_err(|e| {
						ConfigError::Message(format!(
							"evm_chains.{chain_name} endpoint is invalid: {e}"
						))
					})?;
				}

				Ok((chain, evm_chain))
			})
			.collect()
	}
}

/// Parse the URL and check that it is a valid http(s) url
pub fn parse_http_url(url: &str) -> Result<Url> {
	let parsed_url = Url::parse(url)?;
	if parsed_url.scheme() != "http" && parsed_url.scheme() != "https" {
		return Err(anyhow::Error::msg("Wrong scheme"))
	}
	if parsed_url.host().is_none() ||
		!parsed_url.username().is_empty() ||
		parsed_url.password().is_some() ||
		parsed_url.fragment().is_some() ||
		parsed_url.cannot_be_a_base()
	{
		return Err(anyhow::Error::msg("Invalid URL data"))
	}

	Ok(parsed_url)
}

fn is_valid_db_path(db_path: &Path) -> Result<()> {
	if db_path.extension() != Some(OsStr::new("db")) {
		return Err(anyhow::Error::msg("Db path does not have '.db' extension"))
	}
	Ok(())
}
