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

//! Per-chain persistence of the observer state: the last scanned height and the confirmed
//! outbound receipts and transactions.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ethers::types::{Transaction, TransactionReceipt};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use crate::types::Chain;

/// A static length prefix is used on the `DATA_COLUMN`
pub const PREFIX_SIZE: usize = 10;

/// Column family names
// All data is stored in `DATA_COLUMN` with a prefix for key spaces
const DATA_COLUMN: &str = "data";
// This column is for various metadata. No prefix is used.
const METADATA_COLUMN: &str = "metadata";

const RECEIPT_PREFIX: &[u8; PREFIX_SIZE] = b"receipts__";
const TRANSACTION_PREFIX: &[u8; PREFIX_SIZE] = b"txs_______";

const LAST_BLOCK_SCANNED_KEY: &[u8] = b"last_block_scanned";

pub struct RocksDBKeyValueStore {
	db: DB,
}

impl RocksDBKeyValueStore {
	pub fn open(db_path: &Path) -> Result<Self> {
		let column_families = {
			// Use a prefix extractor on the data column
			let mut cfopts_for_prefix = Options::default();
			cfopts_for_prefix
				.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(PREFIX_SIZE));

			[
				ColumnFamilyDescriptor::new(METADATA_COLUMN, Options::default()),
				ColumnFamilyDescriptor::new(DATA_COLUMN, cfopts_for_prefix),
			]
		};

		let open_options = {
			let mut options = Options::default();
			options.create_missing_column_families(true);
			options.create_if_missing(true);
			options
		};

		let db = DB::open_cf_descriptors(&open_options, db_path, column_families)
			.map_err(anyhow::Error::msg)
			.context(format!("Failed to open database at: {}", db_path.display()))?;

		Ok(RocksDBKeyValueStore { db })
	}

	/// Decoded values of a key space, alongside their keys with the prefix stripped.
	pub fn get_data_for_prefix<T: DeserializeOwned>(
		&self,
		prefix: &[u8],
	) -> Result<Vec<(Vec<u8>, T)>> {
		self.db
			.prefix_iterator_cf(get_data_column_handle(&self.db), prefix)
			.map(|result| {
				let (key, value) = result.context("Failed to iterate the data column")?;
				let value = serde_json::from_slice(&value)
					.map_err(|e| anyhow!("Deserialization failure: {}", e))?;
				Ok((Vec::from(&key[PREFIX_SIZE..]), value))
			})
			.collect()
	}

	pub fn put_metadata<V>(&self, key: &[u8], value: V) -> Result<()>
	where
		V: AsRef<[u8]>,
	{
		self.db.put_cf(get_metadata_column_handle(&self.db), key, value).map_err(|e| {
			anyhow::anyhow!("Failed to write metadata to database. Error: {}", e.to_string())
		})
	}

	pub fn get_metadata(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		self.db
			.get_cf(get_metadata_column_handle(&self.db), key)
			.context("Failed to read metadata from database")
	}

	pub fn create_batch(&self) -> KVWriteBatch<'_> {
		KVWriteBatch { db: &self.db, batch: WriteBatch::default() }
	}
}

pub struct KVWriteBatch<'a> {
	db: &'a DB,
	batch: WriteBatch,
}

impl KVWriteBatch<'_> {
	pub fn put_data<T: Serialize>(&mut self, prefix: &[u8], key: &[u8], value: &T) {
		self.batch.put_cf(
			get_data_column_handle(self.db),
			[prefix, key].concat(),
			serde_json::to_vec(value).expect("Serialization is not expected to fail"),
		);
	}

	pub fn write(self) -> anyhow::Result<()> {
		self.db.write(self.batch).context("failed to write batch")
	}
}

fn get_data_column_handle(db: &DB) -> &ColumnFamily {
	get_column_handle(db, DATA_COLUMN)
}

fn get_metadata_column_handle(db: &DB) -> &ColumnFamily {
	get_column_handle(db, METADATA_COLUMN)
}

fn get_column_handle<'a>(db: &'a DB, column_name: &str) -> &'a ColumnFamily {
	db.cf_handle(column_name)
		.unwrap_or_else(|| panic!("Should get column family handle for {column_name}"))
}

/// The observer database of one chain, stored at `{db_path}/{chain_name}`.
pub struct ChainDb {
	kv_db: RocksDBKeyValueStore,
}

impl ChainDb {
	pub fn open_for_chain(db_path: &Path, chain: Chain) -> Result<Self> {
		std::fs::create_dir_all(db_path)
			.context(format!("Failed to create db directory: {}", db_path.display()))?;
		Ok(Self { kv_db: RocksDBKeyValueStore::open(&db_path.join(chain.chain_name))? })
	}

	pub fn last_block_scanned(&self) -> Result<Option<u64>> {
		self.kv_db
			.get_metadata(LAST_BLOCK_SCANNED_KEY)?
			.map(|bytes| {
				bytes
					.try_into()
					.map(u64::from_be_bytes)
					.map_err(|_| anyhow!("Stored last scanned block is not a u64"))
			})
			.transpose()
	}

	pub fn set_last_block_scanned(&self, height: u64) -> Result<()> {
		self.kv_db.put_metadata(LAST_BLOCK_SCANNED_KEY, height.to_be_bytes())
	}

	/// Stores a confirmed outbound under its composite id, atomically.
	pub fn put_confirmed_outbound(
		&self,
		tx_id: &str,
		receipt: &TransactionReceipt,
		transaction: &Transaction,
	) -> Result<()> {
		let mut batch = self.kv_db.create_batch();
		batch.put_data(RECEIPT_PREFIX, tx_id.as_bytes(), receipt);
		batch.put_data(TRANSACTION_PREFIX, tx_id.as_bytes(), transaction);
		batch.write()
	}

	pub fn load_receipts(&self) -> Result<Vec<(String, TransactionReceipt)>> {
		load_key_space(&self.kv_db, RECEIPT_PREFIX)
	}

	pub fn load_transactions(&self) -> Result<Vec<(String, Transaction)>> {
		load_key_space(&self.kv_db, TRANSACTION_PREFIX)
	}
}

fn load_key_space<T: DeserializeOwned>(
	kv_db: &RocksDBKeyValueStore,
	prefix: &[u8],
) -> Result<Vec<(String, T)>> {
	kv_db
		.get_data_for_prefix(prefix)?
		.into_iter()
		.map(|(key, value)| {
			Ok((String::from_utf8(key).context("Stored tx id is not valid utf8")?, value))
		})
		.collect()
}
