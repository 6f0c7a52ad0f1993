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
use ethers::{types::Address, utils::keccak256};
use secp256k1::{
	ecdsa::{RecoverableSignature, RecoveryId},
	Message, PublicKey, SECP256K1,
};

#[cfg(test)]
use mockall::automock;

/// `[r || s || v]` with `v` the recovery id (0 or 1)
pub type TssSignature = [u8; 65];

/// Handle on the threshold signing ceremony.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait TssSigner: Send + Sync + 'static {
	fn pubkey(&self) -> PublicKey;

	fn evm_address(&self) -> Address;

	/// `height` and `nonce` identify the keysign so that every party signs the same digest.
	async fn sign(
		&self,
		digest: [u8; 32],
		height: u64,
		nonce: u64,
		chain_id: i64,
		optional_pubkey: String,
	) -> Result<TssSignature>;
}

pub fn evm_address_from_pubkey(pubkey: &PublicKey) -> Address {
	let uncompressed = pubkey.serialize_uncompressed();
	Address::from_slice(&keccak256(&uncompressed[1..])[12..])
}

pub fn recover_pubkey(digest: [u8; 32], signature: &TssSignature) -> Result<PublicKey> {
	let recovery_id =
		RecoveryId::from_i32(signature[64] as i32).context("Invalid recovery id")?;
	let signature = RecoverableSignature::from_compact(&signature[..64], recovery_id)
		.context("Invalid compact signature")?;
	SECP256K1
		.recover_ecdsa(&Message::from_digest(digest), &signature)
		.context("Failed to recover public key")
}
