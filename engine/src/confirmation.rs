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

/// A transaction included at `receipt_height` is final once `confirmations` blocks are built
/// on top of it, counting its own block as the first.
pub fn has_enough_confirmations(
	receipt_height: u64,
	current_height: u64,
	confirmations: u64,
) -> bool {
	current_height >= receipt_height.saturating_add(confirmations)
}

/// The highest height considered final at `tip`, if there is one.
pub fn confirmed_height(tip: u64, confirmations: u64) -> Option<u64> {
	tip.checked_sub(confirmations)
}
