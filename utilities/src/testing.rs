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

use std::{collections::BTreeMap, fmt, path::PathBuf};

use tempfile::{self, TempDir};
use tracing::{
	field::{Field, Visit},
	Level,
};
use tracing_subscriber::Layer;

/// Create a temp directory that will be deleted when `TempDir` is dropped.
/// Also returns the path to a non-existent file in the directory.
pub fn new_temp_directory_with_nonexistent_file() -> (TempDir, PathBuf) {
	let tempdir = tempfile::TempDir::new().unwrap();
	let tempfile = tempdir.path().to_owned().join("file");
	assert!(!tempfile.exists());
	(tempdir, tempfile)
}

/// Run at the start of a unit test to print the engine's tracing logs in a readable format.
/// Only the first call in a test binary installs it.
pub fn init_test_logger() {
	use tracing_subscriber::{
		prelude::__tracing_subscriber_SubscriberExt, registry, util::SubscriberInitExt,
	};

	let _ = registry().with(TestLoggerLayer).try_init();
}

struct TestLoggerLayer;

impl<S> Layer<S> for TestLoggerLayer
where
	S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
	fn on_event(
		&self,
		event: &tracing::Event<'_>,
		_ctx: tracing_subscriber::layer::Context<'_, S>,
	) {
		let target = event.metadata().target();
		if !target.starts_with("zetaclient") && target != "compliance" {
			return
		}

		let mut visitor = FieldCollector::default();
		event.record(&mut visitor);

		let level_color = match *event.metadata().level() {
			Level::ERROR => "[0;31m",
			Level::WARN => "[0;33m",
			Level::INFO => "[0;36m",
			Level::DEBUG => "[0;32m",
			Level::TRACE => "[0;35m",
		};

		println!(
			"\x1b{level_color}[{}]\x1b[0m {} ({target})",
			event.metadata().level().as_str(),
			visitor.message,
		);
		for (key, value) in visitor.fields {
			println!("    \x1b[0;34m|\x1b[0m {key} = {value}");
		}
	}
}

#[derive(Default)]
struct FieldCollector {
	message: String,
	fields: BTreeMap<String, String>,
}

impl Visit for FieldCollector {
	fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
		if field.name() == "message" {
			self.message = format!("{value:?}");
		} else {
			self.fields.insert(field.name().to_string(), format!("{value:?}"));
		}
	}
}
