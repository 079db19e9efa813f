// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Model-facing side of the pipeline: prompt assembly, provider clients,
//! and extraction of the snippet from chatty model output. Providers are
//! handed to the session explicitly; there is no process-global active
//! provider.

pub mod prompt;
pub mod providers;
pub mod utils;

pub use prompt::PromptBuilder;
pub use providers::{ModelProvider, OllamaProvider, OpenAIProvider};
pub use utils::extract_snippet;
