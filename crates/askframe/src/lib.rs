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

//! Natural-language question answering over in-memory tabular data.
//!
//! A query is classified, turned into a snippet of a small expression
//! language by a model provider, statically validated against an
//! allow-list, and evaluated inside a gas-metered, time-bounded namespace
//! that only holds dataset snapshots and curated helper functions. Failed
//! attempts feed their diagnostics back into the next generation round.

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod error;
pub mod exec;
pub mod lang;
pub mod llm;
pub mod session;
pub mod validate;

pub use classifier::{ClassificationResult, QueryCategory, QueryClassifier};
pub use config::AskConfig;
pub use dataset::{Column, DataFrame, DataType, DatasetRegistry};
pub use error::{AskError, AskResult};
pub use exec::{ExecutionResult, ExecutionStatus, Executor};
pub use session::{AttemptRecord, HistoryLog, Session, SessionOutcome, SessionStatus};
pub use validate::{SnippetValidator, ValidationReport, Violation, ViolationKind};
