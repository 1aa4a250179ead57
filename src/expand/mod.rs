// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! JSONPath expression expansion and template evaluation.

pub mod jsonpath;
pub mod template;

pub use jsonpath::Expression;
pub use template::{evaluate_template, SecretShape};
