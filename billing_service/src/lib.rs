// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod error_codes;
pub mod events;
pub mod jsonrpsee_helpers;
pub mod metrics;
pub mod server;
