// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0
#![doc = include_str!("../README.md")]
//! ## Getting started
//!
//! Implement [`backend::BillingBackend`] over your billing SDK (or use
//! [`backend::memory::InMemoryBackend`]), hand its event channel to
//! [`session::BillingSession::spawn_event_loop`], and take a look at the
//! [`session`] module for the operations.

pub mod backend;
mod config;
pub mod consumption;
pub mod correlator;
pub mod dispatcher;
mod error;
pub mod product;
pub mod purchase;
mod response_code;
pub mod session;

pub use config::SessionConfig;
pub use error::{Error, ErrorCode, FlowAction, Result};
pub use response_code::ResponseCode;
