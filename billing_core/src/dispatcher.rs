// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Named-command boundary over a [`BillingSession`].
//!
//! Hosts that receive operations as a method name plus an argument map
//! (a platform method channel, an RPC endpoint) decode them into a
//! [`Command`] and run it here. Results are encoded as JSON values using the
//! wire forms of [`crate::product::Product`] and [`crate::purchase::Purchase`].

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    backend::{BillingBackend, ProductType},
    session::BillingSession,
    Error, ErrorCode,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FetchProducts {
        identifiers: Vec<String>,
        product_type: ProductType,
    },
    FetchPurchases,
    Purchase {
        identifier: String,
        consume: bool,
    },
    FetchSubscriptions,
    Subscribe {
        identifier: String,
    },
    /// Only meaningful for other stores; always answers `null`.
    AppSharedSecret,
}

#[derive(Deserialize)]
struct FetchProductsArgs {
    identifiers: Vec<String>,
    #[serde(rename = "type")]
    product_type: ProductType,
}

#[derive(Deserialize)]
struct PurchaseArgs {
    identifier: String,
    #[serde(default)]
    consume: Option<bool>,
}

#[derive(Deserialize)]
struct SubscribeArgs {
    identifier: String,
}

fn parse<T: DeserializeOwned>(method: &str, args: Value) -> Result<T, Error> {
    serde_json::from_value(args).map_err(|err| Error::InvalidArguments {
        method: method.to_string(),
        reason: err.to_string(),
    })
}

impl Command {
    /// Decodes `method` with its argument map. Unknown methods decode to
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArguments`] if a known method's arguments are
    /// missing or malformed.
    pub fn decode(method: &str, args: Value) -> Result<Option<Command>, Error> {
        let command = match method {
            "fetchProducts" => {
                let args: FetchProductsArgs = parse(method, args)?;
                Command::FetchProducts {
                    identifiers: args.identifiers,
                    product_type: args.product_type,
                }
            }
            "fetchPurchases" => Command::FetchPurchases,
            "purchase" => {
                let args: PurchaseArgs = parse(method, args)?;
                Command::Purchase {
                    identifier: args.identifier,
                    consume: args.consume.unwrap_or(false),
                }
            }
            "fetchSubscriptions" => Command::FetchSubscriptions,
            "subscribe" => {
                let args: SubscribeArgs = parse(method, args)?;
                Command::Subscribe {
                    identifier: args.identifier,
                }
            }
            "appSharedSecret" => Command::AppSharedSecret,
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    pub fn method(&self) -> &'static str {
        match self {
            Command::FetchProducts { .. } => "fetchProducts",
            Command::FetchPurchases => "fetchPurchases",
            Command::Purchase { .. } => "purchase",
            Command::FetchSubscriptions => "fetchSubscriptions",
            Command::Subscribe { .. } => "subscribe",
            Command::AppSharedSecret => "appSharedSecret",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandResponse {
    Success(Value),
    Error { code: ErrorCode, message: String },
    NotImplemented,
}

impl From<Error> for CommandResponse {
    fn from(err: Error) -> Self {
        CommandResponse::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| Error::Encoding {
        source_error_message: err.to_string(),
    })
}

pub struct CommandDispatcher<B> {
    session: Arc<BillingSession<B>>,
}

impl<B> Clone for CommandDispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<B: BillingBackend> CommandDispatcher<B> {
    pub fn new(session: Arc<BillingSession<B>>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<BillingSession<B>> {
        &self.session
    }

    /// Decodes and runs one named operation.
    pub async fn dispatch(&self, method: &str, args: Value) -> CommandResponse {
        let command = match Command::decode(method, args) {
            Ok(Some(command)) => command,
            Ok(None) => return CommandResponse::NotImplemented,
            Err(err) => return err.into(),
        };
        match self.execute(command).await {
            Ok(value) => CommandResponse::Success(value),
            Err(err) => err.into(),
        }
    }

    /// Runs `command` against the session and encodes its result.
    pub async fn execute(&self, command: Command) -> Result<Value, Error> {
        match command {
            Command::FetchProducts {
                identifiers,
                product_type,
            } => encode(self.session.fetch_products(identifiers, product_type).await?),
            Command::FetchPurchases => encode(self.session.fetch_purchases().await?),
            Command::Purchase {
                identifier,
                consume,
            } => encode(self.session.purchase(&identifier, consume).await?),
            Command::FetchSubscriptions => encode(self.session.fetch_subscriptions().await?),
            Command::Subscribe { identifier } => encode(self.session.subscribe(&identifier).await?),
            Command::AppSharedSecret => Ok(Value::Null),
        }
    }
}
