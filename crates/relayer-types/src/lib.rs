//! Common types shared across the gas station crates.
//!
//! This crate holds the data model of the relayer: transfer requests and their
//! amounts, flow outcomes, endpoint descriptions, status reports, events, and the
//! TOML schema validation used by configuration and account providers.

pub mod chain;
pub mod events;
pub mod flow;
pub mod request;
pub mod status;
pub mod utils;
pub mod validation;

pub use alloy::primitives::{Address, B256, U256};

pub use chain::{BalanceSnapshot, Endpoint, EndpointHealth, EndpointKind, TxHash};
pub use events::GasStationEvent;
pub use flow::{ErrorKind, FailureCause, FlowResult};
pub use request::{parse_token_amount, AmountError, OrderKind, TransferRequest};
pub use status::RelayerStatus;
pub use utils::truncate_hash;
pub use validation::{ConfigSchema, Field, FieldType, Schema, ValidationError};
