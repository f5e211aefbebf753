//! Shared domain types for the token risk audit pipeline: risk codes,
//! verdicts, the on-chain verdict encoding, and the progress-event vocabulary.

pub mod audit;
pub mod calldata;
pub mod config;
pub mod error;
pub mod risk;
pub mod rpc;
pub mod rpc_client;
pub mod source;
pub mod stream;
pub mod wait;
