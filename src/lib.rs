//! Switchyard - request/reply RPC over message brokers
//!
//! Adds correlated calls with timeouts on top of a fire-and-forget broker:
//! a caller publishes a request carrying a correlation id and a reply
//! address, a responder answers to that address, and the caller's single
//! reply consumer hands each reply to the call waiting for it.

pub mod broker;
pub mod config;
pub mod rpc;
pub mod services;
pub mod utils;

#[cfg(test)]
mod test_utils;
