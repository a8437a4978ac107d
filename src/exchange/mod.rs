pub mod client;

pub use client::{ExchangeClient, HttpExchangeClient, OrderResult, Position, ShadowExchangeClient};
