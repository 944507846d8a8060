//! Trading rules and order validation.

mod config;
pub mod validator;

pub use config::ExchangeRules;
