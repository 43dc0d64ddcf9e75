pub mod audit;
pub mod broker;
pub mod cache;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod duration;
pub mod help;
pub mod lockout;
pub mod prompt;
pub mod storage;
pub mod store;

pub use broker::{CredentialBroker, ResolveError, ResolveOptions};
