//! smsgate - send coordination for one-time-code SMS
//!
//! Every outbound message passes a multi-dimensional rate limiter (per phone
//! per minute/hour/day, per device and per IP per day) and a per-business
//! daily quota before a pluggable provider transmits it. Providers can be
//! wrapped with a retry policy that separates transient failures from
//! permanent ones. All counters live in a shared [`store::CounterStore`].

pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod ratelimit;
pub mod store;

pub use client::{Client, ClientBuilder};
pub use context::{CancelHandle, Context};
pub use error::{ProviderError, Result, SmsError};
pub use message::{
    MessageStatus, SendRequest, SendResponse, StatusResponse, VerifyRequest, VerifyResponse,
};
pub use provider::Provider;
