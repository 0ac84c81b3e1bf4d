//! The Rust client for Skylab, a remotely-configured feature flag and experiment service.
//!
//! # Overview
//!
//! The client revolves around a [`Client`] that resolves, for a given [`SkylabUser`] and device
//! context, which [`Variant`] of each feature flag applies. All targeting happens on the server:
//! the client sends the user context, caches the returned variants locally and answers
//! [`Client::get_variant()`] synchronously from that cache.
//!
//! ```no_run
//! # use skylab::{ClientConfig, SkylabUser};
//! let client = ClientConfig::from_api_key("api-key")
//!     .fallback_variant("off")
//!     .to_client();
//!
//! // Fetch variants in the background and wait for the outcome.
//! client.start(SkylabUser::new().user_id("user@company.com")).blocking_wait();
//!
//! let variant = client.get_variant("new-onboarding");
//! ```
//!
//! # Building blocks
//!
//! [`VariantCache`](variant_cache::VariantCache) holds the resolved variants. Every successful
//! fetch replaces its contents completely and persists them through a [`Storage`](storage::Storage)
//! implementation. Readers always see a complete snapshot.
//!
//! [`IdentityStore`](identity::IdentityStore) keeps an anonymous
//! [`EnrollmentId`](identity::EnrollmentId) that is sent as the user `id` unless the caller sets
//! one.
//!
//! [`build_context`](context::build_context) assembles the user context from the enrollment id,
//! an optional [`ContextProvider`] and the user's own attributes.
//!
//! [`VariantFetcher`](fetcher::VariantFetcher) sends the context to the server through an
//! [`HttpClient`](http::HttpClient) and parses the response.
//!
//! # Error Handling
//!
//! Variant lookups never fail: when the server has not resolved a flag, the client falls back to
//! the call-site fallback, the configured initial variant and finally the configured fallback
//! variant. Fetch failures are reported as a `false` outcome of the [`FetchHandle`], and leave the
//! cached variants untouched.
//!
//! Lower-level errors are represented by the [`Error`] enum.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `skylab` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into client operations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod context;
pub mod fetcher;
pub mod http;
pub mod identity;
pub mod storage;
pub mod variant_cache;

mod client;
mod config;
mod error;
mod fetch_handle;
mod variant;

pub use client::Client;
pub use config::ClientConfig;
pub use context::{AttributeValue, ContextProvider, SkylabUser, UserContext};
pub use error::{Error, Result};
pub use fetch_handle::FetchHandle;
pub use variant::Variant;
