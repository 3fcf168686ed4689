// Copyright (c) 2026 MeshStealth Contributors. MIT License.
// See LICENSE for details.

//! # MeshStealth Protocol
//!
//! Private payments between phones that may have no internet at all.
//!
//! A recipient publishes one meta-address. Every payment to it lands on a
//! fresh one-time address that nobody else can link back to the recipient,
//! optionally hardened with ML-KEM-768 against a future quantum adversary.
//! The payment itself hops phone to phone over a store-and-forward mesh,
//! carrying a transfer pre-signed against a durable nonce so that whichever
//! party reaches connectivity first can put it on the ledger.
//!
//! ## Architecture
//!
//! - **stealth**: meta-addresses, derivation, scanning, raw-scalar signing.
//! - **mesh**: TTL-bounded flooding with dedup and store-and-forward relay.
//! - **settlement**: durable nonce pool, payload format, pending payments,
//!   and the engine that broadcasts them.
//! - **payment**: sender and receiver glue over the three above.
//! - **ledger**: transaction codec and the async ledger client seam.
//! - **crypto**: curve, KEM, hashing, AEAD and wallet key primitives.
//! - **storage**: the key-value seam the host platform fills in.
//! - **config**: protocol constants and the aggregate runtime config.
//! - **telemetry**: an optional `tracing` subscriber for embedding apps.
//!
//! ## Ground Rules
//!
//! 1. Ownership of a one-time address is only ever confirmed by point
//!    comparison. The view tag is a filter.
//! 2. Not-mine is a value, never an error.
//! 3. No lock is held across an `.await`.

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod mesh;
pub mod payment;
pub mod settlement;
pub mod stealth;
pub mod storage;
pub mod telemetry;

pub use config::CoreConfig;
pub use mesh::{MeshMessage, MeshNode, MeshTransport};
pub use payment::{OfflinePaymentBuilder, PaymentInbox};
pub use settlement::{NoncePool, PendingPaymentStore, SettlementEngine, StealthPaymentPayload};
pub use stealth::{derive_auto, scan, scan_batch, MetaAddress, StealthKeyPair};
