//! # Doublelock Core
//!
//! Dealerless threshold key management over a prime-order elliptic curve.
//!
//! This crate provides:
//! - Distributed Key Generation (DKG) with Feldman VSS and no trusted dealer
//! - Threshold ECIES: encrypt once, decrypt with any `t` of `n` share holders
//! - A hierarchical group policy ("double lock") that additionally requires
//!   an outer threshold of named groups and a veto group
//!
//! ## Protocol Overview
//!
//! Participants coordinate only through an append-only session store (the
//! [`store::SessionStore`] trait). Each runs three rounds: publish
//! commitments, send encrypted shares, verify and finalize. The aggregate key
//! `Q = d G` is public; `d` itself is never assembled anywhere.
//!
//! ## Example
//!
//! ```rust,ignore
//! use doublelock_core::{ecies, keygen, Curve, TransportKeyPair};
//!
//! let curve = Curve::secp256k1();
//! let transport = TransportKeyPair::generate(curve, &mut rng)?;
//! let share = keygen::run_dkg(curve, &store, &session_id, "alice", transport, config, &mut rng).await?;
//!
//! let envelope = ecies::encrypt(curve, &share.public_key, b"message", b"aad", &mut rng)?;
//! let partial = ecies::partial_decrypt(curve, &share, &envelope)?;
//! ```

pub mod ec;
pub mod ecies;
pub mod error;
pub mod keygen;
pub mod policy;
pub mod seal;
pub mod store;
pub mod transport;
pub mod types;
pub mod vss;

pub use ec::{Curve, Point};
pub use error::{Error, ErrorClass, Result};
pub use keygen::{run_dkg, DkgConfig, DkgParticipant, DkgState};
pub use policy::GroupPolicy;
pub use store::{MemoryStore, SessionStore};
pub use transport::TransportKeyPair;
pub use types::{
    Envelope, GroupShare, KeyShare, Participant, ParticipantIndex, SessionId, SessionInfo,
    SessionParams, SessionState,
};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
