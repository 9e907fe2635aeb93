//! Dealerless distributed key generation
//!
//! Every participant runs the same three-round state machine against a
//! shared session store:
//!
//! 1. publish Feldman commitments to a fresh polynomial;
//! 2. once the roster is complete, send every participant (including itself)
//!    its evaluation, encrypted to the receiver's transport key;
//! 3. verify the shares addressed to it, sum the good ones into the final
//!    share and publish a ready marker carrying the key hash.
//!
//! No participant ever holds the aggregate private key.

mod dkg;
mod messages;
pub mod transcript;

#[cfg(test)]
pub(crate) mod testing;

pub use dkg::{check_termination, run_dkg, wait_until_usable, DkgConfig, DkgParticipant, DkgState};
pub use messages::{CommitmentSet, EncryptedShare, ReadyMarker};
pub(crate) use messages::{GroupValue, SharePayload};
