//! Tillfleet Edge Library
//!
//! The onsite half of claim pairing: a POS server generates its own
//! identity and short-lived claims, and serves the confirm/finalize
//! endpoints the cloud control plane calls during redemption.

pub mod pairing;
pub mod routes;
