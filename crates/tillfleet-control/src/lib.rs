//! Tillfleet Control Plane Library
//!
//! The cloud side of the onsite-node fleet:
//! - SQLite storage for the reseller/tenant/store/node hierarchy and the
//!   remote action queue
//! - Operator scope resolution and JWT authentication
//! - Claim redemption against onsite servers
//! - Node credential issuance and rotation
//! - Impersonation link issuance
//! - HTTP API for operators and onsite agents

pub mod auth;
pub mod claim;
pub mod dispatch;
pub mod impersonation;
pub mod scope;
pub mod server;
pub mod storage;
