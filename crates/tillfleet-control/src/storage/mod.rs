//! SQLite storage for the Tillfleet control plane.

mod db;
mod models;
mod queries;
mod queries_actions;


pub use db::ControlDatabase;
pub use models::{Account, ClaimUse, Node, RemoteAction, Reseller, Store, Tenant};
pub use queries::{ClaimRedemptionParams, NewNodeParams, NewStoreParams};
pub use queries_actions::{ActionListQuery, NewActionParams};
