//! Core types for the governor.
//!
//! - [`id`]: identifier types (`UnitId`, `TokenId`, `OwnerId`, `EntanglementId`, `Time`)

pub mod id;

pub use id::{EntanglementId, OwnerId, Time, TokenId, UnitId};
