//! Execution boundary: intent identity, sizing, routing, and the adapter
//! seam behind which a real broker would sit.

pub mod adapter;
pub mod oms;
pub mod router;
