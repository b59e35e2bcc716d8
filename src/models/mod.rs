//! Row types persisted in the flat-file catalogs.
//!
//! Each struct maps to one CSV line; field order is the column order.

pub mod bucket;
pub mod object;
