//! Report computations over pre-aggregated rows from the database
//!
//! Stage assignment depends on per-tenant overrides, so grouping by stage is
//! done here rather than in SQL.

pub mod funnel;
pub mod roi;
