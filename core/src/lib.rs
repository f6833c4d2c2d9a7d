pub mod deals;
pub mod error;
pub mod funnel;
pub mod launch;
