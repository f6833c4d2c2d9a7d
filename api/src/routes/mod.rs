pub mod deals;
pub mod funnel;
pub mod health;
