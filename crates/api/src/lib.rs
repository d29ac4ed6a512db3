//! HTTP surface for registering push subscriptions, their lead times and
//! the family members whose milestones they follow.

pub mod routes;
pub mod state;
