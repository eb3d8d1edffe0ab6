//! Authentication and authorization services

pub mod evaluator;
pub mod permission;
pub mod pipeline;
pub mod policy;
pub mod token;
