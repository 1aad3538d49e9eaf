pub mod activity;
pub mod agent;
pub mod email;
pub mod instructions;
pub mod message;
pub mod negotiation;
pub mod product;
pub mod summary;
pub mod supplier;
