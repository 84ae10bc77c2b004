pub mod auth;
pub mod config;
pub mod eligibility;
pub mod generator;
pub mod ledger;
pub mod publisher;
pub mod run;
pub mod source;
pub mod tables;

pub const PROJECT_NAME: &str = "linkpost-bot";
