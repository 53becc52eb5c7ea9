pub mod callback;
pub mod cli;
pub mod collab;
pub mod config;
pub mod correlation;
pub mod error;
pub mod guard;
pub mod intake;
pub mod ledger;
pub mod maintenance;
pub mod relay;
pub mod util;
