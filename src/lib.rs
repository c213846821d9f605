pub mod check;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod outcome;
pub mod probe;
pub mod sink;
pub mod table;
pub mod target;
pub mod worker;
