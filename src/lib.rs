pub mod app;
pub mod catalog;
pub mod config;
pub mod detect;
pub mod domain;
pub mod error;
pub mod normalize;
pub mod output;
pub mod provenance;
pub mod provision;
pub mod registry;
pub mod resolve;
pub mod store;
pub mod table;
pub mod writer;
