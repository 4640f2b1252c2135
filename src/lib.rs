//! NPC document generation pipeline.
//!
//! An API server queues generation jobs on NPC entities; a worker turns each
//! job into an XML document through an AI chat-completion provider and stores
//! it in R2. Clients follow a job through the status endpoint, optionally with
//! [`client::StatusPoller`].

pub mod app_state;
pub mod client;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
