pub mod address;
pub mod block;
pub mod cli;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod naming;
pub mod network;
pub mod node;
pub mod plugin;
pub mod refresh;
pub mod rpc;
pub mod scheduler;
pub mod vault;
