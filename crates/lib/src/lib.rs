//! Smart48 relay core: chat command dispatcher, outbound gateway, and HTTP ingress relay
//! used by the `smart48bot` binary.

pub mod channels;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod ingress;
pub mod init;
pub mod outbound;
pub mod templates;
