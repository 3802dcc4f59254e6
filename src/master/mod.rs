//! Master registry adapter over XML-RPC

pub mod client;
pub mod xmlrpc;

pub use client::{XmlRpcMaster, XmlRpcMasterConfig};
pub use xmlrpc::XmlRpcValue;
