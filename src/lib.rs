//! Library crate for portsweep: concurrent TCP port probing with connect and
//! raw strategies, streamed results and cancellation.
pub mod error;
pub mod events;
pub mod netdetect;
pub mod nmap;
pub mod ports;
pub mod probe;
pub mod raw;
pub mod scanner;
pub mod server;
pub mod session;
pub mod targets;
pub mod tasks;
pub mod types;
