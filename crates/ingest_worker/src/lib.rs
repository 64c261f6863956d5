pub mod domain;
pub mod handoff;
pub mod ingest_worker;
pub mod mqtt;

pub use domain::*;
pub use handoff::*;
pub use ingest_worker::*;
pub use mqtt::*;
