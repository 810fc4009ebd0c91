//! Inbound side: TCP listener, connection limit, HTTP/1.1 via hyper, and the
//! translation between hyper requests/responses and the proxy types.

pub mod master;
pub mod worker;

pub use master::Master;
pub use worker::RequestLimits;
