pub mod frame;
pub mod messages;
pub mod packet;
pub mod server;
pub mod session;
