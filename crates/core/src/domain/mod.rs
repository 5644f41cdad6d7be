pub mod thread;
pub mod user;
