pub mod channel;
pub mod command;
