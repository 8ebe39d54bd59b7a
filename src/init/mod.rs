pub mod args;
pub mod tail_receiver;
