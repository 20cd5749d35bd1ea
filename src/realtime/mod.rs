pub mod channel;
pub mod types;

pub use channel::ChangeChannel;
