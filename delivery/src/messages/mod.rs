pub mod internal_messages;
pub mod ui_messages;

pub use internal_messages::*;
pub use ui_messages::*;
