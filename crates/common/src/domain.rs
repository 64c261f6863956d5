mod raw_message;
mod reading;
mod result;
mod sink;

pub use raw_message::*;
pub use reading::*;
pub use result::*;
pub use sink::*;
