mod reading_processor;

pub use reading_processor::*;
