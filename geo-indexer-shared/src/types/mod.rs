pub mod document;
pub mod feature;
pub mod job;
pub mod template;
