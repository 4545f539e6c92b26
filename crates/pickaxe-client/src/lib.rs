pub mod apply;

pub use apply::{ApplyError, ClientWorld};
