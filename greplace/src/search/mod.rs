mod bytes;
mod engine;
mod processor;
mod text;

pub use engine::{run, run_collect};
