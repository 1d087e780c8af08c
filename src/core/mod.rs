pub mod controller;

pub use controller::{ModeController, RunState};
