pub mod controller;
pub mod observers;
pub mod timer;
