pub mod frame;
pub mod scenario;
