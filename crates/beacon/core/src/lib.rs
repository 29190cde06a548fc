pub mod digest;
pub mod tracer;
