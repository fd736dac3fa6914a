//! Operators that bind device-resident parameters to a fused accelerator
//! primitive.

pub mod conv;
