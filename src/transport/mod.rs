//! Outbound transports.
//!
//! Currently a single relay: motor commands forwarded to the controller that
//! sits next to the camera.

pub mod motor;

pub use motor::{MotorDirection, MotorError, MotorProxy, MotorSettings};
