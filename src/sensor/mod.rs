pub mod codec;
pub mod types;

pub use codec::Sensor;
pub use types::{ErrorFlag, KeyPressType, KeyPressed, Measurement, MeasurementType, Prior, Value, WindDirection};
