pub mod frame_encoder;
pub mod tracing;

pub use frame_encoder::*;
pub use self::tracing::init_tracing;
