/// `sox/` — runtime-loaded libsox bindings
///
/// `ffi` declares the C ABI, `library` opens it, `handles` wraps every native
/// object in its own type, `sample` holds the conversion and metering math.
pub mod error;
pub mod ffi;
pub mod handles;
pub mod library;
pub mod sample;

pub use error::SoxError;
pub use handles::{
    EffectArg, Effect, EffectHandler, EffectsChain, EncodingInfo, Format, SampleBuffer,
    SignalInfo,
};
pub use library::{Sox, SoxLoader};
pub use sample::{levels, sample_to_f32, sample_to_f64, Levels};
