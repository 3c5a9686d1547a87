pub mod analysis;
pub mod bands;
pub mod decode;
pub mod features;
pub mod fft;
pub mod mic;
pub mod scaler;
pub mod source;
