pub mod wav;

pub use wav::{WavData, WavError};
