mod dispatch;
mod inference;

pub use dispatch::{decode_as, decode_auto, encode, DETECTION_ORDER, PREFIX_SIZE};

#[cfg(feature = "parallelism")]
pub use dispatch::decode_many;

pub use inference::{infer_format, infer_from_path, infer_from_stream, SpectrumFileFormat};
