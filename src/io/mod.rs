//! Reading and writing gamma spectrum file formats and detecting which one a file is in.
//!
//! Every format lives in its own module with an `is_<format>` prefix check, a
//! `read_<format>` decoder, a `write_<format>` encoder and a unit type implementing
//! [`SpectrumCodec`]. [`decode_auto`] walks [`DETECTION_ORDER`] to pick one.
//!
//! | Format | Records | Round trip |
//! |--------|---------|------------|
//! | N42-2012 XML | many | lossless |
//! | GADRAS PCF | many | lossless for the fields it stores |
//! | Ortec CHN | one | lossy |
//! | IAEA SPE | one | lossy |
//! | Amptek MCA | one | lossy |
//! | CSV | many | counts and calibration only |

pub(crate) mod traits;
pub(crate) mod utils;

pub mod chn;
pub mod compression;
pub mod csv;
mod infer_format;
pub mod mca;
pub mod n42;
pub mod pcf;
pub mod spe;

pub use crate::io::infer_format::{
    decode_as, decode_auto, encode, infer_format, infer_from_path, infer_from_stream,
    SpectrumFileFormat, DETECTION_ORDER, PREFIX_SIZE,
};

#[cfg(feature = "parallelism")]
pub use crate::io::infer_format::decode_many;

pub use crate::io::traits::SpectrumCodec;

pub use crate::io::chn::{read_chn, write_chn, ChnCodec};
pub use crate::io::csv::{read_csv, write_csv, CsvCodec};
pub use crate::io::mca::{read_mca, write_mca, McaCodec};
pub use crate::io::n42::{read_n42, write_n42, N42Codec};
pub use crate::io::pcf::{read_pcf, write_pcf, PcfCodec};
pub use crate::io::spe::{read_spe, write_spe, SpeCodec};
