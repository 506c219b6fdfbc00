use std::io::{Read, Write};

use crate::error::SpecResult;
use crate::io::SpectrumFileFormat;
use crate::spec_file::SpecFile;

/// A reader and writer for one spectrum file format.
///
/// Implementations are stateless unit types so they can sit in the const priority table
/// the auto-detector walks. `matches` must be cheap; `decode` is allowed to fail with
/// [`SpecError::FormatMismatch`](crate::SpecError::FormatMismatch) even when `matches`
/// accepted the prefix.
pub trait SpectrumCodec: Sync {
    fn format(&self) -> SpectrumFileFormat;

    /// A quick structural check on the first bytes of the input
    fn matches(&self, prefix: &[u8]) -> bool;

    /// Decode a whole stream into a cleaned up [`SpecFile`]
    fn decode(&self, stream: &mut dyn Read) -> SpecResult<SpecFile>;

    /// Write the measurements of `file` matching `samples` and `detectors`. Empty filters
    /// select everything.
    fn encode(
        &self,
        file: &SpecFile,
        samples: &[i32],
        detectors: &[String],
        stream: &mut dyn Write,
    ) -> SpecResult<()>;
}

macro_rules! impl_codec {
    ($codec:ident, $format:expr, $is:path, $read:path, $write:path) => {
        #[doc = concat!("The [`SpectrumCodec`](crate::io::SpectrumCodec) for ", stringify!($format))]
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $codec;

        impl $crate::io::SpectrumCodec for $codec {
            fn format(&self) -> $crate::io::SpectrumFileFormat {
                $format
            }

            fn matches(&self, prefix: &[u8]) -> bool {
                $is(prefix)
            }

            fn decode(
                &self,
                stream: &mut dyn std::io::Read,
            ) -> $crate::error::SpecResult<$crate::spec_file::SpecFile> {
                $read(stream)
            }

            fn encode(
                &self,
                file: &$crate::spec_file::SpecFile,
                samples: &[i32],
                detectors: &[String],
                stream: &mut dyn std::io::Write,
            ) -> $crate::error::SpecResult<()> {
                $write(file, samples, detectors, stream)
            }
        }
    };
}

pub(crate) use impl_codec;
