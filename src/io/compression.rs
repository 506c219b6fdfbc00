use std::borrow::Cow;
use std::io::{self, prelude::*};
use std::path;

use flate2::bufread::GzDecoder;

pub fn is_gzipped(header: &[u8]) -> bool {
    header.starts_with(b"\x1f\x8b")
}

pub fn is_gzipped_extension(path: path::PathBuf) -> (bool, path::PathBuf) {
    if let Some(ext) = path.extension() {
        if ext.to_ascii_lowercase() == "gz" {
            (true, path.with_extension(""))
        } else {
            (false, path)
        }
    } else {
        (false, path)
    }
}

/// Inflate `bytes` if they carry a gzip header, otherwise borrow them unchanged
pub fn decompress_if_gzipped(bytes: &[u8]) -> io::Result<Cow<'_, [u8]>> {
    if is_gzipped(bytes) {
        let mut decoder = GzDecoder::new(bytes);
        let mut inflated = Vec::with_capacity(bytes.len() * 4);
        decoder.read_to_end(&mut inflated)?;
        log::debug!(
            "Inflated {} gzipped bytes to {}",
            bytes.len(),
            inflated.len()
        );
        Ok(Cow::Owned(inflated))
    } else {
        Ok(Cow::Borrowed(bytes))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use flate2::{write::GzEncoder, Compression};

    #[test]
    fn test_round_trip() -> io::Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"$SPEC_ID:\nitem\n")?;
        let zipped = encoder.finish()?;
        assert!(is_gzipped(&zipped));
        let inflated = decompress_if_gzipped(&zipped)?;
        assert_eq!(inflated.as_ref(), b"$SPEC_ID:\nitem\n");
        assert!(matches!(
            decompress_if_gzipped(b"plain")?,
            Cow::Borrowed(_)
        ));
        Ok(())
    }

    #[test]
    fn test_extension() {
        let (zipped, stripped) = is_gzipped_extension("a/b.n42.gz".into());
        assert!(zipped);
        assert_eq!(stripped, path::PathBuf::from("a/b.n42"));
    }
}
