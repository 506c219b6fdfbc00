use std::{
    fmt::Display,
    fs,
    io::{self, prelude::*, BufReader},
    path,
};

use flate2::bufread::GzDecoder;

use crate::io::{
    chn::is_chn,
    compression::{is_gzipped, is_gzipped_extension},
    csv::is_csv,
    mca::is_mca,
    n42::is_n42,
    pcf::is_pcf,
    spe::is_spe,
};

/// Gamma spectrum file formats that [`gammaspec`](crate) supports
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpectrumFileFormat {
    Chn,
    Pcf,
    N42,
    Mca,
    Spe,
    Csv,
    Unknown,
}

impl SpectrumFileFormat {
    /// The file extension conventionally used for this format
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Chn => Some("chn"),
            Self::Pcf => Some("pcf"),
            Self::N42 => Some("n42"),
            Self::Mca => Some("mca"),
            Self::Spe => Some("spe"),
            Self::Csv => Some("csv"),
            Self::Unknown => None,
        }
    }

    /// Whether a file in this format can hold more than one measurement
    pub fn is_multi_record(&self) -> bool {
        matches!(self, Self::Pcf | Self::N42 | Self::Csv)
    }
}

impl Display for SpectrumFileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Given a path, infer the file format and whether or not the file at that path is
/// GZIP compressed
pub fn infer_from_path<P: Into<path::PathBuf>>(path: P) -> (SpectrumFileFormat, bool) {
    let path: path::PathBuf = path.into();
    let (is_gzipped, path) = is_gzipped_extension(path);
    if let Some(ext) = path.extension() {
        if let Some(ext) = ext.to_ascii_lowercase().to_str() {
            let form = match ext {
                "n42" | "xml" => SpectrumFileFormat::N42,
                "pcf" => SpectrumFileFormat::Pcf,
                "chn" => SpectrumFileFormat::Chn,
                "spe" | "iaea" => SpectrumFileFormat::Spe,
                "mca" => SpectrumFileFormat::Mca,
                "csv" | "txt" | "tsv" => SpectrumFileFormat::Csv,
                _ => SpectrumFileFormat::Unknown,
            };
            (form, is_gzipped)
        } else {
            (SpectrumFileFormat::Unknown, is_gzipped)
        }
    } else {
        (SpectrumFileFormat::Unknown, is_gzipped)
    }
}

/// Given a stream of bytes, infer the file format and whether or not the
/// stream is GZIP compressed. This assumes the stream is seekable.
pub fn infer_from_stream<R: Read + Seek>(
    stream: &mut R,
) -> io::Result<(SpectrumFileFormat, bool)> {
    // Enough for an XML declaration and the opening root tag, and for the PCF header record
    let mut buf = vec![b'\0'; 512];
    let current_pos = stream.stream_position()?;
    let mut bytes_read = 0;
    loop {
        let n = stream.read(&mut buf[bytes_read..])?;
        bytes_read += n;
        if n == 0 || bytes_read == buf.len() {
            break;
        }
    }
    buf.truncate(bytes_read);
    let is_stream_gzipped = is_gzipped(buf.as_slice());
    if is_stream_gzipped {
        // A truncated gzip member is an error for read_to_end, so only inflate as many
        // bytes as were read and keep whatever came out
        let mut decompressed_buf = Vec::with_capacity(bytes_read);
        let mut decoder = GzDecoder::new(io::Cursor::new(buf)).take(bytes_read as u64);
        let mut chunk = [0u8; 128];
        loop {
            match decoder.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => decompressed_buf.extend_from_slice(&chunk[..n]),
            }
        }
        buf = decompressed_buf;
    }
    stream.seek(io::SeekFrom::Start(current_pos))?;

    let format = match &buf {
        _ if is_chn(&buf) => SpectrumFileFormat::Chn,
        _ if is_pcf(&buf) => SpectrumFileFormat::Pcf,
        _ if is_n42(&buf) => SpectrumFileFormat::N42,
        _ if is_mca(&buf) => SpectrumFileFormat::Mca,
        _ if is_spe(&buf) => SpectrumFileFormat::Spe,
        _ if is_csv(&buf) => SpectrumFileFormat::Csv,
        _ => SpectrumFileFormat::Unknown,
    };
    log::debug!("Inferred {format} from a {bytes_read} byte prefix");
    Ok((format, is_stream_gzipped))
}

/// Given a path, infer the file format and whether or not the file at that path is
/// GZIP compressed, using both the file name and by trying to open and read the file
/// header
pub fn infer_format<P: Into<path::PathBuf>>(path: P) -> io::Result<(SpectrumFileFormat, bool)> {
    let path: path::PathBuf = path.into();

    let (format, is_gzipped) = infer_from_path(&path);
    match format {
        SpectrumFileFormat::Unknown => {
            let handle = fs::File::open(path.clone())?;
            let mut stream = BufReader::new(handle);
            let (format, is_gzipped) = infer_from_stream(&mut stream)?;
            Ok((format, is_gzipped))
        }
        _ => Ok((format, is_gzipped)),
    }
}
