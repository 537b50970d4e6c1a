use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gzip" => Ok(Compression::Gzip),
            _ => Err(format!("unsupported compression: {}", s)),
        }
    }
}

pub fn open_file_for_write<P: AsRef<Path>>(
    filename: P,
    compression: Option<Compression>,
) -> Result<Box<dyn Write + Send>> {
    let buffer = BufWriter::new(
        File::create(&filename)
            .with_context(|| format!("cannot create file: {}", filename.as_ref().display()))?,
    );
    let writer: Box<dyn Write + Send> = match compression {
        None => Box::new(buffer),
        Some(Compression::Gzip) => {
            Box::new(flate2::write::GzEncoder::new(buffer, flate2::Compression::new(6)))
        }
    };
    Ok(writer)
}

/// Open a file, transparently decompressing gzip input.
pub fn open_file_for_read<P: AsRef<Path>>(filename: P) -> Result<Box<dyn std::io::Read>> {
    let path = filename.as_ref();
    let open = |p: &Path| File::open(p).with_context(|| format!("cannot open file: {}", p.display()));
    let reader: Box<dyn std::io::Read> =
        if flate2::read::MultiGzDecoder::new(open(path)?).header().is_some() {
            Box::new(flate2::read::MultiGzDecoder::new(open(path)?))
        } else {
            Box::new(open(path)?)
        };
    Ok(reader)
}

/// Human-readable resolution used in output file names, e.g. `10kb`, `1Mb`.
pub fn nice_resolution(resolution: u64) -> String {
    if resolution % 1_000_000 == 0 {
        format!("{}Mb", resolution / 1_000_000)
    } else if resolution % 1_000 == 0 {
        format!("{}kb", resolution / 1_000)
    } else {
        format!("{}bp", resolution)
    }
}
