use crate::io::cube::SpectralCube;
use crate::io::envi::{envi_header, EnviHeader, HeaderValue};
use crate::types::{CwcError, CwcResult, LineRange, RasterShape, FILL_VALUE};
use ndarray::ArrayView1;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Header keys describing the input product that do not carry over to the single-band output
const STRIPPED_KEYS: [&str; 11] = [
    "emit pge input files",
    "wavelength",
    "fwhm",
    "band names",
    "bbl",
    "wavelength units",
    "default bands",
    "data gain values",
    "data offset values",
    "data reflectance gain values",
    "data reflectance offset values",
];

const F32_SIZE: usize = std::mem::size_of::<f32>();

/// Derive the output header from the input cube's metadata
pub fn derive_output_header(input: &EnviHeader, description: &str) -> EnviHeader {
    let mut header = input.clone();
    for key in STRIPPED_KEYS {
        header.remove(key);
    }
    header.set("interleave", "bil");
    header.set("bands", "1");
    header.set("description", HeaderValue::List(vec![description.to_string()]));
    header.set("data type", "4");
    header.set("byte order", "0");
    header.set("header offset", "0");
    header.set("data ignore value", format!("{}", FILL_VALUE));
    header
}

/// Single-band BIL float32 output raster shared by all workers
#[derive(Debug, Clone)]
pub struct OutputRaster {
    path: PathBuf,
    shape: RasterShape,
}

impl OutputRaster {
    /// Create (or overwrite) the output with every pixel at the fill value
    pub fn create<P: AsRef<Path>>(path: P, header: &EnviHeader) -> CwcResult<Self> {
        let path = path.as_ref().to_path_buf();
        let shape = header.shape()?;
        if shape.bands != 1 {
            return Err(CwcError::Header(format!(
                "Output raster must have a single band, header declares {}",
                shape.bands
            )));
        }

        header.write(envi_header(&path))?;

        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        let fill_line: Vec<u8> = std::iter::repeat(FILL_VALUE.to_le_bytes())
            .take(shape.samples)
            .flatten()
            .collect();
        for _ in 0..shape.lines {
            writer.write_all(&fill_line)?;
        }
        writer.flush()?;

        log::info!("Created output raster {} ({})", path.display(), shape);
        Ok(Self { path, shape })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shape(&self) -> RasterShape {
        self.shape
    }

    /// Open an independent writer restricted to `range`
    pub fn line_writer(&self, range: LineRange) -> CwcResult<LineWriter> {
        LineWriter::open(&self.path, self.shape, range)
    }
}

/// Per-worker write handle; it refuses any line outside its own partition
pub struct LineWriter {
    file: File,
    shape: RasterShape,
    range: LineRange,
}

impl LineWriter {
    pub fn open<P: AsRef<Path>>(path: P, shape: RasterShape, range: LineRange) -> CwcResult<Self> {
        if range.stop > shape.lines {
            return Err(CwcError::OutOfRange {
                line: range.stop.saturating_sub(1),
                range: LineRange::new(0, shape.lines),
            });
        }
        let file = OpenOptions::new().write(true).open(path.as_ref())?;
        Ok(Self { file, shape, range })
    }

    pub fn range(&self) -> LineRange {
        self.range
    }

    /// Write one full line of results at its absolute position in the file
    pub fn write_line(&mut self, line: usize, values: ArrayView1<f32>) -> CwcResult<()> {
        if !self.range.contains(line) {
            return Err(CwcError::OutOfRange {
                line,
                range: self.range,
            });
        }
        if values.len() != self.shape.samples {
            return Err(CwcError::InvalidFormat(format!(
                "Line {} has {} values, raster has {} samples",
                line,
                values.len(),
                self.shape.samples
            )));
        }

        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let offset = (line * self.shape.samples * self.shape.bands * F32_SIZE) as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }
}

/// Fill-value census of an existing output raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillStatus {
    pub total: usize,
    pub filled: usize,
}

impl FillStatus {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.filled == 0
    }
}

/// Count fill values in an existing output; reads the data, not just the file's presence
pub fn fill_status<P: AsRef<Path>>(path: P) -> CwcResult<FillStatus> {
    let raster = SpectralCube::open(path)?;
    let mut status = FillStatus {
        total: raster.shape().values(),
        filled: 0,
    };
    raster.for_each_value(|v| {
        if v == FILL_VALUE {
            status.filled += 1;
        }
    });
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn output_header(lines: usize, samples: usize) -> EnviHeader {
        let mut input = EnviHeader::new();
        input.set("samples", samples.to_string());
        input.set("lines", lines.to_string());
        input.set("bands", "5");
        input.set("data type", "4");
        input.set("interleave", "bip");
        input.set("wavelength", HeaderValue::List(vec!["850".into(); 5]));
        input.set("emit pge input files", HeaderValue::List(vec!["a.nc".into()]));
        input.set("map info", HeaderValue::List(vec!["UTM".into(), "1".into()]));
        input.set("default bands", HeaderValue::List(vec!["3".into(), "2".into(), "1".into()]));
        for key in [
            "data gain values",
            "data offset values",
            "data reflectance gain values",
            "data reflectance offset values",
        ] {
            input.set(key, HeaderValue::List(vec!["1".into(); 5]));
        }
        derive_output_header(&input, "test product")
    }

    #[test]
    fn test_derived_header() {
        let header = output_header(4, 2);
        assert_eq!(header.shape().unwrap(), RasterShape::new(4, 2, 1));
        assert_eq!(header.get("interleave"), Some(&HeaderValue::from("bil")));
        assert!(!header.contains_key("emit pge input files"));
        assert!(!header.contains_key("wavelength"));
        // per-band keys would reference bands the output does not have
        for key in STRIPPED_KEYS {
            assert!(!header.contains_key(key), "{} carried over", key);
        }
        assert!(header.contains_key("map info"));
        assert_eq!(
            header.get("description"),
            Some(&HeaderValue::List(vec!["test product".to_string()]))
        );
    }

    #[test]
    fn test_create_then_fill_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out_cwc");
        let raster = OutputRaster::create(&path, &output_header(3, 2)).unwrap();

        let status = fill_status(&path).unwrap();
        assert_eq!(status, FillStatus { total: 6, filled: 6 });
        assert!(!status.is_complete());

        let mut writer = raster.line_writer(LineRange::new(0, 3)).unwrap();
        for line in 0..3 {
            let values = Array1::from(vec![line as f32, 0.5]);
            writer.write_line(line, values.view()).unwrap();
        }
        let status = fill_status(&path).unwrap();
        assert!(status.is_complete());

        let cube = SpectralCube::open(&path).unwrap();
        assert_eq!(cube.spectrum(2, 0).unwrap()[0], 2.0);
        assert_eq!(cube.spectrum(2, 1).unwrap()[0], 0.5);
    }

    #[test]
    fn test_writer_rejects_foreign_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out_cwc");
        let raster = OutputRaster::create(&path, &output_header(4, 2)).unwrap();
        let mut writer = raster.line_writer(LineRange::new(2, 4)).unwrap();

        let values = Array1::from(vec![1.0f32, 1.0]);
        let err = writer.write_line(1, values.view()).unwrap_err();
        assert!(matches!(err, CwcError::OutOfRange { line: 1, .. }));

        let short = Array1::from(vec![1.0f32]);
        assert!(writer.write_line(2, short.view()).is_err());

        assert!(raster.line_writer(LineRange::new(3, 5)).is_err());
    }
}
