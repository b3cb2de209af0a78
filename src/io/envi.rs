use crate::types::{CwcError, CwcResult, RasterShape};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A single header value: plain scalar or a braced list
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Scalar(String),
    List(Vec<String>),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Scalar(s) => Some(s.as_str()),
            HeaderValue::List(_) => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Scalar(s) => write!(f, "{}", s),
            HeaderValue::List(items) => write!(f, "{{{}}}", items.join(", ")),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Scalar(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Scalar(value)
    }
}

/// Storage order of bands on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interleave {
    /// Band interleaved by pixel
    Bip,
    /// Band interleaved by line
    Bil,
    /// Band sequential
    Bsq,
}

impl Interleave {
    pub fn parse(value: &str) -> CwcResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "bip" => Ok(Interleave::Bip),
            "bil" => Ok(Interleave::Bil),
            "bsq" => Ok(Interleave::Bsq),
            other => Err(CwcError::Header(format!("Unknown interleave: {}", other))),
        }
    }

    /// Element index of (line, sample, band) in the flat data file
    pub fn element_index(&self, shape: &RasterShape, line: usize, sample: usize, band: usize) -> usize {
        match self {
            Interleave::Bip => (line * shape.samples + sample) * shape.bands + band,
            Interleave::Bil => (line * shape.bands + band) * shape.samples + sample,
            Interleave::Bsq => (band * shape.lines + line) * shape.samples + sample,
        }
    }
}

impl fmt::Display for Interleave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interleave::Bip => write!(f, "bip"),
            Interleave::Bil => write!(f, "bil"),
            Interleave::Bsq => write!(f, "bsq"),
        }
    }
}

/// ENVI numeric data type codes supported by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    I16,
    I32,
    F32,
    F64,
    U16,
}

impl DataType {
    pub fn from_code(code: u32) -> CwcResult<Self> {
        match code {
            1 => Ok(DataType::U8),
            2 => Ok(DataType::I16),
            3 => Ok(DataType::I32),
            4 => Ok(DataType::F32),
            5 => Ok(DataType::F64),
            12 => Ok(DataType::U16),
            other => Err(CwcError::Header(format!("Unsupported data type: {}", other))),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            DataType::U8 => 1,
            DataType::I16 => 2,
            DataType::I32 => 3,
            DataType::F32 => 4,
            DataType::F64 => 5,
            DataType::U16 => 12,
        }
    }

    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::F64 => 8,
        }
    }

    /// Decode one element; `bytes` must hold exactly `self.size()` bytes
    pub fn decode(&self, bytes: &[u8], big_endian: bool) -> f32 {
        macro_rules! read {
            ($t:ty, $n:expr) => {{
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&bytes[..$n]);
                if big_endian {
                    <$t>::from_be_bytes(raw)
                } else {
                    <$t>::from_le_bytes(raw)
                }
            }};
        }

        match self {
            DataType::U8 => bytes[0] as f32,
            DataType::I16 => read!(i16, 2) as f32,
            DataType::U16 => read!(u16, 2) as f32,
            DataType::I32 => read!(i32, 4) as f32,
            DataType::F32 => read!(f32, 4),
            DataType::F64 => read!(f64, 8) as f32,
        }
    }
}

/// Parsed ENVI header; keys are lower-cased and kept in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnviHeader {
    entries: Vec<(String, HeaderValue)>,
}

impl EnviHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<P: AsRef<Path>>(path: P) -> CwcResult<Self> {
        let path = path.as_ref();
        log::debug!("Reading ENVI header: {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> CwcResult<Self> {
        let mut lines = text.lines();
        match lines.next() {
            Some(first) if first.trim() == "ENVI" => {}
            _ => {
                return Err(CwcError::Header(
                    "Header does not start with ENVI".to_string(),
                ))
            }
        }

        let mut header = EnviHeader::new();
        while let Some(line) = lines.next() {
            if line.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                log::warn!("Skipping malformed header line: {}", line);
                continue;
            };
            let key = key.trim().to_lowercase();
            let mut value = value.trim().to_string();

            if value.starts_with('{') {
                while !value.contains('}') {
                    match lines.next() {
                        Some(next) => {
                            value.push(' ');
                            value.push_str(next.trim());
                        }
                        None => {
                            return Err(CwcError::Header(format!(
                                "Unterminated list for key '{}'",
                                key
                            )))
                        }
                    }
                }
                let inner = value
                    .trim_start_matches('{')
                    .trim_end()
                    .trim_end_matches('}');
                let items = inner
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty())
                    .collect();
                header.set(&key, HeaderValue::List(items));
            } else {
                header.set(&key, HeaderValue::Scalar(value));
            }
        }

        Ok(header)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> CwcResult<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        let key = key.to_lowercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Insert or replace, keeping the original position of an existing key
    pub fn set<V: Into<HeaderValue>>(&mut self, key: &str, value: V) {
        let key = key.to_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        let key = key.to_lowercase();
        let idx = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    fn scalar(&self, key: &str) -> CwcResult<&str> {
        self.get(key)
            .and_then(HeaderValue::as_str)
            .ok_or_else(|| CwcError::Header(format!("Missing header key '{}'", key)))
    }

    fn parse_usize(&self, key: &str) -> CwcResult<usize> {
        let raw = self.scalar(key)?;
        raw.trim()
            .parse()
            .map_err(|_| CwcError::Header(format!("Invalid value for '{}': {}", key, raw)))
    }

    fn parse_usize_or(&self, key: &str, default: usize) -> CwcResult<usize> {
        if self.contains_key(key) {
            self.parse_usize(key)
        } else {
            Ok(default)
        }
    }

    pub fn shape(&self) -> CwcResult<RasterShape> {
        Ok(RasterShape::new(
            self.parse_usize("lines")?,
            self.parse_usize("samples")?,
            self.parse_usize("bands")?,
        ))
    }

    pub fn interleave(&self) -> CwcResult<Interleave> {
        Interleave::parse(self.scalar("interleave")?)
    }

    pub fn data_type(&self) -> CwcResult<DataType> {
        DataType::from_code(self.parse_usize("data type")? as u32)
    }

    pub fn header_offset(&self) -> CwcResult<usize> {
        self.parse_usize_or("header offset", 0)
    }

    pub fn big_endian(&self) -> CwcResult<bool> {
        Ok(self.parse_usize_or("byte order", 0)? == 1)
    }

    /// Band centre wavelengths, if the header carries them
    pub fn wavelengths(&self) -> CwcResult<Option<Vec<f64>>> {
        match self.get("wavelength") {
            None => Ok(None),
            Some(HeaderValue::List(items)) => items
                .iter()
                .map(|item| {
                    item.parse::<f64>().map_err(|_| {
                        CwcError::Header(format!("Invalid wavelength value: {}", item))
                    })
                })
                .collect::<CwcResult<Vec<f64>>>()
                .map(Some),
            Some(HeaderValue::Scalar(s)) => Err(CwcError::Header(format!(
                "Wavelength must be a list, got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for EnviHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ENVI")?;
        for (key, value) in &self.entries {
            writeln!(f, "{} = {}", key, value)?;
        }
        Ok(())
    }
}

/// Locate the header belonging to an image path.
///
/// For `.img`, `.dat` and `.raw` images either `name.hdr` or `name.img.hdr`
/// may exist; whichever is present wins (the former first). When neither
/// exists the `name.hdr` form is returned for new files.
pub fn envi_header<P: AsRef<Path>>(image: P) -> PathBuf {
    let image = image.as_ref();
    let ext = image
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("img") | Some("dat") | Some("raw") => {
            let replaced = image.with_extension("hdr");
            let appended = append_extension(image, "hdr");
            if replaced.is_file() {
                replaced
            } else if appended.is_file() {
                appended
            } else {
                replaced
            }
        }
        Some("hdr") => image.to_path_buf(),
        _ => append_extension(image, "hdr"),
    }
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".");
    raw.push(ext);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ENVI
description = {reflectance}
samples = 2
lines = 4
bands = 3
header offset = 0
data type = 4
interleave = bip
byte order = 0
wavelength = { 850.0, 975.5,
 1100.0 }
";

    #[test]
    fn test_parse_header() {
        let header = EnviHeader::parse(SAMPLE).unwrap();
        assert_eq!(header.shape().unwrap(), RasterShape::new(4, 2, 3));
        assert_eq!(header.interleave().unwrap(), Interleave::Bip);
        assert_eq!(header.data_type().unwrap(), DataType::F32);
        assert!(!header.big_endian().unwrap());
        assert_eq!(
            header.wavelengths().unwrap(),
            Some(vec![850.0, 975.5, 1100.0])
        );
    }

    #[test]
    fn test_header_round_trip_keeps_order() {
        let mut header = EnviHeader::parse(SAMPLE).unwrap();
        header.set("Interleave", "bil");
        header.remove("wavelength");

        let reparsed = EnviHeader::parse(&header.to_string()).unwrap();
        let keys: Vec<&str> = reparsed.keys().collect();
        assert_eq!(
            keys,
            vec!["description", "samples", "lines", "bands", "header offset", "data type", "interleave", "byte order"]
        );
        assert_eq!(reparsed.interleave().unwrap(), Interleave::Bil);
        assert_eq!(reparsed.wavelengths().unwrap(), None);
    }

    #[test]
    fn test_rejects_non_envi() {
        assert!(EnviHeader::parse("GDAL\nsamples = 1\n").is_err());
    }

    #[test]
    fn test_element_index() {
        let shape = RasterShape::new(2, 3, 4);
        assert_eq!(Interleave::Bip.element_index(&shape, 1, 2, 3), 23);
        assert_eq!(Interleave::Bil.element_index(&shape, 1, 2, 3), 23);
        assert_eq!(Interleave::Bsq.element_index(&shape, 1, 2, 3), 23);
        assert_eq!(Interleave::Bil.element_index(&shape, 0, 1, 2), 7);
        assert_eq!(Interleave::Bsq.element_index(&shape, 0, 1, 2), 13);
    }

    #[test]
    fn test_decode_byte_order() {
        let value = 1.5f32;
        assert_eq!(DataType::F32.decode(&value.to_le_bytes(), false), 1.5);
        assert_eq!(DataType::F32.decode(&value.to_be_bytes(), true), 1.5);
        assert_eq!(DataType::I16.decode(&(-7i16).to_le_bytes(), false), -7.0);
    }

    #[test]
    fn test_envi_header_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("scene_rfl");
        assert_eq!(envi_header(&plain), dir.path().join("scene_rfl.hdr"));

        let img = dir.path().join("scene.img");
        assert_eq!(envi_header(&img), dir.path().join("scene.hdr"));

        std::fs::write(dir.path().join("scene.img.hdr"), "ENVI\n").unwrap();
        assert_eq!(envi_header(&img), dir.path().join("scene.img.hdr"));

        std::fs::write(dir.path().join("scene.hdr"), "ENVI\n").unwrap();
        assert_eq!(envi_header(&img), dir.path().join("scene.hdr"));

        let hdr = dir.path().join("other.hdr");
        assert_eq!(envi_header(&hdr), hdr);
    }
}
