use crate::io::envi::{envi_header, DataType, EnviHeader, Interleave};
use crate::types::{CwcError, CwcResult, RasterShape};
use memmap2::Mmap;
use ndarray::{Array1, Array2};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Read-only, memory-mapped view of an ENVI raster indexed as (line, sample, band).
///
/// Each holder maps the file independently; handles are never shared
/// between workers.
pub struct SpectralCube {
    path: PathBuf,
    header: EnviHeader,
    shape: RasterShape,
    interleave: Interleave,
    data_type: DataType,
    big_endian: bool,
    offset: usize,
    mmap: Mmap,
}

impl SpectralCube {
    /// Open the image at `path`; its header is located with [`envi_header`]
    pub fn open<P: AsRef<Path>>(path: P) -> CwcResult<Self> {
        let path = path.as_ref();
        let header = EnviHeader::read(envi_header(path))?;
        Self::with_header(path, header)
    }

    pub fn with_header<P: AsRef<Path>>(path: P, header: EnviHeader) -> CwcResult<Self> {
        let path = path.as_ref().to_path_buf();
        let shape = header.shape()?;
        let interleave = header.interleave()?;
        let data_type = header.data_type()?;
        let big_endian = header.big_endian()?;
        let offset = header.header_offset()?;

        let file = File::open(&path)?;
        // SAFETY: the mapping is read-only and the pipeline never truncates its input
        let mmap = unsafe { Mmap::map(&file)? };

        let required = offset + shape.values() * data_type.size();
        if mmap.len() < required {
            return Err(CwcError::InvalidFormat(format!(
                "{} holds {} bytes but a {} {:?} raster needs {}",
                path.display(),
                mmap.len(),
                shape,
                data_type,
                required
            )));
        }

        log::debug!(
            "Mapped {} ({} {}, {:?})",
            path.display(),
            shape,
            interleave,
            data_type
        );

        Ok(Self {
            path,
            header,
            shape,
            interleave,
            data_type,
            big_endian,
            offset,
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &EnviHeader {
        &self.header
    }

    pub fn shape(&self) -> RasterShape {
        self.shape
    }

    pub fn interleave(&self) -> Interleave {
        self.interleave
    }

    /// Wavelength grid; an error when the header carries none or its length disagrees with the band count
    pub fn wavelengths(&self) -> CwcResult<Array1<f64>> {
        let wl = self.header.wavelengths()?.ok_or_else(|| {
            CwcError::Header(format!("{} has no wavelength list", self.path.display()))
        })?;
        if wl.len() != self.shape.bands {
            return Err(CwcError::Header(format!(
                "{} wavelengths for {} bands",
                wl.len(),
                self.shape.bands
            )));
        }
        Ok(Array1::from(wl))
    }

    #[inline]
    fn value(&self, line: usize, sample: usize, band: usize) -> f32 {
        let size = self.data_type.size();
        let start = self.offset + self.interleave.element_index(&self.shape, line, sample, band) * size;
        self.data_type.decode(&self.mmap[start..start + size], self.big_endian)
    }

    fn check_pixel(&self, line: usize, sample: usize) -> CwcResult<()> {
        if line >= self.shape.lines || sample >= self.shape.samples {
            return Err(CwcError::InvalidFormat(format!(
                "Pixel ({}, {}) outside {} raster",
                line, sample, self.shape
            )));
        }
        Ok(())
    }

    /// Copy of the spectrum at one pixel
    pub fn spectrum(&self, line: usize, sample: usize) -> CwcResult<Array1<f32>> {
        self.check_pixel(line, sample)?;
        Ok(Array1::from_shape_fn(self.shape.bands, |b| self.value(line, sample, b)))
    }

    /// All spectra of one line as a (samples, bands) array
    pub fn line(&self, line: usize) -> CwcResult<Array2<f32>> {
        self.check_pixel(line, 0)?;
        Ok(Array2::from_shape_fn((self.shape.samples, self.shape.bands), |(s, b)| {
            self.value(line, s, b)
        }))
    }

    /// Visit every stored value in file order
    pub fn for_each_value<F: FnMut(f32)>(&self, mut f: F) {
        let size = self.data_type.size();
        let end = self.offset + self.shape.values() * size;
        for chunk in self.mmap[self.offset..end].chunks_exact(size) {
            f(self.data_type.decode(chunk, self.big_endian));
        }
    }
}

/// A spectrum is no-data when every band value is negative
pub fn is_no_data<'a, I: IntoIterator<Item = &'a f32>>(spectrum: I) -> bool {
    spectrum.into_iter().all(|&v| v < 0.0)
}
