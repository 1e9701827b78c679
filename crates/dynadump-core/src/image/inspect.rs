//! On-disk Mach-O summaries.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use object::read::macho::{FatArch, MachOFatFile32, MachOFatFile64};
use object::{Architecture, FileKind, Object, ObjectKind, ObjectSegment, ObjectSymbol};

use crate::error::{ProbeError, Result};

/// Summary of one architecture slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceSummary
{
    pub architecture: Architecture,
    pub kind: ObjectKind,
    pub is_64: bool,
    /// Segment names in load-command order.
    pub segments: Vec<String>,
    /// Defined global symbols in the symbol table.
    pub exported_symbols: usize,
}

/// Summary of an image file. Universal binaries have one slice per
/// architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary
{
    pub path: PathBuf,
    pub universal: bool,
    pub slices: Vec<SliceSummary>,
}

impl fmt::Display for ImageSummary
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let layout = if self.universal { "universal" } else { "thin" };
        writeln!(f, "{} ({layout}, {} slice(s))", self.path.display(), self.slices.len())?;
        for slice in &self.slices {
            writeln!(
                f,
                "  {:?} {:?} {}-bit, {} exported symbol(s)",
                slice.architecture,
                slice.kind,
                if slice.is_64 { 64 } else { 32 },
                slice.exported_symbols
            )?;
            writeln!(f, "    segments: {}", slice.segments.join(" "))?;
        }
        Ok(())
    }
}

/// Parse the Mach-O file at `path`.
///
/// Images that only live in the dyld shared cache have no file on disk and
/// fail with `Io`.
///
/// ## Errors
///
/// - `Io`: the file cannot be read
/// - `Image`: not a Mach-O file, or malformed
pub fn inspect_image(path: impl AsRef<Path>) -> Result<ImageSummary>
{
    let path = path.as_ref();
    let data = fs::read(path)?;
    summarize(path, &data)
}

fn summarize(path: &Path, data: &[u8]) -> Result<ImageSummary>
{
    let kind = FileKind::parse(data).map_err(|err| image_error(path, err))?;
    let (universal, slices) = match kind {
        FileKind::MachO32 | FileKind::MachO64 => (false, vec![summarize_slice(path, data)?]),
        FileKind::MachOFat32 => {
            let fat = MachOFatFile32::parse(data).map_err(|err| image_error(path, err))?;
            (true, fat_slices(path, data, fat.arches())?)
        }
        FileKind::MachOFat64 => {
            let fat = MachOFatFile64::parse(data).map_err(|err| image_error(path, err))?;
            (true, fat_slices(path, data, fat.arches())?)
        }
        other => {
            return Err(ProbeError::Image(format!(
                "{}: not a Mach-O image ({other:?})",
                path.display()
            )));
        }
    };

    Ok(ImageSummary {
        path: path.to_path_buf(),
        universal,
        slices,
    })
}

fn fat_slices<A: FatArch>(path: &Path, data: &[u8], arches: &[A]) -> Result<Vec<SliceSummary>>
{
    arches
        .iter()
        .map(|arch| {
            let slice = arch.data(data).map_err(|err| image_error(path, err))?;
            summarize_slice(path, slice)
        })
        .collect()
}

fn summarize_slice(path: &Path, data: &[u8]) -> Result<SliceSummary>
{
    let file = object::File::parse(data).map_err(|err| image_error(path, err))?;
    let segments = file
        .segments()
        .filter_map(|segment| segment.name().ok().flatten().map(str::to_string))
        .collect();
    let exported_symbols = file
        .symbols()
        .filter(|symbol| symbol.is_global() && symbol.is_definition())
        .count();

    Ok(SliceSummary {
        architecture: file.architecture(),
        kind: file.kind(),
        is_64: file.is_64(),
        segments,
        exported_symbols,
    })
}

fn image_error(path: &Path, err: object::Error) -> ProbeError
{
    ProbeError::Image(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_missing_file_is_io_error()
    {
        let err = inspect_image("/nonexistent/dynadump/libmissing.dylib").unwrap_err();
        assert!(matches!(err, ProbeError::Io(_)));
    }

    #[test]
    fn test_garbage_is_rejected()
    {
        let err = summarize(Path::new("garbage.bin"), b"definitely not an image").unwrap_err();
        assert!(matches!(err, ProbeError::Image(_)));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_inspect_own_executable()
    {
        let exe = std::env::current_exe().unwrap();
        let summary = inspect_image(&exe).unwrap();
        assert!(!summary.slices.is_empty());
        let slice = &summary.slices[0];
        assert_eq!(slice.kind, ObjectKind::Executable);
        assert!(slice.segments.iter().any(|name| name == "__TEXT"));
        assert!(summary.to_string().contains("__TEXT"));
    }
}
