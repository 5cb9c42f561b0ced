pub(crate) mod image;
pub(crate) mod relocations;
pub(crate) mod segments;
pub(crate) mod symbols;

pub use image::*;
pub use relocations::*;
pub use segments::*;
pub use symbols::*;

use crate::error::ReasmError;
use object::elf;
use object::read::ReadRef;
use object::LittleEndian;

/// align size
pub fn size_align(n: usize, align: usize) -> usize {
    (n + (align - 1)) & !(align - 1)
}

pub(crate) fn file_header(image: &Image) -> Result<&elf::FileHeader32<LittleEndian>, ReasmError> {
    image
        .bytes()
        .read_at::<elf::FileHeader32<LittleEndian>>(0)
        .map_err(|_| ReasmError::Truncated("file header".to_string()))
}

pub(crate) fn section_headers(
    image: &Image,
) -> Result<&[elf::SectionHeader32<LittleEndian>], ReasmError> {
    let e = LittleEndian;
    let eh = file_header(image)?;
    image
        .bytes()
        .read_slice_at::<elf::SectionHeader32<LittleEndian>>(
            eh.e_shoff.get(e) as u64,
            eh.e_shnum.get(e) as usize,
        )
        .map_err(|_| ReasmError::Truncated("section headers".to_string()))
}

/// nul-terminated entry out of a string table
pub(crate) fn str_at(strings: &[u8], off: u32) -> String {
    let off = off as usize;
    if off >= strings.len() {
        return String::new();
    }
    let end = strings[off..]
        .iter()
        .position(|b| *b == 0)
        .map(|p| off + p)
        .unwrap_or(strings.len());
    String::from_utf8_lossy(&strings[off..end]).into_owned()
}
