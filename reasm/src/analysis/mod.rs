pub(crate) mod config;
pub(crate) mod engine;
pub(crate) mod labels;
pub(crate) mod refs;

pub use config::*;
pub use engine::*;
pub use labels::*;
pub use refs::*;

use crate::error::ReasmError;
use crate::format;
use crate::obj::{Image, RelocationTable, SegmentTable, SymbolTable};

/// everything one run knows about one object
#[derive(Debug)]
pub struct Analysis {
    pub image: Image,
    pub segments: SegmentTable,
    pub symbols: SymbolTable,
    pub labels: LabelTable,
    pub refs: ReferenceTable,
    pub relocs: RelocationTable,
}

impl Analysis {
    /// image in, tables out. segments, symbols and relocations come
    /// straight from the container; labels and references start empty
    /// and belong to the engine.
    pub fn load(bytes: Vec<u8>) -> Result<Self, ReasmError> {
        let image = Image::new(bytes);
        let mut segments = SegmentTable::build(&image)?;
        let symbols = SymbolTable::load(&image)?;
        let relocs = RelocationTable::load(&image, &mut segments, &symbols)?;
        Ok(Self {
            image,
            segments,
            symbols,
            labels: LabelTable::new(),
            refs: ReferenceTable::new(),
            relocs,
        })
    }

    /// patch sites (when asked to) and raise reloc flags on target
    /// labels. running it again changes nothing.
    pub fn apply_relocations(&mut self, patch: bool) -> (usize, usize) {
        if patch {
            self.relocs.patch(&mut self.image);
        }
        self.labels
            .upgrade_from_relocations(&self.relocs, &self.segments)
    }

    /// human-readable table dump, for poking at an object
    pub fn dump(&self, verbose: bool) {
        println!("segments: {}", self.segments.len());
        for s in self.segments.iter() {
            println!("  {}", s);
            if verbose && s.size() > 0 {
                if let Some(bytes) = self.image.slice(s.start, s.size()) {
                    format::print_bytes(bytes, s.start as usize);
                }
            }
        }
        println!("symbols: {}", self.symbols.len());
        for sym in self.symbols.iter().filter(|s| !s.name.is_empty()) {
            println!("  {}", sym);
        }
        println!("relocations: {}", self.relocs.len());
        for r in self.relocs.iter() {
            println!("  {}", r);
        }
        for ext in self.relocs.externs() {
            println!("  extern {} at {:#0x}", ext.symbol, ext.slot);
        }
    }
}
