use super::{section_headers, str_at, Image, SegmentTable};
use crate::error::ReasmError;
use object::elf;
use object::read::ReadRef;
use object::LittleEndian;
use std::fmt;
use std::mem;

/// one symbol table entry, resolved to owned fields
#[derive(Debug, Clone)]
pub struct ObjSymbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub kind: u8,
    pub bind: u8,
    pub shndx: u16,
}

impl ObjSymbol {
    pub fn is_defined(&self) -> bool {
        self.shndx == elf::SHN_ABS
            || (self.shndx != elf::SHN_UNDEF && self.shndx < elf::SHN_LORESERVE)
    }

    pub fn is_undefined(&self) -> bool {
        self.shndx == elf::SHN_UNDEF
    }

    pub fn is_func(&self) -> bool {
        self.kind == elf::STT_FUNC
    }

    pub fn is_object(&self) -> bool {
        self.kind == elf::STT_OBJECT
    }

    pub fn is_section(&self) -> bool {
        self.kind == elf::STT_SECTION
    }

    /// segment-space address of a defined symbol
    pub fn address(&self, segments: &SegmentTable) -> Option<u64> {
        if self.shndx == elf::SHN_ABS {
            return Some(self.value);
        }
        if !self.is_defined() {
            return None;
        }
        segments
            .find_by_section(self.shndx as usize)
            .map(|s| s.start + self.value)
    }
}

impl fmt::Display for ObjSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Symbol[{}, value: {:#0x}, size: {}, type: {}, bind: {}, shndx: {}]",
            self.name, self.value, self.size, self.kind, self.bind, self.shndx
        )
    }
}

#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<ObjSymbol>,
}

impl SymbolTable {
    /// relocatable objects carry a single symtab; an object without one
    /// loads as an empty table
    pub fn load(image: &Image) -> Result<Self, ReasmError> {
        let e = LittleEndian;
        let sections = section_headers(image)?;
        let mut symbols = vec![];

        if let Some(sh) = sections
            .iter()
            .find(|sh| sh.sh_type.get(e) == elf::SHT_SYMTAB)
        {
            let strings = sections
                .get(sh.sh_link.get(e) as usize)
                .and_then(|s| image.slice(s.sh_offset.get(e) as u64, s.sh_size.get(e) as u64))
                .ok_or_else(|| ReasmError::Truncated("symbol string table".to_string()))?;

            let count = sh.sh_size.get(e) as usize / mem::size_of::<elf::Sym32<LittleEndian>>();
            let syms = image
                .bytes()
                .read_slice_at::<elf::Sym32<LittleEndian>>(sh.sh_offset.get(e) as u64, count)
                .map_err(|_| ReasmError::Truncated("symbol table".to_string()))?;

            for sym in syms {
                symbols.push(ObjSymbol {
                    name: str_at(strings, sym.st_name.get(e)),
                    value: sym.st_value.get(e) as u64,
                    size: sym.st_size.get(e) as u64,
                    kind: sym.st_type(),
                    bind: sym.st_bind(),
                    shndx: sym.st_shndx.get(e),
                });
            }
        }

        log::info!("symbols: {} entries", symbols.len());
        for sym in symbols.iter().filter(|s| !s.name.is_empty()) {
            log::debug!("symbols: {}", sym);
        }
        Ok(Self { symbols })
    }

    pub fn get(&self, index: u32) -> Option<&ObjSymbol> {
        self.symbols.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjSymbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
