// container validation and the section walk that seeds the segment map

use super::{file_header, section_headers, size_align, str_at, Image};
use crate::error::ReasmError;
use object::elf;
use object::LittleEndian;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SegmentKind {
    Code,
    Data,
    Bss,
    Import,
    Reloc,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub kind: SegmentKind,
    pub start: u64,
    pub end: u64,
    pub file_offset: u64,
    /// section header index this segment came from, None for
    /// synthesized segments
    pub(crate) section: Option<usize>,
    /// sh_info of a relocation section, the section its records patch
    pub(crate) info: usize,
}

impl Segment {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment[{}, {:?}, {:#0x}..{:#0x}, file: {:#0x}]",
            self.name, self.kind, self.start, self.end, self.file_offset
        )
    }
}

#[derive(Debug)]
pub struct SegmentTable {
    segments: Vec<Segment>,
    /// next free synthesized address past everything laid out so far
    top: u64,
}

impl SegmentTable {
    pub fn build(image: &Image) -> Result<Self, ReasmError> {
        let e = LittleEndian;
        let data = image.bytes();

        if data.len() < 4 || data[0..4] != elf::ELFMAG {
            return Err(ReasmError::InvalidFormat);
        }

        let eh = file_header(image)?;

        // the extended-index scheme stores the real counts in section 0
        let shnum = eh.e_shnum.get(e);
        let shstrndx = eh.e_shstrndx.get(e);
        if shnum == 0 || shstrndx == elf::SHN_XINDEX {
            return Err(ReasmError::UnsupportedFormat(format!(
                "no support for >65535 sections (e_shnum {}, e_shstrndx {:#0x})",
                shnum, shstrndx
            )));
        }

        if eh.e_ident.class != elf::ELFCLASS32 {
            return Err(ReasmError::UnsupportedFormat(format!(
                "wrong class {}, want ELFCLASS32",
                eh.e_ident.class
            )));
        }
        if eh.e_ident.version != elf::EV_CURRENT {
            return Err(ReasmError::UnsupportedFormat(format!(
                "wrong version {}, want EV_CURRENT",
                eh.e_ident.version
            )));
        }
        if eh.e_ident.data != elf::ELFDATA2LSB {
            return Err(ReasmError::UnsupportedFormat(format!(
                "wrong endianness {}, want ELFDATA2LSB",
                eh.e_ident.data
            )));
        }
        if eh.e_machine.get(e) != elf::EM_386 {
            return Err(ReasmError::UnsupportedFormat(format!(
                "wrong machine {:#0x}, want EM_386",
                eh.e_machine.get(e)
            )));
        }
        if eh.e_type.get(e) != elf::ET_REL {
            return Err(ReasmError::UnsupportedFormat(format!(
                "wrong type {}, want a relocatable object",
                eh.e_type.get(e)
            )));
        }

        let sections = section_headers(image)?;
        let strings = sections
            .get(shstrndx as usize)
            .and_then(|sh| image.slice(sh.sh_offset.get(e) as u64, sh.sh_size.get(e) as u64))
            .ok_or_else(|| ReasmError::Truncated("section name table".to_string()))?;

        let mut table = Self {
            segments: vec![],
            top: size_align(data.len(), 4) as u64,
        };

        for (i, sh) in sections.iter().enumerate() {
            let name = str_at(strings, sh.sh_name.get(e));
            let offset = sh.sh_offset.get(e) as u64;
            let size = sh.sh_size.get(e) as u64;
            let flags = sh.sh_flags.get(e);

            match sh.sh_type.get(e) {
                elf::SHT_PROGBITS => {
                    if flags & elf::SHF_ALLOC == 0 {
                        log::debug!("segments: skip {} (not allocated)", name);
                        continue;
                    }
                    if image.slice(offset, size).is_none() {
                        return Err(ReasmError::Truncated(format!("section {}", name)));
                    }
                    let kind = if flags & elf::SHF_EXECINSTR != 0 {
                        SegmentKind::Code
                    } else {
                        SegmentKind::Data
                    };
                    table.segments.push(Segment {
                        name,
                        kind,
                        start: offset,
                        end: offset + size,
                        file_offset: offset,
                        section: Some(i),
                        info: 0,
                    });
                }
                elf::SHT_NOBITS => {
                    if flags & elf::SHF_ALLOC == 0 {
                        continue;
                    }
                    let start = table.alloc(size, sh.sh_addralign.get(e) as u64);
                    table.segments.push(Segment {
                        name,
                        kind: SegmentKind::Bss,
                        start,
                        end: start + size,
                        file_offset: 0,
                        section: Some(i),
                        info: 0,
                    });
                }
                elf::SHT_REL => {
                    if image.slice(offset, size).is_none() {
                        return Err(ReasmError::Truncated(format!("section {}", name)));
                    }
                    table.segments.push(Segment {
                        name,
                        kind: SegmentKind::Reloc,
                        start: offset,
                        end: offset + size,
                        file_offset: offset,
                        section: Some(i),
                        info: sh.sh_info.get(e) as usize,
                    });
                }
                elf::SHT_RELA => {
                    log::warn!("segments: skip {} (explicit addends not used on i386)", name);
                }
                other => {
                    log::debug!("segments: skip {} (type {:#0x})", name, other);
                }
            }
        }

        log::info!(
            "segments: {} sections mapped to {} segments",
            sections.len(),
            table.segments.len()
        );
        for s in table.segments.iter() {
            log::debug!("segments: {}", s);
        }

        Ok(table)
    }

    pub fn find(&self, addr: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    pub(crate) fn find_by_section(&self, section: usize) -> Option<&Segment> {
        self.segments.iter().find(|s| s.section == Some(section))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn of_kind(&self, kind: SegmentKind) -> impl Iterator<Item = &Segment> + '_ {
        self.segments.iter().filter(move |s| s.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// hand out synthesized address space past the file
    pub(crate) fn alloc(&mut self, size: u64, align: u64) -> u64 {
        let start = size_align(self.top as usize, align.max(1) as usize) as u64;
        self.top = start + size;
        start
    }

    /// the segment hosting extern slots, created on first use
    pub(crate) fn ensure_import(&mut self) -> usize {
        if let Some(i) = self
            .segments
            .iter()
            .position(|s| s.kind == SegmentKind::Import)
        {
            return i;
        }
        let start = size_align(self.top as usize, 4) as u64;
        self.top = start;
        self.segments.push(Segment {
            name: ".import".to_string(),
            kind: SegmentKind::Import,
            start,
            end: start,
            file_offset: 0,
            section: None,
            info: 0,
        });
        self.segments.len() - 1
    }

    pub(crate) fn extend(&mut self, index: usize, end: u64) {
        if self.segments[index].end < end {
            self.segments[index].end = end;
        }
    }
}
