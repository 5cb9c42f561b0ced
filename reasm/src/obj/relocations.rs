use super::{Image, SegmentKind, SegmentTable, SymbolTable};
use crate::error::ReasmError;
use object::elf;
use object::read::ReadRef;
use object::LittleEndian;
use std::collections::HashMap;
use std::fmt;
use std::mem;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RelocKind {
    /// S + A, 32 bit absolute
    Abs,
    /// S + A - P, 32 bit pc-relative
    Rel,
}

#[derive(Debug, Copy, Clone)]
pub struct Relocation {
    pub site: u64,
    /// the address this site refers to, addend folded in
    pub target: u64,
    pub kind: RelocKind,
}

impl Relocation {
    /// the word a patched site holds. pc-relative sites store the
    /// distance from the end of the 4-byte field, which is how the
    /// processor consumes call and jmp operands.
    pub fn value(&self) -> u32 {
        match self.kind {
            RelocKind::Abs => self.target as u32,
            RelocKind::Rel => self.target.wrapping_sub(self.site + 4) as u32,
        }
    }
}

impl fmt::Display for Relocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reloc[{:#0x} -> {:#0x}, {:?}]",
            self.site, self.target, self.kind
        )
    }
}

/// an undefined symbol routed through a synthesized slot
#[derive(Debug, Clone)]
pub struct ExternSym {
    pub module: Option<String>,
    pub symbol: String,
    pub hint: u32,
    pub slot: u64,
}

#[derive(Debug)]
pub struct RelocationTable {
    /// sorted by site
    relocs: Vec<Relocation>,
    externs: Vec<ExternSym>,
}

impl RelocationTable {
    pub fn load(
        image: &Image,
        segments: &mut SegmentTable,
        symbols: &SymbolTable,
    ) -> Result<Self, ReasmError> {
        let e = LittleEndian;
        let mut relocs: Vec<Relocation> = vec![];
        let mut externs: Vec<ExternSym> = vec![];
        let mut slots: HashMap<String, u64> = HashMap::new();

        let rel_sections: Vec<(u64, u64, usize)> = segments
            .of_kind(SegmentKind::Reloc)
            .map(|s| (s.file_offset, s.size(), s.info))
            .collect();

        for (offset, size, info) in rel_sections {
            let (apply_start, apply_kind, apply_name) = match segments.find_by_section(info) {
                Some(s) => (s.start, s.kind, s.name.clone()),
                None => {
                    log::debug!(target: "relocations", "skip records for unmapped section {}", info);
                    continue;
                }
            };
            if apply_kind == SegmentKind::Bss {
                log::warn!(target: "relocations", "skip records against {}, nothing to patch", apply_name);
                continue;
            }

            let count = size as usize / mem::size_of::<elf::Rel32<LittleEndian>>();
            let records = image
                .bytes()
                .read_slice_at::<elf::Rel32<LittleEndian>>(offset, count)
                .map_err(|_| ReasmError::Truncated("relocation records".to_string()))?;

            for rel in records {
                let site = apply_start + rel.r_offset.get(e) as u64;
                let index = rel.r_sym(e);
                let kind = match rel.r_type(e) {
                    elf::R_386_32 => RelocKind::Abs,
                    elf::R_386_PC32 => RelocKind::Rel,
                    other => {
                        log::warn!(target: "relocations", "skip type {} at {:#0x}", other, site);
                        continue;
                    }
                };

                let sym = symbols
                    .get(index)
                    .ok_or(ReasmError::UnresolvedSymbol(site, index))?;

                // implicit addend, read out of the site itself
                let addend = image.read_u32(site).ok_or_else(|| {
                    ReasmError::Truncated(format!("relocation site {:#0x}", site))
                })? as i32 as i64;

                let base = if let Some(addr) = sym.address(segments) {
                    addr as i64
                } else if sym.is_undefined() {
                    let slot = match slots.get(&sym.name) {
                        Some(slot) => *slot,
                        None => {
                            let import = segments.ensure_import();
                            let slot = segments.alloc(4, 4);
                            segments.extend(import, slot + 4);
                            slots.insert(sym.name.clone(), slot);
                            externs.push(ExternSym {
                                module: None,
                                symbol: sym.name.clone(),
                                hint: index,
                                slot,
                            });
                            log::debug!(target: "relocations", "extern slot {:#0x} for {}", slot, sym.name);
                            slot
                        }
                    };
                    slot as i64
                } else {
                    log::warn!(target: "relocations", "skip record at {:#0x} against unmapped symbol {}", site, sym.name);
                    continue;
                };

                // pc-relative sites bias the stored value by the 4 bytes
                // between the field and the next instruction; fold it out
                // so target always holds the referenced address
                let target = match kind {
                    RelocKind::Abs => base + addend,
                    RelocKind::Rel => base + addend + 4,
                };
                relocs.push(Relocation {
                    site,
                    target: target as u64,
                    kind,
                });
            }
        }

        relocs.sort_by_key(|r| r.site);
        log::info!(
            "relocations: {} records, {} extern slots",
            relocs.len(),
            externs.len()
        );
        for r in relocs.iter() {
            log::debug!(target: "relocations", "{}", r);
        }
        Ok(Self { relocs, externs })
    }

    /// write resolved values over every backed site. writing the same
    /// values again is a no-op.
    pub fn patch(&self, image: &mut Image) {
        for r in self.relocs.iter() {
            if image.write_u32(r.site, r.value()) {
                log::debug!(target: "relocations", "patch {:#0x} => {:#0x}", r.site, r.value());
            } else {
                log::warn!(target: "relocations", "site {:#0x} not backed", r.site);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relocation> {
        self.relocs.iter()
    }

    pub fn len(&self) -> usize {
        self.relocs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relocs.is_empty()
    }

    pub fn externs(&self) -> &[ExternSym] {
        self.externs.as_slice()
    }

    /// relocation target recorded at exactly this site
    pub fn target_at(&self, site: u64) -> Option<u64> {
        self.relocs
            .binary_search_by_key(&site, |r| r.site)
            .ok()
            .map(|i| self.relocs[i].target)
    }

    /// every relocation whose site falls in [start, end)
    pub fn sites_in(&self, start: u64, end: u64) -> &[Relocation] {
        let lo = self.relocs.partition_point(|r| r.site < start);
        let hi = self.relocs.partition_point(|r| r.site < end);
        &self.relocs[lo..hi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patched_values() {
        let abs = Relocation {
            site: 0x20,
            target: 0x104,
            kind: RelocKind::Abs,
        };
        assert_eq!(abs.value(), 0x104);

        // call at 0x10, operand field at 0x11, target 0x40:
        // stored value counts from the end of the field
        let rel = Relocation {
            site: 0x11,
            target: 0x40,
            kind: RelocKind::Rel,
        };
        assert_eq!(rel.value(), 0x40 - 0x15);

        // backwards branches wrap
        let back = Relocation {
            site: 0x11,
            target: 0x4,
            kind: RelocKind::Rel,
        };
        assert_eq!(back.value(), (-0x11i32) as u32);
    }

    #[test]
    fn site_queries() {
        let table = RelocationTable {
            relocs: vec![
                Relocation { site: 0x10, target: 1, kind: RelocKind::Abs },
                Relocation { site: 0x14, target: 2, kind: RelocKind::Abs },
                Relocation { site: 0x20, target: 3, kind: RelocKind::Rel },
            ],
            externs: vec![],
        };
        assert_eq!(table.target_at(0x14), Some(2));
        assert_eq!(table.target_at(0x15), None);
        assert_eq!(table.sites_in(0x10, 0x20).len(), 2);
        assert_eq!(table.sites_in(0x11, 0x30).len(), 2);
        assert_eq!(table.sites_in(0x30, 0x40).len(), 0);
    }
}
