use super::listing::db_line;
use crate::analysis::{Analysis, LabelKind};
use crate::obj::SegmentKind;
use binary_heap_plus::BinaryHeap;
use std::error::Error;
use std::io::Write;

/// data segments as db/dd lines with labels interleaved in address
/// order. relocated words come out as dd <label> so pointers survive
/// reassembly with whatever layout the next link picks.
pub fn data_output<W: Write>(a: &Analysis, w: &mut W) -> Result<(), Box<dyn Error>> {
    for seg in a.segments.of_kind(SegmentKind::Data) {
        writeln!(w)?;
        writeln!(w, "section {}", seg.name)?;

        let labels: Vec<(u64, String)> = a
            .labels
            .iter()
            .filter(|l| seg.contains(l.addr))
            .map(|l| (l.addr, l.name.clone().unwrap_or_default()))
            .collect();
        let mut label_heap =
            BinaryHeap::from_vec_cmp(labels, |a: &(u64, String), b: &(u64, String)| b.0.cmp(&a.0));

        let sites: Vec<(u64, u64)> = a
            .relocs
            .sites_in(seg.start, seg.end)
            .iter()
            .map(|r| (r.site, r.target))
            .collect();
        let mut site_heap =
            BinaryHeap::from_vec_cmp(sites, |a: &(u64, u64), b: &(u64, u64)| b.0.cmp(&a.0));

        let mut addr = seg.start;
        while addr < seg.end {
            while label_heap.len() > 0 && label_heap.peek().unwrap().0 <= addr {
                let (at, name) = label_heap.pop().unwrap();
                if at == addr {
                    writeln!(w, "{}:", name)?;
                } else {
                    // inside the previous item, usually a dd word
                    log::debug!("data: label {:#0x} pinned with equ", at);
                    writeln!(w, "{} equ $-{:#x}", name, addr - at)?;
                }
            }
            while site_heap.len() > 0 && site_heap.peek().unwrap().0 < addr {
                let (site, _) = site_heap.pop().unwrap();
                log::warn!("data: relocation site {:#0x} overlaps an emitted item", site);
            }

            // a relocated word right here is a pointer
            if site_heap.len() > 0 && site_heap.peek().unwrap().0 == addr {
                let (_, target) = site_heap.pop().unwrap();
                // a target no emitter will define keeps its raw value
                let name = a
                    .labels
                    .find(target)
                    .filter(|l| l.kind != LabelKind::None)
                    .and_then(|l| l.name.as_deref());
                match name {
                    Some(name) => writeln!(w, "    dd {}", name)?,
                    None => writeln!(w, "    dd {:#0x}", target)?,
                }
                addr += 4;
                continue;
            }

            // plain bytes up to the next label, relocation or line cap
            let mut end = (addr + 8).min(seg.end);
            if let Some(peek) = label_heap.peek() {
                end = end.min(peek.0);
            }
            if let Some(peek) = site_heap.peek() {
                end = end.min(peek.0);
            }
            if let Some(bytes) = a.image.slice(addr, end - addr) {
                writeln!(w, "    {}", db_line(bytes))?;
            }
            addr = end;
        }

        while label_heap.len() > 0 {
            let (at, name) = label_heap.pop().unwrap();
            writeln!(w, "{} equ $-{:#x}", name, seg.end - at)?;
        }
    }
    Ok(())
}

/// uninitialised segments as labelled resb runs
pub fn bss_output<W: Write>(a: &Analysis, w: &mut W) -> Result<(), Box<dyn Error>> {
    for seg in a.segments.of_kind(SegmentKind::Bss) {
        writeln!(w)?;
        writeln!(w, "section {} nobits", seg.name)?;

        let labels: Vec<(u64, String)> = a
            .labels
            .iter()
            .filter(|l| seg.contains(l.addr))
            .map(|l| (l.addr, l.name.clone().unwrap_or_default()))
            .collect();

        let mut li = 0;
        let mut addr = seg.start;
        while addr < seg.end {
            while li < labels.len() && labels[li].0 == addr {
                writeln!(w, "{}:", labels[li].1)?;
                li += 1;
            }
            let next = labels
                .get(li)
                .map(|l| l.0)
                .unwrap_or(seg.end)
                .min(seg.end);
            writeln!(w, "    resb {}", next - addr)?;
            addr = next;
        }
    }
    Ok(())
}
