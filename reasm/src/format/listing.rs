use crate::analysis::{Analysis, Label};
use crate::decode::{DecodedInsn, InsnDecoder};
use crate::obj::SegmentKind;
use itertools::Itertools;
use std::collections::HashSet;
use std::error::Error;
use std::io::Write;

/// pass 3: every code segment as assembly, one line per reached
/// instruction with label operands substituted, raw db lines for
/// bytes the walk never explained. a label landing inside an emitted
/// item is pinned with an equ alias so every substituted name has a
/// definition.
pub(crate) fn code_output<W: Write>(
    a: &Analysis,
    decoder: &dyn InsnDecoder,
    visited: &HashSet<u64>,
    w: &mut W,
) -> Result<(), Box<dyn Error>> {
    for seg in a.segments.of_kind(SegmentKind::Code) {
        writeln!(w)?;
        writeln!(w, "section {}", seg.name)?;

        let labels: Vec<&Label> = a.labels.iter().filter(|l| seg.contains(l.addr)).collect();
        let mut li = 0;

        let mut addr = seg.start;
        while addr < seg.end {
            while li < labels.len() && labels[li].addr <= addr {
                if labels[li].addr == addr {
                    writeln!(w, "{}:", name_of(labels[li]))?;
                } else {
                    // inside the previous item, an overlapping entry
                    log::debug!("listing: label {:#0x} pinned with equ", labels[li].addr);
                    writeln!(w, "{} equ $-{:#x}", name_of(labels[li]), addr - labels[li].addr)?;
                }
                li += 1;
            }

            if visited.contains(&addr) {
                let avail = (seg.end - addr).min(16);
                if let Some(bytes) = a.image.slice(addr, avail) {
                    if let Ok(insn) = decoder.decode(bytes, addr) {
                        writeln!(w, "    {}", insn_text(a, &insn))?;
                        addr = insn.end();
                        continue;
                    }
                }
                log::warn!("listing: {:#0x} no longer decodes, dumped raw", addr);
            }

            // a raw run up to the next label or reached instruction
            let mut end = addr + 1;
            while end < seg.end
                && !visited.contains(&end)
                && a.labels.find(end).is_none()
                && end - addr < 8
            {
                end += 1;
            }
            if let Some(bytes) = a.image.slice(addr, end - addr) {
                writeln!(w, "    {}", db_line(bytes))?;
            }
            addr = end;
        }

        while li < labels.len() {
            writeln!(w, "{} equ $-{:#x}", name_of(labels[li]), seg.end - labels[li].addr)?;
            li += 1;
        }
    }
    Ok(())
}

fn name_of(label: &Label) -> &str {
    label.name.as_deref().unwrap_or("?")
}

pub(crate) fn db_line(bytes: &[u8]) -> String {
    format!(
        "db {}",
        bytes.iter().map(|b| format!("{:#04x}", b)).join(", ")
    )
}

/// one listing line, with referenced addresses rewritten to their
/// label names. anything that cannot be rewritten in place lands in a
/// trailing comment so the reference is never lost.
pub(crate) fn insn_text(a: &Analysis, insn: &DecodedInsn) -> String {
    let mut ops = insn.op_str.clone();
    let mut trailing: Vec<&str> = vec![];
    if let Some(r) = a.refs.find(insn.addr) {
        for target in r.targets() {
            let name = match a.labels.find(*target).and_then(|l| l.name.as_deref()) {
                Some(name) => name,
                None => continue,
            };
            let hex = format!("{:#x}", target);
            if !replace_addr(&mut ops, &hex, name) {
                trailing.push(name);
            }
        }
    }
    let line = if ops.is_empty() {
        insn.mnemonic.clone()
    } else {
        format!("{} {}", insn.mnemonic, ops)
    };
    if trailing.is_empty() {
        line
    } else {
        format!("{:<40}; -> {}", line, trailing.iter().join(", "))
    }
}

/// swap a hex literal for a name, but only where the literal stands
/// whole, never as a prefix of a longer one
fn replace_addr(ops: &mut String, hex: &str, name: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = ops[from..].find(hex) {
        let at = from + pos;
        let end = at + hex.len();
        let whole = ops[end..]
            .chars()
            .next()
            .map(|c| !c.is_ascii_hexdigit())
            .unwrap_or(true);
        if whole {
            ops.replace_range(at..end, name);
            return true;
        }
        from = end;
    }
    false
}
