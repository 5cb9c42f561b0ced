use crate::analysis::{Analysis, LabelKind};
use std::error::Error;
use std::io::Write;

/// one extern declaration per synthesized slot
pub fn extern_output<W: Write>(a: &Analysis, w: &mut W) -> Result<(), Box<dyn Error>> {
    for l in a.labels.iter().filter(|l| l.kind == LabelKind::Extern) {
        let name = l.name.as_deref().unwrap_or("?");
        match l.ext.as_ref().and_then(|e| e.module.as_deref()) {
            Some(module) => writeln!(w, "extern {:<24}; from {}", name, module)?,
            None => writeln!(w, "extern {}", name)?,
        }
    }
    Ok(())
}

/// trampolines for externs that were branch targets, so code that
/// branched through a slot still lands on the real symbol after the
/// next link resolves it
pub fn stub_output<W: Write>(a: &Analysis, w: &mut W) -> Result<(), Box<dyn Error>> {
    let stubs: Vec<_> = a
        .labels
        .iter()
        .filter(|l| l.kind == LabelKind::Extern && (l.call || l.jump))
        .collect();
    if stubs.is_empty() {
        return Ok(());
    }
    writeln!(w)?;
    writeln!(w, "section .text")?;
    for l in stubs {
        let name = l.name.as_deref().unwrap_or("?");
        writeln!(w, "{}_stub:", name)?;
        writeln!(w, "    jmp [{}]", name)?;
    }
    Ok(())
}
