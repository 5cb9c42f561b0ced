// the three-pass core: seed labels, chase references to a fixed
// point, then write the listing back out

use super::config::Config;
use super::labels::{kind_for, Label, LabelKind};
use super::Analysis;
use crate::decode::{DecodedInsn, InsnDecoder, InsnFlow};
use crate::error::ReasmError;
use crate::format;
use crate::obj::SegmentKind;
use std::collections::HashSet;
use std::error::Error;
use std::io::Write;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Phase {
    Seeding,
    Iterating,
    Converged,
    Finalized,
}

pub struct Engine<D: InsnDecoder> {
    decoder: D,
    config: Config,
    phase: Phase,
    /// instruction starts already decoded
    visited: HashSet<u64>,
    /// addresses the decoder gave up on
    bad: HashSet<u64>,
    /// code labels the current pass turned up
    found: usize,
}

impl<D: InsnDecoder> Engine<D> {
    pub fn new(decoder: D, config: Config) -> Self {
        Self {
            decoder,
            config,
            phase: Phase::Seeding,
            visited: HashSet::new(),
            bad: HashSet::new(),
            found: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn visited(&self) -> &HashSet<u64> {
        &self.visited
    }

    /// pass 1: labels for declared functions and data, extern slots and
    /// relocation targets, plus a segment-start fallback when nothing
    /// names an entry point
    pub fn seed(&mut self, a: &mut Analysis) {
        assert_eq!(self.phase, Phase::Seeding);

        let mut entries = 0;
        for sym in a.symbols.iter() {
            if sym.name.is_empty() || sym.is_section() || !sym.is_defined() {
                continue;
            }
            let addr = match sym.address(&a.segments) {
                Some(addr) => addr,
                None => continue,
            };
            let seg = match a.segments.find(addr) {
                Some(s) => s.kind,
                None => continue,
            };
            match seg {
                SegmentKind::Code => {
                    if sym.is_object() {
                        // data dropped into the code section keeps its kind
                        let l = a.labels.insert(addr, LabelKind::Data);
                        if l.name.is_none() {
                            l.name = Some(sym.name.clone());
                        }
                    } else {
                        let l = a.labels.insert(addr, LabelKind::Code);
                        if l.name.is_none() {
                            l.name = Some(sym.name.clone());
                        }
                        if sym.is_func() {
                            l.call = true;
                        }
                        entries += 1;
                    }
                }
                SegmentKind::Data => {
                    let l = a.labels.insert(addr, LabelKind::Data);
                    if l.name.is_none() {
                        l.name = Some(sym.name.clone());
                    }
                }
                SegmentKind::Bss => {
                    let l = a.labels.insert(addr, LabelKind::Bss);
                    if l.name.is_none() {
                        l.name = Some(sym.name.clone());
                    }
                }
                _ => {}
            }
        }

        if entries == 0 {
            let starts: Vec<u64> = a
                .segments
                .of_kind(SegmentKind::Code)
                .map(|s| s.start)
                .collect();
            for start in starts {
                log::debug!("seed: no function symbols, fallback entry {:#0x}", start);
                a.labels.insert(start, LabelKind::Code);
            }
        }

        let externs: Vec<_> = a.relocs.externs().to_vec();
        for ext in externs {
            let l = a.labels.note(ext.slot, LabelKind::Extern);
            l.name = Some(ext.symbol.clone());
            l.ext = Some(ext);
        }

        let targets: Vec<u64> = a.relocs.iter().map(|r| r.target).collect();
        for target in targets {
            if let Some(kind) = kind_for(&a.segments, target) {
                a.labels.note(target, kind);
            }
        }

        log::info!(
            "seed: {} labels, {} named code entries, {} externs",
            a.labels.len(),
            entries,
            a.relocs.externs().len()
        );
        self.phase = Phase::Iterating;
    }

    /// pass 2: walk every unexplored code label, growing the label and
    /// reference tables. returns how many code labels this pass turned
    /// up, zero once the tables stop moving.
    pub fn iterate(&mut self, a: &mut Analysis) -> Result<usize, ReasmError> {
        assert_eq!(self.phase, Phase::Iterating);
        self.found = 0;

        let starts: Vec<u64> = a
            .labels
            .iter()
            .filter(|l| {
                l.kind == LabelKind::Code
                    && !self.visited.contains(&l.addr)
                    && !self.bad.contains(&l.addr)
            })
            .map(|l| l.addr)
            .collect();

        for start in starts {
            // an earlier walk this pass may have disproved the label
            let live = a
                .labels
                .find(start)
                .map(|l| l.kind == LabelKind::Code)
                .unwrap_or(false);
            if live {
                self.walk(a, start)?;
            }
        }

        log::debug!("pass: {} new code labels", self.found);
        Ok(self.found)
    }

    fn walk(&mut self, a: &mut Analysis, start: u64) -> Result<(), ReasmError> {
        let seg_end = match a.segments.find(start) {
            Some(s) if s.kind == SegmentKind::Code => s.end,
            _ => {
                log::debug!("walk: {:#0x} is not in a code segment", start);
                self.visited.insert(start);
                return Ok(());
            }
        };

        let mut addr = start;
        while addr < seg_end {
            if self.visited.contains(&addr) {
                break;
            }
            let avail = (seg_end - addr).min(16);
            let bytes = match a.image.slice(addr, avail) {
                Some(bytes) => bytes,
                None => break,
            };
            let insn = match self.decoder.decode(bytes, addr) {
                Ok(insn) => insn,
                Err(_) => {
                    log::warn!("walk: undecodable at {:#0x}, left as data", addr);
                    self.bad.insert(addr);
                    break;
                }
            };
            self.visited.insert(addr);

            // code labels proven to point inside this instruction go away
            for inner in addr + 1..insn.end() {
                if let Some(l) = a.labels.find(inner) {
                    if l.kind == LabelKind::Code && !self.visited.contains(&inner) {
                        log::debug!("walk: {:#0x} is inside an instruction, dropped", inner);
                        a.labels.remove(inner);
                    }
                }
            }

            self.operands(a, &insn)?;

            match insn.flow {
                InsnFlow::Return | InsnFlow::Jump => break,
                _ => addr = insn.end(),
            }
        }
        Ok(())
    }

    fn operands(&mut self, a: &mut Analysis, insn: &DecodedInsn) -> Result<(), ReasmError> {
        // relocations inside the instruction trump whatever the raw
        // bytes happen to look like
        let inner: Vec<_> = a.relocs.sites_in(insn.addr, insn.end()).to_vec();
        for r in inner.iter() {
            self.touch(a, insn, r.target, false)?;
        }
        if !inner.is_empty() {
            return Ok(());
        }

        if let Some(target) = insn.target {
            self.touch(a, insn, target, false)?;
        }
        for disp in insn.mem_disps.clone() {
            self.touch(a, insn, disp, true)?;
        }
        Ok(())
    }

    fn touch(
        &mut self,
        a: &mut Analysis,
        insn: &DecodedInsn,
        target: u64,
        disp: bool,
    ) -> Result<(), ReasmError> {
        let kind = match kind_for(&a.segments, target) {
            Some(kind) => kind,
            None => {
                log::debug!(
                    "walk: {:#0x} refers to {:#0x}, outside the image",
                    insn.addr,
                    target
                );
                return Ok(());
            }
        };
        match kind {
            LabelKind::Code => {
                if disp {
                    // a bare displacement into code proves nothing
                    log::debug!(
                        "walk: {:#0x} displacement {:#0x} lands in code, ignored",
                        insn.addr,
                        target
                    );
                    return Ok(());
                }
                let l = self.code_label(a, target);
                match insn.flow {
                    InsnFlow::Call => l.call = true,
                    InsnFlow::Jump | InsnFlow::CondJump => l.jump = true,
                    _ => {}
                }
            }
            LabelKind::Data | LabelKind::Bss => {
                a.labels.insert(target, kind);
                if kind == LabelKind::Data {
                    self.scan_vtable(a, target);
                }
            }
            LabelKind::Extern => {
                let l = a.labels.insert(target, LabelKind::Extern);
                match insn.flow {
                    InsnFlow::Call => l.call = true,
                    InsnFlow::Jump | InsnFlow::CondJump => l.jump = true,
                    _ => {}
                }
            }
            LabelKind::None => return Ok(()),
        }
        a.refs.insert(insn.addr, target, &mut a.labels)?;
        Ok(())
    }

    /// code label insert that tracks pass-2 discovery
    fn code_label<'a>(&mut self, a: &'a mut Analysis, target: u64) -> &'a mut Label {
        let was_code = a
            .labels
            .find(target)
            .map(|l| l.kind == LabelKind::Code)
            .unwrap_or(false);
        let l = a.labels.insert(target, LabelKind::Code);
        if !was_code {
            self.found += 1;
        }
        l
    }

    /// a run of relocated words all pointing into code marks a vector
    /// table, and every entry in it is reachable code
    fn scan_vtable(&mut self, a: &mut Analysis, addr: u64) {
        let seg_end = match a.segments.find(addr) {
            Some(s) => s.end,
            None => return,
        };
        let mut entries = vec![];
        let mut p = addr;
        while p + 4 <= seg_end {
            let target = match a.relocs.target_at(p) {
                Some(target) => target,
                None => break,
            };
            match kind_for(&a.segments, target) {
                Some(LabelKind::Code) => entries.push(target),
                _ => break,
            }
            p += 4;
        }
        if entries.len() < 2 {
            return;
        }
        log::debug!("vtable at {:#0x}, {} entries", addr, entries.len());
        if let Some(l) = a.labels.find_mut(addr) {
            l.vtable = true;
        }
        for target in entries {
            self.code_label(a, target);
        }
    }

    /// apply relocations, then close the tables: sort, name, report
    pub fn converge(&mut self, a: &mut Analysis) {
        assert_eq!(self.phase, Phase::Iterating);
        let (added, upgraded) = a.apply_relocations(self.config.patch_image);
        log::info!(
            "converged: {} labels, {} added and {} upgraded by relocations",
            a.labels.len(),
            added,
            upgraded
        );
        a.labels.sort();
        a.labels.generate_names();
        for r in a.refs.iter() {
            log::debug!(target: "references", "{}", r);
        }
        a.labels.print_unused();
        self.phase = Phase::Converged;
    }

    /// drive seeding and iteration to the fixed point, then close the
    /// tables for output
    pub fn analyze(&mut self, a: &mut Analysis) -> Result<(), ReasmError> {
        self.seed(a);
        let mut passes = 0;
        loop {
            passes += 1;
            let found = self.iterate(a)?;
            log::info!("pass {}: {} new code labels", passes, found);
            if found == 0 {
                break;
            }
        }
        self.converge(a);
        Ok(())
    }

    /// pass 3: the reconstructed code listing
    pub fn finalize<W: Write>(&mut self, a: &Analysis, w: &mut W) -> Result<(), Box<dyn Error>> {
        assert_eq!(self.phase, Phase::Converged);
        format::code_output(a, &self.decoder, &self.visited, w)?;
        self.phase = Phase::Finalized;
        Ok(())
    }

    /// the whole pipeline against one loaded image
    pub fn run<W: Write>(&mut self, a: &mut Analysis, w: &mut W) -> Result<(), Box<dyn Error>> {
        self.analyze(a)?;
        self.finalize(a, w)
    }
}
