use crate::obj::{ExternSym, RelocationTable, SegmentKind, SegmentTable};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub enum LabelKind {
    #[default]
    None,
    Bss,
    Data,
    Extern,
    Code,
}

/// merge precedence when two classifications land on one address
fn rank(kind: LabelKind) -> u8 {
    match kind {
        LabelKind::None => 0,
        LabelKind::Bss => 1,
        LabelKind::Data => 2,
        LabelKind::Extern => 3,
        LabelKind::Code => 4,
    }
}

/// the label kind an address earns from the segment it lives in
pub(crate) fn kind_for(segments: &SegmentTable, addr: u64) -> Option<LabelKind> {
    segments.find(addr).map(|s| match s.kind {
        SegmentKind::Code => LabelKind::Code,
        SegmentKind::Data => LabelKind::Data,
        SegmentKind::Bss => LabelKind::Bss,
        SegmentKind::Import => LabelKind::Extern,
        SegmentKind::Reloc => LabelKind::None,
    })
}

#[derive(Debug, Clone)]
pub struct Label {
    pub addr: u64,
    pub kind: LabelKind,
    /// a relocation points here
    pub reloc: bool,
    /// a jump lands here
    pub jump: bool,
    /// a call lands here
    pub call: bool,
    /// first word of a vector table
    pub vtable: bool,
    pub uses: usize,
    pub name: Option<String>,
    pub(crate) ext: Option<ExternSym>,
}

impl Label {
    fn new(addr: u64, kind: LabelKind) -> Self {
        Self {
            addr,
            kind,
            reloc: false,
            jump: false,
            call: false,
            vtable: false,
            uses: 0,
            name: None,
            ext: None,
        }
    }

    /// prefix for a made-up name
    fn prefix(&self) -> &'static str {
        match self.kind {
            LabelKind::Code => {
                if self.call {
                    "fn"
                } else {
                    "loc"
                }
            }
            LabelKind::Data => {
                if self.vtable {
                    "vt"
                } else {
                    "dat"
                }
            }
            LabelKind::Bss => "bss",
            LabelKind::Extern => "ext",
            LabelKind::None => "x",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label[{:#0x}, {:?}", self.addr, self.kind)?;
        if self.reloc {
            write!(f, ", reloc")?;
        }
        if self.jump {
            write!(f, ", jump")?;
        }
        if self.call {
            write!(f, ", call")?;
        }
        if self.vtable {
            write!(f, ", vtable")?;
        }
        if let Some(name) = &self.name {
            write!(f, ", {}", name)?;
        }
        write!(f, ", uses: {}]", self.uses)
    }
}

#[derive(Debug)]
pub struct LabelTable {
    labels: Vec<Label>,
    index: HashMap<u64, usize>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self {
            labels: vec![],
            index: HashMap::new(),
        }
    }

    pub fn find(&self, addr: u64) -> Option<&Label> {
        self.index.get(&addr).map(|i| &self.labels[*i])
    }

    pub fn find_mut(&mut self, addr: u64) -> Option<&mut Label> {
        let i = *self.index.get(&addr)?;
        Some(&mut self.labels[i])
    }

    fn entry(&mut self, addr: u64, kind: LabelKind) -> usize {
        match self.index.get(&addr) {
            Some(i) => {
                let i = *i;
                if rank(kind) > rank(self.labels[i].kind) {
                    self.labels[i].kind = kind;
                }
                i
            }
            None => {
                self.labels.push(Label::new(addr, kind));
                let i = self.labels.len() - 1;
                self.index.insert(addr, i);
                i
            }
        }
    }

    /// merge with any existing label at addr; every insert counts a use
    pub fn insert(&mut self, addr: u64, kind: LabelKind) -> &mut Label {
        let i = self.entry(addr, kind);
        self.labels[i].uses += 1;
        &mut self.labels[i]
    }

    /// like insert but without counting a use, for bookkeeping entries
    /// (relocation targets, extern slots) that are only interesting
    /// once something refers to them
    pub(crate) fn note(&mut self, addr: u64, kind: LabelKind) -> &mut Label {
        let i = self.entry(addr, kind);
        &mut self.labels[i]
    }

    pub fn remove(&mut self, addr: u64) {
        if let Some(i) = self.index.remove(&addr) {
            self.labels.swap_remove(i);
            if i < self.labels.len() {
                self.index.insert(self.labels[i].addr, i);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub fn count_kind(&self, kind: LabelKind) -> usize {
        self.labels.iter().filter(|l| l.kind == kind).count()
    }

    /// raise the reloc flag on every relocation target, creating any
    /// label that is still missing. runs cleanly any number of times.
    pub fn upgrade_from_relocations(
        &mut self,
        relocs: &RelocationTable,
        segments: &SegmentTable,
    ) -> (usize, usize) {
        let mut added = 0;
        let mut upgraded = 0;
        for r in relocs.iter() {
            let existed = self.index.contains_key(&r.target);
            let kind = kind_for(segments, r.target).unwrap_or(LabelKind::None);
            let l = self.note(r.target, kind);
            if !l.reloc {
                l.reloc = true;
                if existed {
                    upgraded += 1;
                } else {
                    added += 1;
                }
            }
        }
        (added, upgraded)
    }

    pub fn sort(&mut self) {
        self.labels.sort_by_key(|l| l.addr);
        self.index.clear();
        for (i, l) in self.labels.iter().enumerate() {
            self.index.insert(l.addr, i);
        }
    }

    /// deterministic names for everything unnamed, in address order.
    /// call after sort so the numbering is stable across runs.
    pub fn generate_names(&mut self) {
        let mut taken: HashSet<String> =
            self.labels.iter().filter_map(|l| l.name.clone()).collect();
        let mut counters: HashMap<&'static str, usize> = HashMap::new();
        for l in self.labels.iter_mut() {
            if l.name.is_some() {
                continue;
            }
            let prefix = l.prefix();
            let counter = counters.entry(prefix).or_insert(0);
            let name = loop {
                let name = format!("{}_{:04x}", prefix, *counter);
                *counter += 1;
                if !taken.contains(&name) {
                    break name;
                }
            };
            taken.insert(name.clone());
            l.name = Some(name);
        }
    }

    pub fn unused(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter().filter(|l| l.uses == 0)
    }

    /// relocation targets nothing ever referenced, worth a look
    pub fn print_unused(&self) -> usize {
        let mut count = 0;
        for l in self.unused() {
            log::warn!("unused: {}", l);
            count += 1;
        }
        count
    }
}
