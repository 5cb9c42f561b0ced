use object::elf;
use object::write::{Object, Relocation, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationFlags, SectionKind, SymbolFlags, SymbolKind,
    SymbolScope,
};
use reasm::*;
use test_log::test;

#[test]
fn rejects_garbage_before_anything_else() {
    let err = Analysis::load(b"not an object".to_vec()).unwrap_err();
    assert_eq!(err, ReasmError::InvalidFormat);

    let mut bytes = TestObj::new().text(&[0xc3]).build();
    bytes[0] = 0;
    assert_eq!(Analysis::load(bytes).unwrap_err(), ReasmError::InvalidFormat);
}

#[test]
fn header_diagnostics_name_the_field() {
    let good = TestObj::new().text(&[0xc3]).build();

    // e_machine
    let mut bytes = good.clone();
    bytes[18] = 0x3e;
    let err = Analysis::load(bytes).unwrap_err();
    assert!(err.to_string().contains("machine"), "{}", err);

    // EI_CLASS
    let mut bytes = good.clone();
    bytes[4] = 2;
    let err = Analysis::load(bytes).unwrap_err();
    assert!(err.to_string().contains("class"), "{}", err);

    // EI_DATA
    let mut bytes = good.clone();
    bytes[5] = 2;
    let err = Analysis::load(bytes).unwrap_err();
    assert!(err.to_string().contains("endian"), "{}", err);

    // e_type
    let mut bytes = good.clone();
    bytes[16] = 2;
    let err = Analysis::load(bytes).unwrap_err();
    assert!(err.to_string().contains("relocatable"), "{}", err);

    // e_shstrndx = SHN_XINDEX
    let mut bytes = good;
    bytes[50] = 0xff;
    bytes[51] = 0xff;
    let err = Analysis::load(bytes).unwrap_err();
    assert!(err.to_string().contains("sections"), "{}", err);
}

#[test]
fn segments_mirror_the_section_table() {
    let bytes = TestObj::new()
        .text(&[0xc3])
        .data(&[1, 2, 3, 4])
        .bss(32)
        .build();
    let file_len = bytes.len() as u64;
    let a = Analysis::load(bytes).unwrap();

    let text = seg(&a, ".text");
    assert_eq!(text.kind, SegmentKind::Code);
    assert_eq!(text.size(), 1);
    assert!(a.image.slice(text.start, text.size()).is_some());

    let data = seg(&a, ".data");
    assert_eq!(data.kind, SegmentKind::Data);
    assert_eq!(data.size(), 4);
    assert_eq!(a.image.slice(data.start, 4).unwrap(), &[1, 2, 3, 4]);

    // synthesized space starts past the aligned end of the file
    let bss = seg(&a, ".bss");
    assert_eq!(bss.kind, SegmentKind::Bss);
    assert_eq!(bss.size(), 32);
    assert!(bss.start >= file_len);
    assert_eq!(bss.start % 4, 0);
    assert!(a.image.slice(bss.start, 1).is_none());

    // address ranges never overlap
    let ranges: Vec<(u64, u64)> = a.segments.iter().map(|s| (s.start, s.end)).collect();
    for (i, x) in ranges.iter().enumerate() {
        for y in ranges.iter().skip(i + 1) {
            assert!(x.1 <= y.0 || y.1 <= x.0, "{:?} overlaps {:?}", x, y);
        }
    }

    // byte addresses resolve to the segment that declared them
    assert_eq!(a.segments.find(text.start).unwrap().name, ".text");
    assert_eq!(a.segments.find(data.start + 3).unwrap().name, ".data");
    assert!(a.segments.find(data.end).is_none());
}

// the classic shape: a call into a data word that points back at itself
#[test]
fn call_and_relocated_word_end_to_end() {
    // resolve segment placement with a throwaway build first, so the
    // call immediate can be computed for the real one
    let layout = TestObj::new()
        .text(&[0xe8, 0, 0, 0, 0, 0xc3])
        .data(&[0, 0, 0, 0])
        .func("start", 0)
        .data_self_ptr()
        .build();
    let a = Analysis::load(layout).unwrap();
    let text_at = seg(&a, ".text").start;
    let data_at = seg(&a, ".data").start;

    let rel = (data_at as i64 - text_at as i64 - 5) as i32;
    let mut code = vec![0xe8];
    code.extend_from_slice(&rel.to_le_bytes());
    code.push(0xc3);

    let bytes = TestObj::new()
        .text(&code)
        .data(&[0, 0, 0, 0])
        .func("start", 0)
        .data_self_ptr()
        .build();
    let (mut engine, a) = analyze(bytes, true);

    assert_eq!(seg(&a, ".text").start, text_at);
    assert_eq!(seg(&a, ".data").start, data_at);

    // exactly one code label, at the entry
    assert_eq!(a.labels.count_kind(LabelKind::Code), 1);
    let entry = a.labels.find(text_at).unwrap();
    assert_eq!(entry.kind, LabelKind::Code);
    assert_eq!(entry.name.as_deref(), Some("start"));

    // the word is data and a relocation target
    let word = a.labels.find(data_at).unwrap();
    assert_eq!(word.kind, LabelKind::Data);
    assert!(word.reloc);
    assert_eq!(word.name.as_deref(), Some("dat_0000"));

    // one reference, call site to word
    assert_eq!(a.refs.len(), 1);
    assert_eq!(a.refs.find(text_at).unwrap().targets(), &[data_at]);

    // nothing dangles
    assert_eq!(a.labels.unused().count(), 0);

    // the listing names the word, the data section points at itself
    let code_text = listing(&mut engine, &a);
    assert!(code_text.contains("start:"), "{}", code_text);
    assert!(code_text.contains("call dat_0000"), "{}", code_text);
    let data_text = output(data_output, &a);
    assert!(data_text.contains("dat_0000:"), "{}", data_text);
    assert!(data_text.contains("dd dat_0000"), "{}", data_text);
}

#[test]
fn call_chain_reaches_fixed_point() {
    // f0 calls f1 calls f2, only f0 is named
    let code = [
        0xe8, 0x01, 0x00, 0x00, 0x00, // call +1 -> 0x6
        0xc3, // ret
        0xe8, 0x01, 0x00, 0x00, 0x00, // call +1 -> 0xc
        0xc3, // ret
        0xc3, // ret
    ];
    let bytes = TestObj::new().text(&code).func("f0", 0).build();
    let mut a = Analysis::load(bytes).unwrap();
    let text_at = seg(&a, ".text").start;

    let mut engine = Engine::new(CapstoneDecoder::new(true).unwrap(), Config::new());
    engine.seed(&mut a);
    assert_eq!(engine.phase(), Phase::Iterating);

    // each pass discovers the next link, then the loop closes
    assert_eq!(engine.iterate(&mut a).unwrap(), 1);
    assert_eq!(engine.iterate(&mut a).unwrap(), 1);
    assert_eq!(engine.iterate(&mut a).unwrap(), 0);

    engine.converge(&mut a);
    assert_eq!(engine.phase(), Phase::Converged);

    for off in [0, 6, 0xc] {
        let l = a.labels.find(text_at + off).unwrap();
        assert_eq!(l.kind, LabelKind::Code, "offset {:#0x}", off);
    }
    assert!(a.labels.find(text_at + 6).unwrap().call);
    for off in [0, 5, 6, 0xb, 0xc] {
        assert!(engine.visited().contains(&(text_at + off)), "{:#0x}", off);
    }

    let text = listing(&mut engine, &a);
    assert!(text.contains("f0:"), "{}", text);
    assert!(text.contains("call fn_0000"), "{}", text);
}

#[test]
fn vector_table_entries_become_code() {
    // start loads the table address; both table words relocate into .text
    let code = [
        0xa1, 0, 0, 0, 0, // mov eax, [table]
        0xc3, // ret
        0xc3, // ret, table slot 0
        0xc3, // ret, table slot 1
    ];
    let bytes = TestObj::new()
        .text(&code)
        .data(&[6, 0, 0, 0, 7, 0, 0, 0])
        .func("start", 0)
        .reloc_text_to_data(1)
        .reloc_data_to_text(0)
        .reloc_data_to_text(4)
        .build();
    let (mut engine, a) = analyze(bytes, true);
    let text_at = seg(&a, ".text").start;
    let data_at = seg(&a, ".data").start;

    let table = a.labels.find(data_at).unwrap();
    assert_eq!(table.kind, LabelKind::Data);
    assert!(table.vtable);
    assert_eq!(table.name.as_deref(), Some("vt_0000"));

    for off in [6, 7] {
        let l = a.labels.find(text_at + off).unwrap();
        assert_eq!(l.kind, LabelKind::Code, "offset {}", off);
        assert!(engine.visited().contains(&(text_at + off)));
    }

    let data_text = output(data_output, &a);
    assert!(data_text.contains("vt_0000:"), "{}", data_text);
    assert!(data_text.contains("dd loc_0000"), "{}", data_text);
    assert!(data_text.contains("dd loc_0001"), "{}", data_text);

    let text = listing(&mut engine, &a);
    assert!(text.contains("loc_0000:"), "{}", text);
    assert!(text.contains("loc_0001:"), "{}", text);
}

#[test]
fn undefined_symbols_become_externs() {
    // call ext_fn (pc32), then call [puts] through a slot (abs32)
    let code = [
        0xe8, 0xfc, 0xff, 0xff, 0xff, // call ext_fn
        0xff, 0x15, 0, 0, 0, 0, // call dword ptr [puts]
        0xc3, // ret
    ];
    let bytes = TestObj::new()
        .text(&code)
        .func("start", 0)
        .undef_pc32("ext_fn", 1)
        .undef_abs32("puts", 7)
        .build();
    let (mut engine, a) = analyze(bytes, true);
    let text_at = seg(&a, ".text").start;

    assert_eq!(a.relocs.externs().len(), 2);
    let import = seg(&a, ".import");
    assert_eq!(import.kind, SegmentKind::Import);
    assert_eq!(import.size(), 8);

    for ext in a.relocs.externs() {
        let l = a.labels.find(ext.slot).unwrap();
        assert_eq!(l.kind, LabelKind::Extern);
        assert_eq!(l.name.as_deref(), Some(ext.symbol.as_str()));
        assert!(l.call, "{} never flagged as a call target", ext.symbol);
    }

    assert_eq!(a.refs.find(text_at).unwrap().targets().len(), 1);
    assert_eq!(a.refs.find(text_at + 5).unwrap().targets().len(), 1);

    let externs = output(extern_output, &a);
    assert!(externs.contains("extern ext_fn"), "{}", externs);
    assert!(externs.contains("extern puts"), "{}", externs);

    let text = listing(&mut engine, &a);
    assert!(text.contains("call ext_fn"), "{}", text);
    assert!(text.contains("[puts]"), "{}", text);

    let stubs = output(stub_output, &a);
    assert!(stubs.contains("ext_fn_stub:"), "{}", stubs);
    assert!(stubs.contains("jmp [puts]"), "{}", stubs);
}

#[test]
fn applying_relocations_twice_changes_nothing() {
    let code = [0xff, 0x15, 0, 0, 0, 0, 0xc3];
    let bytes = TestObj::new()
        .text(&code)
        .data(&[0, 0, 0, 0])
        .func("start", 0)
        .undef_abs32("puts", 2)
        .data_self_ptr()
        .build();
    let (_, mut a) = analyze(bytes, true);

    let image = a.image.bytes().to_vec();
    let labels: Vec<(u64, LabelKind, bool, usize)> = a
        .labels
        .iter()
        .map(|l| (l.addr, l.kind, l.reloc, l.uses))
        .collect();

    assert_eq!(a.apply_relocations(true), (0, 0));
    assert_eq!(a.image.bytes(), image.as_slice());
    let again: Vec<(u64, LabelKind, bool, usize)> = a
        .labels
        .iter()
        .map(|l| (l.addr, l.kind, l.reloc, l.uses))
        .collect();
    assert_eq!(labels, again);
}

#[test]
fn unpatched_run_finds_the_same_structure() {
    let code = [0xe8, 0xfc, 0xff, 0xff, 0xff, 0xc3];
    let build = || {
        TestObj::new()
            .text(&code)
            .func("start", 0)
            .undef_pc32("ext_fn", 1)
            .build()
    };
    let input = build();
    let (mut patched_engine, patched) = analyze(build(), true);
    let (mut plain_engine, plain) = analyze(build(), false);

    let shape = |a: &Analysis| -> Vec<(u64, LabelKind, bool, bool)> {
        a.labels
            .iter()
            .map(|l| (l.addr, l.kind, l.reloc, l.call))
            .collect()
    };
    assert_eq!(shape(&patched), shape(&plain));
    assert_eq!(patched.refs.len(), plain.refs.len());

    // without patching the image is left exactly as it came in
    assert_eq!(plain.image.bytes(), input.as_slice());
    assert_ne!(patched.image.bytes(), input.as_slice());

    // the reference survives either way, in the operand or a comment
    assert!(listing(&mut patched_engine, &patched).contains("ext_fn"));
    assert!(listing(&mut plain_engine, &plain).contains("ext_fn"));
}

#[test]
fn undecodable_entries_fall_back_to_raw_bytes() {
    let bytes = TestObj::new()
        .text(&[0xc3, 0xff, 0xff])
        .func("start", 0)
        .func("bad", 1)
        .build();
    let (mut engine, a) = analyze(bytes, true);
    let text_at = seg(&a, ".text").start;

    assert!(!engine.visited().contains(&(text_at + 1)));
    let text = listing(&mut engine, &a);
    assert!(text.contains("bad:"), "{}", text);
    assert!(text.contains("db 0xff, 0xff"), "{}", text);
    assert_eq!(engine.phase(), Phase::Finalized);
}

#[test]
fn label_inside_an_instruction_gets_an_alias() {
    // f1 calls two bytes into f0's mov immediate, overlapping but legal
    let code = [
        0xb8, 0x90, 0x90, 0x90, 0x90, // mov eax, 0x90909090
        0xc3, // ret
        0xe8, 0xf7, 0xff, 0xff, 0xff, // call f0+2
        0xc3, // ret
    ];
    let bytes = TestObj::new()
        .text(&code)
        .func("f0", 0)
        .func("f1", 6)
        .build();
    let (mut engine, a) = analyze(bytes, true);
    let text_at = seg(&a, ".text").start;

    // the hidden entry is real code and was walked
    let l = a.labels.find(text_at + 2).unwrap();
    assert_eq!(l.kind, LabelKind::Code);
    assert!(l.call);
    assert!(engine.visited().contains(&(text_at + 2)));

    // the name the call operand uses is defined, pinned to its offset
    let text = listing(&mut engine, &a);
    assert!(text.contains("call fn_0000"), "{}", text);
    assert!(text.contains("fn_0000 equ $-0x3"), "{}", text);
    assert!(!text.contains("fn_0000:"), "{}", text);
}

#[test]
fn label_inside_a_data_word_gets_an_alias() {
    // the mov reads two bytes into the relocated word at data+0
    let code = [0xa1, 2, 0, 0, 0, 0xc3];
    let bytes = TestObj::new()
        .text(&code)
        .data(&[0, 0, 0, 0, 0xaa, 0xbb, 0xcc, 0xdd])
        .func("start", 0)
        .reloc_text_to_data(1)
        .data_self_ptr()
        .build();
    let (mut engine, a) = analyze(bytes, true);
    let data_at = seg(&a, ".data").start;

    assert_eq!(a.labels.find(data_at + 2).unwrap().kind, LabelKind::Data);

    let data_text = output(data_output, &a);
    assert!(data_text.contains("dd dat_0000"), "{}", data_text);
    assert!(data_text.contains("dat_0001 equ $-0x2"), "{}", data_text);
    assert!(data_text.contains("db 0xaa, 0xbb, 0xcc, 0xdd"), "{}", data_text);

    let text = listing(&mut engine, &a);
    assert!(text.contains("[dat_0001]"), "{}", text);
}

#[test]
fn bss_labels_and_runs() {
    // mov eax, [bss + 4]
    let code = [0xa1, 4, 0, 0, 0, 0xc3];
    let bytes = TestObj::new()
        .text(&code)
        .bss(16)
        .func("start", 0)
        .reloc_text_to_bss(1)
        .build();
    let (_, a) = analyze(bytes, true);
    let bss_at = seg(&a, ".bss").start;

    let l = a.labels.find(bss_at + 4).unwrap();
    assert_eq!(l.kind, LabelKind::Bss);
    assert!(l.reloc);

    let text = output(bss_output, &a);
    assert!(text.contains("section .bss nobits"), "{}", text);
    assert!(text.contains("resb 4"), "{}", text);
    assert!(text.contains("bss_0000:"), "{}", text);
    assert!(text.contains("resb 12"), "{}", text);
}

#[test]
fn unreferenced_reloc_target_is_reported_unused() {
    let bytes = TestObj::new()
        .text(&[0xc3])
        .data(&[4, 0, 0, 0, 0xaa, 0xbb, 0xcc, 0xdd])
        .func("start", 0)
        .data_self_ptr() // the word points at data+4, nothing else does
        .build();
    let (_, a) = analyze(bytes, true);
    let data_at = seg(&a, ".data").start;

    let unused: Vec<u64> = a.labels.unused().map(|l| l.addr).collect();
    assert_eq!(unused, vec![data_at + 4]);
    assert_eq!(a.labels.print_unused(), 1);

    // the data emitter still renders the pointer through its label
    let text = output(data_output, &a);
    assert!(text.contains("dd dat_0000"), "{}", text);
    assert!(text.contains("db 0xaa, 0xbb, 0xcc, 0xdd"), "{}", text);
}

#[test]
fn full_pipeline_writes_every_listing() {
    let code = [0xe8, 0xfc, 0xff, 0xff, 0xff, 0xc3];
    let bytes = TestObj::new()
        .text(&code)
        .data(&[1, 2, 3, 4])
        .bss(8)
        .func("start", 0)
        .undef_pc32("ext_fn", 1)
        .build();
    let mut a = Analysis::load(bytes).unwrap();
    let mut engine = Engine::new(CapstoneDecoder::new(true).unwrap(), Config::new());
    engine.analyze(&mut a).unwrap();

    let mut out = vec![];
    extern_output(&a, &mut out).unwrap();
    engine.finalize(&a, &mut out).unwrap();
    data_output(&a, &mut out).unwrap();
    bss_output(&a, &mut out).unwrap();
    stub_output(&a, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(engine.phase(), Phase::Finalized);
    assert!(text.starts_with("extern ext_fn"), "{}", text);
    let section_text = text.find("section .text").unwrap();
    let section_data = text.find("section .data").unwrap();
    let section_bss = text.find("section .bss").unwrap();
    assert!(
        section_text < section_data && section_data < section_bss,
        "{}",
        text
    );
    assert!(text.contains("db 0x01, 0x02, 0x03, 0x04"), "{}", text);
    assert!(text.contains("resb 8"), "{}", text);
    assert!(text.contains("ext_fn_stub:"), "{}", text);
}

struct TestObj {
    obj: Object<'static>,
    text: object::write::SectionId,
    data: object::write::SectionId,
    bss: object::write::SectionId,
}

impl TestObj {
    fn new() -> Self {
        let mut obj = Object::new(BinaryFormat::Elf, Architecture::I386, Endianness::Little);
        let text = obj.add_section(vec![], b".text".to_vec(), SectionKind::Text);
        let data = obj.add_section(vec![], b".data".to_vec(), SectionKind::Data);
        let bss = obj.add_section(vec![], b".bss".to_vec(), SectionKind::UninitializedData);
        Self {
            obj,
            text,
            data,
            bss,
        }
    }

    fn text(mut self, bytes: &[u8]) -> Self {
        self.obj.append_section_data(self.text, bytes, 4);
        self
    }

    fn data(mut self, bytes: &[u8]) -> Self {
        self.obj.append_section_data(self.data, bytes, 4);
        self
    }

    fn bss(mut self, size: u64) -> Self {
        self.obj.append_section_bss(self.bss, size, 4);
        self
    }

    fn func(mut self, name: &str, value: u64) -> Self {
        self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size: 0,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(self.text),
            flags: SymbolFlags::None,
        });
        self
    }

    fn undef(&mut self, name: &str) -> object::write::SymbolId {
        self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Unknown,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        })
    }

    fn rel(&mut self, section: object::write::SectionId, offset: u64, symbol: object::write::SymbolId, r_type: u32) {
        self.obj
            .add_relocation(
                section,
                Relocation {
                    offset,
                    symbol,
                    addend: 0,
                    flags: RelocationFlags::Elf { r_type },
                },
            )
            .unwrap();
    }

    /// pc32 against an undefined symbol; the addend stays in the
    /// instruction bytes
    fn undef_pc32(mut self, name: &str, offset: u64) -> Self {
        let symbol = self.undef(name);
        let text = self.text;
        self.rel(text, offset, symbol, elf::R_386_PC32);
        self
    }

    fn undef_abs32(mut self, name: &str, offset: u64) -> Self {
        let symbol = self.undef(name);
        let text = self.text;
        self.rel(text, offset, symbol, elf::R_386_32);
        self
    }

    /// abs32 in .text against the .data base, offset bytes at the site
    fn reloc_text_to_data(mut self, offset: u64) -> Self {
        let symbol = self.obj.section_symbol(self.data);
        let text = self.text;
        self.rel(text, offset, symbol, elf::R_386_32);
        self
    }

    fn reloc_text_to_bss(mut self, offset: u64) -> Self {
        let symbol = self.obj.section_symbol(self.bss);
        let text = self.text;
        self.rel(text, offset, symbol, elf::R_386_32);
        self
    }

    /// abs32 in .data against the .text base
    fn reloc_data_to_text(mut self, offset: u64) -> Self {
        let symbol = self.obj.section_symbol(self.text);
        let data = self.data;
        self.rel(data, offset, symbol, elf::R_386_32);
        self
    }

    /// the word at data+0 relocates against the .data base, with the
    /// stored bytes as the offset
    fn data_self_ptr(mut self) -> Self {
        let symbol = self.obj.section_symbol(self.data);
        let data = self.data;
        self.rel(data, 0, symbol, elf::R_386_32);
        self
    }

    fn build(self) -> Vec<u8> {
        self.obj.write().unwrap()
    }
}

fn seg<'a>(a: &'a Analysis, name: &str) -> &'a Segment {
    a.segments
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("no segment {}", name))
}

fn analyze(bytes: Vec<u8>, patch: bool) -> (Engine<CapstoneDecoder>, Analysis) {
    let mut a = Analysis::load(bytes).unwrap();
    let mut config = Config::new();
    config.patch_image = patch;
    let mut engine = Engine::new(CapstoneDecoder::new(true).unwrap(), config);
    engine.analyze(&mut a).unwrap();
    (engine, a)
}

fn listing(engine: &mut Engine<CapstoneDecoder>, a: &Analysis) -> String {
    let mut out = vec![];
    engine.finalize(a, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn output<F>(emit: F, a: &Analysis) -> String
where
    F: Fn(&Analysis, &mut Vec<u8>) -> Result<(), Box<dyn std::error::Error>>,
{
    let mut out = vec![];
    emit(a, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}
