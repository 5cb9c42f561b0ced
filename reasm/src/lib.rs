mod analysis;
mod error;
mod format;
mod obj;
pub mod decode;

pub use analysis::{
    Analysis, Config, Engine, Label, LabelKind, LabelTable, Phase, Reference, ReferenceTable,
    MAX_REF_TARGET,
};
pub use decode::{CapstoneDecoder, DecodedInsn, InsnDecoder, InsnFlow};
pub use error::ReasmError;
pub use format::{bss_output, data_output, extern_output, print_bytes, stub_output};
pub use obj::{
    size_align, ExternSym, Image, ObjSymbol, RelocKind, Relocation, RelocationTable, Segment,
    SegmentKind, SegmentTable, SymbolTable,
};
