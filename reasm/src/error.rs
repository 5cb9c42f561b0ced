use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ReasmError {
    InvalidFormat,
    UnsupportedFormat(String),
    Truncated(String),
    UnresolvedSymbol(u64, u32),
    ReferenceOverflow(u64, u64),
    Decode(u64),
    Decoder(String),
}
impl std::error::Error for ReasmError {}
impl fmt::Display for ReasmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReasmError::InvalidFormat => write!(f, "not an ELF image"),
            ReasmError::UnsupportedFormat(reason) => write!(f, "unsupported object: {}", reason),
            ReasmError::Truncated(what) => write!(f, "image too short for {}", what),
            ReasmError::UnresolvedSymbol(site, index) => write!(
                f,
                "relocation at {:#0x} names symbol {} out of table range",
                site, index
            ),
            ReasmError::ReferenceOverflow(site, target) => write!(
                f,
                "too many reference targets at {:#0x}, adding {:#0x}",
                site, target
            ),
            ReasmError::Decode(addr) => write!(f, "undecodable instruction at {:#0x}", addr),
            ReasmError::Decoder(reason) => write!(f, "decoder setup failed: {}", reason),
        }
    }
}
