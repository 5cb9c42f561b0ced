pub(crate) mod data;
pub(crate) mod externs;
pub(crate) mod listing;

pub use data::*;
pub use externs::*;
pub use listing::*;

/// hex dump for verbose segment listings
pub fn print_bytes(buf: &[u8], _base: usize) {
    use pretty_hex::*;
    let cfg = HexConfig {
        title: false,
        ascii: true,
        width: 16,
        group: 2,
        chunk: 4,
        ..HexConfig::default()
    };
    println!("{}", config_hex(&buf.to_vec(), cfg));
}
