use reasm::*;
use std::env;
use std::error::Error;
use std::fs;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    for path in env::args().skip(1) {
        let bytes = fs::read(&path)?;
        let analysis = Analysis::load(bytes)?;
        analysis.dump(true);
    }
    Ok(())
}
