use clap::Parser;
use reasm::*;
use std::error::Error;
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    verbose: bool,
    /// leave relocation sites unpatched in the working image
    #[arg(long)]
    no_patch: bool,
    /// AT&T operand syntax instead of intel
    #[arg(long)]
    att: bool,
    #[arg(short, long)]
    output: Option<String>,
    input: String,
}

/// default RUST_LOG floor, raised to debug by -v
fn log_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "error"
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let env = env_logger::Env::default().default_filter_or(log_filter(args.verbose));
    env_logger::Builder::from_env(env).init();

    let mut config = Config::new();
    if args.verbose {
        config.verbose = true;
    }
    config.patch_image = !args.no_patch;
    config.intel_syntax = !args.att;

    let bytes = fs::read(&args.input)?;
    log::info!("{}: {} bytes", args.input, bytes.len());
    let mut analysis = Analysis::load(bytes)?;

    if config.verbose {
        analysis.dump(true);
    }

    let decoder = CapstoneDecoder::new(config.intel_syntax)?;
    let mut engine = Engine::new(decoder, config);
    engine.analyze(&mut analysis)?;

    let mut w: BufWriter<Box<dyn Write>> = match args.output {
        Some(path) => BufWriter::new(Box::new(File::create(path)?)),
        None => BufWriter::new(Box::new(std::io::stdout())),
    };

    // externs first so every name is declared before the code uses it
    extern_output(&analysis, &mut w)?;
    engine.finalize(&analysis, &mut w)?;
    data_output(&analysis, &mut w)?;
    bss_output(&analysis, &mut w)?;
    stub_output(&analysis, &mut w)?;
    w.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_the_log_floor() {
        assert_eq!(log_filter(true), "debug");
        assert_eq!(log_filter(false), "error");
    }
}
