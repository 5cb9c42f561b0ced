/// knobs threaded through one run
#[derive(Debug, Clone)]
pub struct Config {
    pub verbose: bool,
    /// resolve relocation sites in the working image before reading
    /// operands back out of it
    pub patch_image: bool,
    pub intel_syntax: bool,
}

impl Config {
    pub fn new() -> Self {
        Self {
            verbose: false,
            patch_image: true,
            intel_syntax: true,
        }
    }
}
