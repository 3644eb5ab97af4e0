use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chip8_core::CLOCK_SPEED;
use chip8_display::DEFAULT_SCALE;

mod keymap;
mod observer;
mod run;

/// A Chip-8 interpreter
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Options {
    /// The ROM to run
    rom: PathBuf,

    /// Instructions executed per second
    #[arg(long, default_value_t = CLOCK_SPEED, value_parser = clap::value_parser!(u32).range(1..))]
    hz: u32,

    /// Size multiplier for each pixel
    #[arg(long, default_value_t = DEFAULT_SCALE, value_parser = clap::value_parser!(u32).range(1..))]
    scale: u32,

    /// Log every executed opcode and each drawn frame
    #[arg(long)]
    trace: bool,

    /// Don't ring the terminal bell while the sound timer runs
    #[arg(long)]
    mute: bool,
}

fn main() -> Result<()> {
    let options = Options::parse();

    let default = if options.trace { "trace" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();

    run::run(&options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::try_parse_from(["chip8", "pong.ch8"]).unwrap();
        assert_eq!(options.rom, PathBuf::from("pong.ch8"));
        assert_eq!(options.hz, CLOCK_SPEED);
        assert_eq!(options.scale, DEFAULT_SCALE);
        assert!(!options.trace);
        assert!(!options.mute);
    }

    #[test]
    fn test_flags() {
        let options =
            Options::try_parse_from(["chip8", "--hz", "1000", "--trace", "--mute", "a.ch8"])
                .unwrap();
        assert_eq!(options.hz, 1000);
        assert!(options.trace);
        assert!(options.mute);
    }

    #[test]
    fn test_zero_hz_is_rejected() {
        assert!(Options::try_parse_from(["chip8", "--hz", "0", "a.ch8"]).is_err());
    }

    #[test]
    fn test_rom_is_required() {
        assert!(Options::try_parse_from(["chip8"]).is_err());
    }
}
