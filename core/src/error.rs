use std::io;

use thiserror::Error;

/// Everything that can stop the machine from loading or running a program.
#[derive(Debug, Error)]
pub enum MachineError {
    /// The program would run past the end of memory. Nothing was written.
    #[error("program of {size} bytes does not fit at {origin:#05X} ({capacity} bytes available)")]
    ProgramTooLarge {
        size: usize,
        origin: u16,
        capacity: usize,
    },

    #[error("unable to read program")]
    Io(#[from] io::Error),

    /// A call was made with every stack slot already in use.
    #[error("stack overflow at {pc:#05X} calling {target:#05X}")]
    StackOverflow { pc: u16, target: u16 },

    /// A return was made with nothing on the stack.
    #[error("stack underflow at {pc:#05X}: return with no matching call")]
    StackUnderflow { pc: u16 },
}
