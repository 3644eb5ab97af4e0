use std::time::Duration;

use crate::constants::{
    ADDRESS_MASK, DISPLAY_HEIGHT, DISPLAY_WIDTH, KEY_COUNT, MEMORY_SIZE, PROGRAM_START,
    REGISTER_COUNT, SPRITE_SHEET, STACK_DEPTH,
};
use crate::opcode::Opcode;

/// A snapshot of the Chip8 internal state
///
/// ## CPU
/// Registers
/// - (v) 16 primary 8-bit registers (V0..VF)
///     - the first 15 (V0..VE) are general purpose registers
///     - the 16th (VF) is the carry flag
/// - (i) a 12-bit memory address register
///
/// Counter
/// - (pc) a 16-bit program counter
/// - (opcode) the instruction most recently fetched through it
///
/// Pointer
/// - (sp) the number of occupied stack slots, 0..=16
///
/// Timers
/// - 2 8-bit timers (delay & sound)
/// - each remembers when it last ticked, as read from the machine's clock
///
/// ## Memory
/// - 16 slot stack of return addresses
/// - 4096 bytes of addressable memory
///     - 0x000..0x050 holds the sprite sheet
///     - programs are loaded at 0x200
/// - 32x64 byte frame buffer
///     - every cell is either 0 or 1
///
/// ## Input
/// - the pressed status of keys 0..F
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct State {
    pub v: [u8; REGISTER_COUNT],
    pub i: u16,
    pub pc: u16,
    pub opcode: Opcode,
    pub sp: u8,
    pub stack: [u16; STACK_DEPTH],
    pub delay_timer: u8,
    pub sound_timer: u8,
    pub last_delay_tick: Duration,
    pub last_sound_tick: Duration,
    pub memory: [u8; MEMORY_SIZE],
    pub frame_buffer: FrameBuffer,
    pub draw_flag: bool,
    pub keys: [bool; KEY_COUNT],
}

impl State {
    pub fn new() -> Self {
        let mut memory = [0; MEMORY_SIZE];
        memory[..SPRITE_SHEET.len()].copy_from_slice(&SPRITE_SHEET);

        State {
            v: [0; REGISTER_COUNT],
            i: 0,
            pc: PROGRAM_START,
            opcode: Opcode(0),
            sp: 0,
            stack: [0; STACK_DEPTH],
            delay_timer: 0,
            sound_timer: 0,
            last_delay_tick: Duration::ZERO,
            last_sound_tick: Duration::ZERO,
            memory,
            frame_buffer: [[0; DISPLAY_WIDTH]; DISPLAY_HEIGHT],
            draw_flag: false,
            keys: [false; KEY_COUNT],
        }
    }

    /// Reads the byte at `addr`, wrapping past the end of memory.
    pub fn read(&self, addr: u16) -> u8 {
        self.memory[address(addr)]
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a 16-bit address onto memory
pub fn address(addr: u16) -> usize {
    usize::from(addr & ADDRESS_MASK)
}

/// The FrameBuffer is indexed as [y][x]
pub type FrameBuffer = [[u8; DISPLAY_WIDTH]; DISPLAY_HEIGHT];
