use std::time::Duration;

/// Bytes of addressable memory
pub const MEMORY_SIZE: usize = 0x1000;

/// Addresses are 12 bits wide; anything above wraps back into memory
pub const ADDRESS_MASK: u16 = 0x0FFF;

/// Where programs are loaded and where execution starts
pub const PROGRAM_START: u16 = 0x200;

/// The largest program image that fits between `PROGRAM_START` and the end of memory
pub const MAX_PROGRAM_SIZE: usize = MEMORY_SIZE - PROGRAM_START as usize;

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;

pub const REGISTER_COUNT: usize = 16;
pub const KEY_COUNT: usize = 16;

/// Maximum depth of nested subroutine calls
pub const STACK_DEPTH: usize = 16;

/// VF doubles as the carry, borrow and collision flag
pub const FLAG: usize = 0xF;

/// Both timers count down at 60Hz regardless of how fast instructions run
pub const TIMER_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Default instruction rate in Hz
pub const CLOCK_SPEED: u32 = 500;

/// Each glyph in `SPRITE_SHEET` is 5 rows tall
pub const GLYPH_HEIGHT: u16 = 5;

/// # Sprite Sheet
/// The hexadecimal digits 0..F as 4x5 sprites, one byte per row.
/// Installed at address 0x000 when the machine is reset.
#[rustfmt::skip]
pub const SPRITE_SHEET: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];
