use std::io::Read;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::constants::{KEY_COUNT, MEMORY_SIZE, PROGRAM_START, TIMER_PERIOD};
use crate::error::MachineError;
use crate::instruction::from_op;
use crate::observer::{Mute, NullObserver, Observer, Sound};
use crate::opcode::Opcode;
use crate::operations::Context;
use crate::state::{FrameBuffer, State};

/// # Machine
/// A Chip-8 virtual machine.
///
/// Tracks:
///  - current `state`
///  - the random source behind `Cxkk`
///  - the `clock` that paces the timers
///  - an `observer` told about every executed opcode
///  - a `sound` output for the sound timer's tone
///
/// Supplies interfaces for:
/// - loading programs
/// - pressing and releasing keys
/// - advancing the machine a single cycle
/// - inspecting its frame buffer for rendering by some display
pub struct Machine {
    state: State,
    rng: StdRng,
    clock: Box<dyn Clock>,
    observer: Box<dyn Observer>,
    sound: Box<dyn Sound>,
}

impl Machine {
    /// A freshly reset machine whose timers follow real time
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }

    /// A freshly reset machine whose timers follow `clock`
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        let mut machine = Machine {
            state: State::new(),
            rng: StdRng::seed_from_u64(0),
            clock: Box::new(clock),
            observer: Box::new(NullObserver),
            sound: Box::new(Mute),
        };
        machine.reset();
        machine
    }

    pub fn set_observer(&mut self, observer: impl Observer + 'static) {
        self.observer = Box::new(observer);
    }

    pub fn set_sound(&mut self, sound: impl Sound + 'static) {
        self.sound = Box::new(sound);
    }

    /// Returns the machine to power-on: cleared memory and display, the sprite
    /// sheet installed, the pc at the program start and a freshly seeded RNG
    pub fn reset(&mut self) {
        let now = self.clock.now();
        self.state = State {
            last_delay_tick: now,
            last_sound_tick: now,
            ..State::new()
        };
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        self.rng = StdRng::seed_from_u64(seed);
        debug!(seed, "machine reset");
    }

    /// Copy `bytes` into memory starting at `origin`
    /// Fails without touching memory if they would run past the end of it
    ///
    /// # Arguments
    /// * `bytes` a program image or any other data
    /// * `origin` the address of the first byte
    pub fn load(&mut self, bytes: &[u8], origin: u16) -> Result<(), MachineError> {
        let start = usize::from(origin);
        let capacity = MEMORY_SIZE.saturating_sub(start);
        if start
            .checked_add(bytes.len())
            .map_or(true, |end| end > MEMORY_SIZE)
        {
            return Err(MachineError::ProgramTooLarge {
                size: bytes.len(),
                origin,
                capacity,
            });
        }
        self.state.memory[start..start + bytes.len()].copy_from_slice(bytes);
        debug!(size = bytes.len(), origin, "loaded bytes");
        Ok(())
    }

    /// Load a program image at the program start
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), MachineError> {
        self.load(program, PROGRAM_START)
    }

    /// Load a rom from a source file
    ///
    /// # Arguments
    /// * `reader` a file reader that contains a ROM
    pub fn load_rom(&mut self, reader: &mut dyn Read) -> Result<(), MachineError> {
        let mut program = Vec::new();
        reader.read_to_end(&mut program)?;
        self.load_program(&program)
    }

    /// The current machine state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The current contents of the display
    pub fn frame(&self) -> &FrameBuffer {
        &self.state.frame_buffer
    }

    /// Returns the FrameBuffer if it changed since it was last taken
    pub fn take_frame(&mut self) -> Option<&FrameBuffer> {
        if self.state.draw_flag {
            self.state.draw_flag = false;
            Some(&self.state.frame_buffer)
        } else {
            None
        }
    }

    /// Set the pressed status of key
    ///
    /// # Arguments
    /// * `key` the 8-bit representation of the key that was pressed
    pub fn key_press(&mut self, key: u8) {
        if let Some(pressed) = self.state.keys.get_mut(usize::from(key)) {
            *pressed = true;
        }
    }

    /// Unset the pressed status of key
    ///
    /// # Arguments
    /// * `key` the 8-bit representation of the key that was released
    pub fn key_release(&mut self, key: u8) {
        if let Some(pressed) = self.state.keys.get_mut(usize::from(key)) {
            *pressed = false;
        }
    }

    /// Replace the status of every key at once
    pub fn set_keys(&mut self, keys: [bool; KEY_COUNT]) {
        self.state.keys = keys;
    }

    /// Advances the machine by a single cycle
    /// - gets and executes the next opcode
    /// - ticks the timers
    /// - reports the cycle to the observer
    ///
    /// A stack fault leaves the machine exactly as it was before the call.
    pub fn step(&mut self) -> Result<(), MachineError> {
        let now = self.clock.now();
        let op = self.get_op();
        let mut ctx = Context {
            rng: &mut self.rng,
            now,
        };
        let next = from_op(op)(op, &self.state, &mut ctx)?;
        self.state = State { opcode: op, ..next };
        self.advance_timers(now);

        let frame = op.is_draw().then_some(&self.state.frame_buffer);
        self.observer.on_step(op, frame);
        Ok(())
    }

    /// Decrements each nonzero timer once a full timer period has passed since it last ticked
    /// Every sound timer decrement sounds a tone
    fn advance_timers(&mut self, now: Duration) {
        let state = &mut self.state;
        if state.delay_timer > 0 && now.saturating_sub(state.last_delay_tick) >= TIMER_PERIOD {
            state.delay_timer -= 1;
            state.last_delay_tick = now;
        }

        if state.sound_timer > 0 && now.saturating_sub(state.last_sound_tick) >= TIMER_PERIOD {
            state.sound_timer -= 1;
            state.last_sound_tick = now;
            self.sound.tone();
        }
    }

    /// Gets the opcode currently pointed at by the pc.
    /// Memory is stored as bytes, but opcodes are 16 bits so we combine two subsequent bytes.
    fn get_op(&self) -> Opcode {
        let pc = self.state.pc;
        Opcode::from_bytes(self.state.read(pc), self.state.read(pc.wrapping_add(1)))
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::constants::{MAX_PROGRAM_SIZE, SPRITE_SHEET};

    fn machine_with(program: &[u8]) -> (Machine, ManualClock) {
        let clock = ManualClock::new();
        let mut machine = Machine::with_clock(clock.clone());
        machine.load_program(program).unwrap();
        (machine, clock)
    }

    #[derive(Clone, Default)]
    struct Recorder {
        opcodes: Rc<RefCell<Vec<Opcode>>>,
        frames: Rc<Cell<usize>>,
    }

    impl Observer for Recorder {
        fn on_step(&mut self, opcode: Opcode, frame: Option<&FrameBuffer>) {
            self.opcodes.borrow_mut().push(opcode);
            if frame.is_some() {
                self.frames.set(self.frames.get() + 1);
            }
        }
    }

    #[derive(Clone, Default)]
    struct Tones(Rc<Cell<usize>>);

    impl Sound for Tones {
        fn tone(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_machine_gets_op() {
        let (machine, _) = machine_with(&[0xAA, 0xBB]);
        assert_eq!(machine.get_op(), Opcode(0xAABB));
    }

    #[test]
    fn test_reset_restores_power_on_state() {
        let (mut machine, clock) = machine_with(&[0x61, 0x07, 0x00, 0xE0]);
        machine.step().unwrap();
        machine.key_press(0x4);
        clock.advance(Duration::from_secs(1));
        machine.reset();
        let state = machine.state();
        assert_eq!(state.pc, 0x200);
        assert_eq!(state.v, [0; 16]);
        assert_eq!(state.keys, [false; 16]);
        assert_eq!(state.memory[..80], SPRITE_SHEET);
        assert!(state.memory[80..].iter().all(|&byte| byte == 0));
        assert_eq!(state.last_delay_tick, Duration::from_secs(1));
    }

    #[test]
    fn test_load_copies_at_origin() {
        let (mut machine, _) = machine_with(&[]);
        machine.load(&[0x12, 0x34], 0x300).unwrap();
        assert_eq!(machine.state().memory[0x300..0x302], [0x12, 0x34]);
        assert_eq!(machine.state().pc, 0x200);
    }

    #[test]
    fn test_load_accepts_largest_program() {
        let (mut machine, _) = machine_with(&[]);
        machine.load_program(&[0xAB; MAX_PROGRAM_SIZE]).unwrap();
        assert_eq!(machine.state().memory[0xFFF], 0xAB);
    }

    #[test]
    fn test_load_rejects_oversized_program() {
        let (mut machine, _) = machine_with(&[]);
        let before = *machine.state();
        let result = machine.load_program(&[0xAB; MAX_PROGRAM_SIZE + 1]);
        assert!(matches!(
            result,
            Err(MachineError::ProgramTooLarge {
                size: 3585,
                origin: 0x200,
                capacity: 3584
            })
        ));
        assert_eq!(*machine.state(), before);
    }

    #[test]
    fn test_load_rejects_origin_past_end() {
        let (mut machine, _) = machine_with(&[]);
        let before = *machine.state();
        assert!(matches!(
            machine.load(&[], 0x2000),
            Err(MachineError::ProgramTooLarge {
                size: 0,
                origin: 0x2000,
                capacity: 0
            })
        ));
        assert!(matches!(
            machine.load(&[0x12], 0x1000),
            Err(MachineError::ProgramTooLarge { capacity: 0, .. })
        ));
        assert_eq!(*machine.state(), before);
    }

    #[test]
    fn test_load_accepts_empty_image_at_end_of_memory() {
        let (mut machine, _) = machine_with(&[]);
        machine.load(&[], 0x1000).unwrap();
    }

    #[test]
    fn test_load_rom_reads_to_end() {
        let (mut machine, _) = machine_with(&[]);
        let mut rom: &[u8] = &[0x00, 0xE0, 0x12, 0x00];
        machine.load_rom(&mut rom).unwrap();
        assert_eq!(machine.state().memory[0x200..0x204], [0x00, 0xE0, 0x12, 0x00]);
    }

    #[test]
    fn test_step_advances_pc() {
        let (mut machine, _) = machine_with(&[0x00, 0xE0]);
        machine.step().unwrap();
        assert_eq!(machine.state().pc, 0x202);
        assert_eq!(machine.state().opcode, Opcode(0x00E0));
    }

    #[test]
    fn test_call_then_return() {
        let (mut machine, _) = machine_with(&[0x23, 0x00]);
        machine.load(&[0x00, 0xEE], 0x300).unwrap();

        machine.step().unwrap();
        assert_eq!(machine.state().pc, 0x300);
        assert_eq!(machine.state().sp, 1);
        assert_eq!(machine.state().stack[0], 0x200);

        machine.step().unwrap();
        assert_eq!(machine.state().pc, 0x202);
        assert_eq!(machine.state().sp, 0);
    }

    #[test]
    fn test_seventeenth_nested_call_overflows() {
        // 0x200: call 0x200, forever
        let (mut machine, _) = machine_with(&[0x22, 0x00]);
        for _ in 0..16 {
            machine.step().unwrap();
        }
        let before = *machine.state();
        let result = machine.step();
        assert!(matches!(
            result,
            Err(MachineError::StackOverflow { pc: 0x200, target: 0x200 })
        ));
        assert_eq!(*machine.state(), before);
    }

    #[test]
    fn test_return_without_call_underflows() {
        let (mut machine, _) = machine_with(&[0x00, 0xEE]);
        let before = *machine.state();
        assert!(matches!(
            machine.step(),
            Err(MachineError::StackUnderflow { pc: 0x200 })
        ));
        assert_eq!(*machine.state(), before);
    }

    #[test]
    fn test_draw_twice_erases_and_collides() {
        // I = glyph 0; draw at (V0, V0); draw again
        let (mut machine, _) = machine_with(&[0xA0, 0x00, 0xD0, 0x05, 0xD0, 0x05]);
        machine.step().unwrap();

        machine.step().unwrap();
        assert_eq!(machine.state().v[0xF], 0);
        assert!(machine.frame().iter().flatten().any(|&pixel| pixel == 1));
        assert!(machine.take_frame().is_some());
        assert!(machine.take_frame().is_none());

        machine.step().unwrap();
        assert_eq!(machine.state().v[0xF], 1);
        assert!(machine.frame().iter().flatten().all(|&pixel| pixel == 0));
    }

    #[test]
    fn test_clear_after_draw_blanks_frame() {
        let (mut machine, _) = machine_with(&[0xD0, 0x05, 0x00, 0xE0]);
        machine.step().unwrap();
        machine.step().unwrap();
        assert!(machine.frame().iter().flatten().all(|&pixel| pixel == 0));
    }

    #[test]
    fn test_key_wait_holds_pc_until_pressed() {
        let (mut machine, _) = machine_with(&[0xF3, 0x0A]);
        for _ in 0..5 {
            machine.step().unwrap();
            assert_eq!(machine.state().pc, 0x200);
        }
        machine.key_press(0x9);
        machine.step().unwrap();
        assert_eq!(machine.state().pc, 0x202);
        assert_eq!(machine.state().v[0x3], 0x9);
    }

    #[test]
    fn test_key_release_and_set_keys() {
        let (mut machine, _) = machine_with(&[]);
        machine.key_press(0x2);
        machine.key_press(0x10);
        assert!(machine.state().keys[0x2]);
        machine.key_release(0x2);
        assert!(!machine.state().keys[0x2]);
        let mut keys = [false; 16];
        keys[0xF] = true;
        machine.set_keys(keys);
        assert_eq!(machine.state().keys, keys);
    }

    #[test]
    fn test_delay_timer_follows_clock_not_cycles() {
        // V0 = 5; DT = V0; then spin on a jump to self
        let (mut machine, clock) = machine_with(&[0x60, 0x05, 0xF0, 0x15, 0x12, 0x04]);
        machine.step().unwrap();
        machine.step().unwrap();
        assert_eq!(machine.state().delay_timer, 5);

        for _ in 0..10 {
            machine.step().unwrap();
        }
        assert_eq!(machine.state().delay_timer, 5);

        let mut elapsed = Duration::ZERO;
        while machine.state().delay_timer > 0 {
            clock.advance(Duration::from_millis(1));
            elapsed += Duration::from_millis(1);
            machine.step().unwrap();
            assert!(elapsed < Duration::from_millis(100));
        }
        // 5/60 of a second, give or take a millisecond per tick
        assert!(elapsed >= Duration::from_millis(83), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(90), "{elapsed:?}");
    }

    #[test]
    fn test_delay_timer_is_readable() {
        // V0 = 2; DT = V0; V1 = DT
        let (mut machine, clock) = machine_with(&[0x60, 0x02, 0xF0, 0x15, 0xF1, 0x07]);
        machine.step().unwrap();
        machine.step().unwrap();
        clock.advance(TIMER_PERIOD);
        machine.step().unwrap();
        assert_eq!(machine.state().v[0x1], 2);
        assert_eq!(machine.state().delay_timer, 1);
    }

    #[test]
    fn test_sound_timer_tones_once_per_decrement() {
        // V0 = 3; ST = V0; then spin on a jump to self
        let (mut machine, clock) = machine_with(&[0x60, 0x03, 0xF0, 0x18, 0x12, 0x04]);
        let tones = Tones::default();
        machine.set_sound(tones.clone());
        machine.step().unwrap();
        machine.step().unwrap();

        for _ in 0..10 {
            clock.advance(TIMER_PERIOD);
            machine.step().unwrap();
        }
        assert_eq!(machine.state().sound_timer, 0);
        assert_eq!(tones.0.get(), 3);
    }

    #[test]
    fn test_observer_sees_every_opcode_and_draws() {
        let (mut machine, _) = machine_with(&[0x60, 0x01, 0xD0, 0x05, 0x00, 0xE0]);
        let recorder = Recorder::default();
        machine.set_observer(recorder.clone());
        for _ in 0..3 {
            machine.step().unwrap();
        }
        assert_eq!(
            *recorder.opcodes.borrow(),
            vec![Opcode(0x6001), Opcode(0xD005), Opcode(0x00E0)]
        );
        assert_eq!(recorder.frames.get(), 1);
    }
}
