use crate::opcode::Opcode;
use crate::state::FrameBuffer;

/// Watches the machine run.
///
/// Called once at the end of every successful `step`. `frame` is only
/// supplied after a sprite draw.
pub trait Observer {
    fn on_step(&mut self, _opcode: Opcode, _frame: Option<&FrameBuffer>) {}
}

/// The default observer; ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Receives the sound timer's tone, once per decrement.
pub trait Sound {
    fn tone(&mut self);
}

/// The default sound output; stays silent.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mute;

impl Sound for Mute {
    fn tone(&mut self) {}
}
