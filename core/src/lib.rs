pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::CLOCK_SPEED;
pub use error::MachineError;
pub use machine::Machine;
pub use observer::{Mute, NullObserver, Observer, Sound};
pub use opcode::Opcode;
pub use state::{FrameBuffer, State};

mod clock;
pub mod constants;
mod error;
mod instruction;
mod machine;
mod observer;
mod opcode;
mod operations;
pub mod state;
