use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;

use crate::constants::{ADDRESS_MASK, DISPLAY_HEIGHT, DISPLAY_WIDTH, FLAG, GLYPH_HEIGHT, STACK_DEPTH};
use crate::error::MachineError;
use crate::opcode::Opcode;
use crate::state::{address, State};

/// What an operation can see besides the machine state.
pub struct Context<'a> {
    pub rng: &'a mut StdRng,
    /// The clock reading for the current cycle
    pub now: Duration,
}

/// Every operation yields the next state, or the fault that stopped it.
pub type Outcome = Result<State, MachineError>;

/// Moves the pc forward, wrapping within memory like every other address
fn advance(pc: u16, by: u16) -> u16 {
    pc.wrapping_add(by) & ADDRESS_MASK
}

/// pc += 2, or 4 to skip the next instruction
fn skip_if(state: &State, condition: bool) -> Outcome {
    let pc = if condition {
        advance(state.pc, 0x4)
    } else {
        advance(state.pc, 0x2)
    };
    Ok(State { pc, ..*state })
}

/// Applies an ALU result and its flag; the flag goes first so that a result in VF wins.
fn with_flag(state: &State, x: usize, result: u8, flag: bool) -> Outcome {
    let mut v = state.v;
    v[FLAG] = u8::from(flag);
    v[x] = result;
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// unrecognised; skipped over
pub fn nop(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    tracing::trace!(%op, pc = state.pc, "ignoring unsupported opcode");
    Ok(State {
        pc: advance(state.pc, 0x2),
        ..*state
    })
}

/// clear
pub fn clr(_op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    Ok(State {
        pc: advance(state.pc, 0x2),
        frame_buffer: [[0; DISPLAY_WIDTH]; DISPLAY_HEIGHT],
        draw_flag: true,
        ..*state
    })
}

/// PC = STACK.pop() + 2
pub fn rts(_op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let sp = state
        .sp
        .checked_sub(0x1)
        .ok_or(MachineError::StackUnderflow { pc: state.pc })?;
    Ok(State {
        pc: advance(state.stack[usize::from(sp)], 0x2),
        sp,
        ..*state
    })
}

/// PC = addr
pub fn jump(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    Ok(State {
        pc: op.addr(),
        ..*state
    })
}

/// STACK.push(PC); PC = addr
pub fn call(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let sp = usize::from(state.sp);
    if sp >= STACK_DEPTH {
        return Err(MachineError::StackOverflow {
            pc: state.pc,
            target: op.addr(),
        });
    }
    let mut stack = state.stack;
    stack[sp] = state.pc;
    Ok(State {
        pc: op.addr(),
        sp: state.sp + 0x1,
        stack,
        ..*state
    })
}

/// if Vx == kk then pc += 2
pub fn ske(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    skip_if(state, state.v[op.x()] == op.kk())
}

/// if Vx != kk then pc += 2
pub fn skne(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    skip_if(state, state.v[op.x()] != op.kk())
}

/// if Vx == Vy then pc += 2
pub fn skre(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    skip_if(state, state.v[op.x()] == state.v[op.y()])
}

/// Vx = kk
pub fn load(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    v[op.x()] = op.kk();
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// Vx += kk
/// Wraps on overflow; VF is left alone
pub fn add(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    v[op.x()] = v[op.x()].wrapping_add(op.kk());
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// Vx = Vy
pub fn mv(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    v[op.x()] = v[op.y()];
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// Vx |= Vy
pub fn or(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    v[op.x()] |= v[op.y()];
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// Vx &= Vy
pub fn and(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    v[op.x()] &= v[op.y()];
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// Vx ^= Vy
pub fn xor(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    v[op.x()] ^= v[op.y()];
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// Vx += Vy; VF = carry
pub fn addr(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let (res, carry) = state.v[op.x()].overflowing_add(state.v[op.y()]);
    with_flag(state, op.x(), res, carry)
}

/// Vx -= Vy; VF = !borrow
pub fn sub(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let (vx, vy) = (state.v[op.x()], state.v[op.y()]);
    with_flag(state, op.x(), vx.wrapping_sub(vy), vx >= vy)
}

/// Vx = Vy >> 1; VF = the bit shifted out
pub fn shr(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let vy = state.v[op.y()];
    with_flag(state, op.x(), vy >> 1, vy & 0x1 == 0x1)
}

/// Vx = Vy - Vx; VF = !borrow
pub fn subn(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let (vx, vy) = (state.v[op.x()], state.v[op.y()]);
    with_flag(state, op.x(), vy.wrapping_sub(vx), vy >= vx)
}

/// Vx = Vy << 1; VF = the bit shifted out
pub fn shl(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let vy = state.v[op.y()];
    with_flag(state, op.x(), vy << 1, (vy >> 7) & 0x1 == 0x1)
}

/// if Vx != Vy then pc +=2
pub fn skrne(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    skip_if(state, state.v[op.x()] != state.v[op.y()])
}

/// I = addr
pub fn loadi(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    Ok(State {
        pc: advance(state.pc, 0x2),
        i: op.addr(),
        ..*state
    })
}

/// PC = V0 + addr
pub fn jumpi(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    Ok(State {
        pc: advance(op.addr(), u16::from(state.v[0x0])),
        ..*state
    })
}

/// Vx = rand_byte & kk
pub fn rnd(op: Opcode, state: &State, ctx: &mut Context) -> Outcome {
    let rand_byte: u8 = ctx.rng.gen();
    let mut v = state.v;
    v[op.x()] = rand_byte & op.kk();
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// draw_sprite(x=Vx y=Vy size=n)
/// XORs a sprite from memory i..i+n at position x, y on the FrameBuffer.
/// Pixels past the right or bottom edge are dropped rather than wrapped.
/// Sets VF if any pixels would be erased
pub fn draw(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    let mut frame_buffer = state.frame_buffer;
    let left = usize::from(state.v[op.x()]);
    let top = usize::from(state.v[op.y()]);

    let mut collision = 0x0;
    for row in 0..op.n() {
        let y = top + usize::from(row);
        if y >= DISPLAY_HEIGHT {
            break;
        }
        let sprite = state.read(state.i.wrapping_add(u16::from(row)));
        for bit in 0..8 {
            let x = left + bit;
            if x >= DISPLAY_WIDTH {
                break;
            }
            let pixel_value = (sprite >> (7 - bit)) & 0x1;
            collision |= pixel_value & frame_buffer[y][x];
            frame_buffer[y][x] ^= pixel_value;
        }
    }
    v[FLAG] = collision;

    Ok(State {
        pc: advance(state.pc, 0x2),
        draw_flag: true,
        v,
        frame_buffer,
        ..*state
    })
}

/// Only the low nibble of a register names a key
fn key_pressed(state: &State, register: usize) -> bool {
    state.keys[usize::from(state.v[register] & 0xF)]
}

/// if Vx.pressed then pc += 2
pub fn skpr(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    skip_if(state, key_pressed(state, op.x()))
}

/// if !Vx.pressed then pc += 2
pub fn skup(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    skip_if(state, !key_pressed(state, op.x()))
}

/// Vx = DT
pub fn moved(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    v[op.x()] = state.delay_timer;
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}

/// await keypress for Vx
/// With nothing pressed the pc stays put, so the same instruction runs again
/// next cycle. When several keys are down the highest one is taken.
pub fn keyd(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    match state.keys.iter().rposition(|&pressed| pressed) {
        Some(key) => {
            let mut v = state.v;
            v[op.x()] = key as u8;
            Ok(State {
                pc: advance(state.pc, 0x2),
                v,
                ..*state
            })
        }
        None => Ok(*state),
    }
}

/// DT = Vx
pub fn loads(op: Opcode, state: &State, ctx: &mut Context) -> Outcome {
    Ok(State {
        pc: advance(state.pc, 0x2),
        delay_timer: state.v[op.x()],
        last_delay_tick: ctx.now,
        ..*state
    })
}

/// ST = Vx
pub fn ld(op: Opcode, state: &State, ctx: &mut Context) -> Outcome {
    Ok(State {
        pc: advance(state.pc, 0x2),
        sound_timer: state.v[op.x()],
        last_sound_tick: ctx.now,
        ..*state
    })
}

/// I += Vx; VF = I ran past the end of memory
pub fn addi(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let sum = (state.i & ADDRESS_MASK) + u16::from(state.v[op.x()]);
    let mut v = state.v;
    v[FLAG] = u8::from(sum > ADDRESS_MASK);
    Ok(State {
        pc: advance(state.pc, 0x2),
        i: sum & ADDRESS_MASK,
        v,
        ..*state
    })
}

/// I = Vx * 5
/// Set I to the memory address of the sprite for Vx
/// See constants::SPRITE_SHEET for more details
pub fn ldspr(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    Ok(State {
        pc: advance(state.pc, 0x2),
        i: u16::from(state.v[op.x()]) * GLYPH_HEIGHT,
        ..*state
    })
}

/// mem[I..I+3] = bcd(Vx)
/// Store BCD repr of Vx in memory starting at address i
pub fn bcd(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let vx = state.v[op.x()];
    let bcd = [vx / 100, vx / 10 % 10, vx % 10];
    let mut memory = state.memory;
    for (offset, digit) in (0u16..).zip(bcd) {
        memory[address(state.i.wrapping_add(offset))] = digit;
    }
    Ok(State {
        pc: advance(state.pc, 0x2),
        memory,
        ..*state
    })
}

/// mem[I..=I+x] = V0..=Vx
pub fn stor(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut memory = state.memory;
    for (offset, &value) in (0u16..).zip(&state.v[..=op.x()]) {
        memory[address(state.i.wrapping_add(offset))] = value;
    }
    Ok(State {
        pc: advance(state.pc, 0x2),
        memory,
        ..*state
    })
}

/// V0..=Vx = mem[I..=I+x]
pub fn read(op: Opcode, state: &State, _ctx: &mut Context) -> Outcome {
    let mut v = state.v;
    for (offset, register) in (0u16..).zip(&mut v[..=op.x()]) {
        *register = state.read(state.i.wrapping_add(offset));
    }
    Ok(State {
        pc: advance(state.pc, 0x2),
        v,
        ..*state
    })
}
