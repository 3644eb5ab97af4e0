use std::fs::File;
use std::io::BufReader;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use tracing::{debug, info};

use chip8_core::Machine;
use chip8_display::Display;

use crate::keymap::keymap;
use crate::observer::{Bell, TraceObserver};
use crate::Options;

pub fn run(options: &Options) -> Result<()> {
    let mut machine = Machine::new();
    if options.trace {
        machine.set_observer(TraceObserver);
    }
    if !options.mute {
        machine.set_sound(Bell);
    }

    // Load ROM
    let file = File::open(&options.rom)
        .with_context(|| format!("unable to open {}", options.rom.display()))?;
    machine
        .load_rom(&mut BufReader::new(file))
        .with_context(|| format!("unable to load {}", options.rom.display()))?;
    info!(rom = %options.rom.display(), "loaded ROM");

    // Get SDL2 context
    let sdl = sdl2::init().map_err(anyhow::Error::msg)?;
    let mut display = Display::new(&sdl, options.scale)?;
    let mut events = sdl.event_pump().map_err(anyhow::Error::msg)?;

    let cycle_time = Duration::from_secs(1) / options.hz;
    let mut last_cycle = Instant::now();

    // Whether or not the clock speed should be respected
    let mut fast_forward = false;

    'event: loop {
        if let Some(frame) = machine.take_frame() {
            display.render(frame)?;
        }

        for event in events.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => break 'event,
                Event::KeyDown {
                    keycode: Some(key), ..
                } => match (key, keymap(key)) {
                    (_, Some(k)) => machine.key_press(k),
                    (Keycode::Space, _) => fast_forward = true,
                    _ => continue,
                },
                Event::KeyUp {
                    keycode: Some(key), ..
                } => match (key, keymap(key)) {
                    (_, Some(k)) => machine.key_release(k),
                    (Keycode::Space, _) => fast_forward = false,
                    _ => continue,
                },
                _ => continue,
            };
        }

        machine.step().context("machine halted")?;

        let current_time = Instant::now();
        let elapsed = current_time - last_cycle;
        if !fast_forward && cycle_time > elapsed {
            std::thread::sleep(cycle_time - elapsed);
        }
        last_cycle = Instant::now();
    }

    debug!(pc = machine.state().pc, "quit");
    Ok(())
}
