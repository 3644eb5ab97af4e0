use std::io::{self, Write};

use tracing::{trace, warn};

use chip8_core::{FrameBuffer, Observer, Opcode, Sound};

/// Logs every executed opcode, and the whole frame after each draw, at trace level
#[derive(Debug, Default)]
pub struct TraceObserver;

impl Observer for TraceObserver {
    fn on_step(&mut self, opcode: Opcode, frame: Option<&FrameBuffer>) {
        trace!(%opcode, "executed");
        if let Some(frame) = frame {
            trace!("frame after {opcode}\n{}", frame_to_text(frame));
        }
    }
}

/// One line per row; `#` for lit pixels and `.` for unlit
fn frame_to_text(frame: &FrameBuffer) -> String {
    frame
        .iter()
        .map(|row| {
            row.iter()
                .map(|&pixel| if pixel == 0 { '.' } else { '#' })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rings the terminal bell
#[derive(Debug, Default)]
pub struct Bell;

impl Sound for Bell {
    fn tone(&mut self) {
        let mut stdout = io::stdout();
        if let Err(e) = stdout.write_all(b"\x07").and_then(|()| stdout.flush()) {
            warn!("unable to ring the bell: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_to_text() {
        let mut frame: FrameBuffer = [[0; 64]; 32];
        frame[0][0] = 1;
        frame[31][63] = 1;
        let text = frame_to_text(&frame);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 32);
        assert!(lines.iter().all(|line| line.len() == 64));
        assert!(lines[0].starts_with("#."));
        assert!(lines[31].ends_with(".#"));
        assert_eq!(text.matches('#').count(), 2);
    }
}
