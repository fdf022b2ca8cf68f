use std::io;
use std::io::Write;

use termion::raw::{IntoRawMode, RawTerminal};
use tui::backend::TermionBackend;
use tui::layout::Rect;
use tui::style::{Color, Style};
use tui::symbols::Marker;
use tui::widgets::canvas::{Canvas, Points};
use tui::widgets::{Block, Borders};
use tui::Terminal;

pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;

/// Renderer is the capability the executor draws through. It should abstract
/// the presentation details, so a variety of kinds of screen would work.
pub trait Renderer {
    /// blank every pixel
    fn clear(&mut self);

    /// XOR `value` into the pixel at (x, y); oversized coordinates wrap by
    /// modulo. Returns 1 exactly when a previously-set pixel became unset.
    fn set_pixel(&mut self, x: usize, y: usize, value: u8) -> u8;

    /// flush the current pixel grid to wherever this renderer points
    fn present(&mut self) -> Result<(), io::Error>;
}

/// The in-memory renderer: a 64x32 grid of single-bit cells. Presentation
/// sinks compose one of these and flush it however they like; on its own,
/// `present` does nothing, which also makes it the natural renderer for
/// tests.
pub struct FrameBuffer {
    cells: [[u8; DISPLAY_WIDTH]; DISPLAY_HEIGHT],
}

impl FrameBuffer {
    pub fn new() -> Self {
        FrameBuffer {
            cells: [[0; DISPLAY_WIDTH]; DISPLAY_HEIGHT],
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.cells[y % DISPLAY_HEIGHT][x % DISPLAY_WIDTH]
    }

    pub fn rows(&self) -> &[[u8; DISPLAY_WIDTH]; DISPLAY_HEIGHT] {
        &self.cells
    }

    /// (x, -y) coordinates of every cell holding `bit`, in the canvas
    /// orientation (origin top-left, y growing downwards)
    fn plane(&self, bit: u8) -> Vec<(f64, f64)> {
        let mut coords = Vec::new();
        for (y, row) in self.cells.iter().enumerate() {
            for (x, cell) in row.iter().enumerate() {
                if *cell == bit {
                    coords.push((x as f64, -(y as f64)));
                }
            }
        }
        coords
    }

    /// render the grid as text, one `#` per lit pixel
    fn ascii_rows(&self) -> String {
        let mut out = String::with_capacity((DISPLAY_WIDTH + 2) * DISPLAY_HEIGHT);
        for row in self.cells.iter() {
            for cell in row.iter() {
                out.push(if *cell == 1 { '#' } else { ' ' });
            }
            out.push_str("\r\n");
        }
        out
    }
}

impl Renderer for FrameBuffer {
    fn clear(&mut self) {
        self.cells = [[0; DISPLAY_WIDTH]; DISPLAY_HEIGHT];
    }

    fn set_pixel(&mut self, x: usize, y: usize, value: u8) -> u8 {
        debug_assert!(value <= 1, "pixel values are single bits");
        let cell = &mut self.cells[y % DISPLAY_HEIGHT][x % DISPLAY_WIDTH];
        let old = *cell;
        *cell = old ^ value;
        old & value & 1
    }

    fn present(&mut self) -> Result<(), io::Error> {
        Ok(())
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// monochrome display in a terminal, rendered using TUI and Termion
pub struct MonoTermDisplay {
    frame: FrameBuffer,
    terminal: Terminal<TermionBackend<RawTerminal<io::Stdout>>>,
}

impl MonoTermDisplay {
    pub fn new() -> Result<MonoTermDisplay, io::Error> {
        let stdout = io::stdout().into_raw_mode()?;
        let backend = TermionBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(MonoTermDisplay {
            frame: FrameBuffer::new(),
            terminal,
        })
    }
}

impl Renderer for MonoTermDisplay {
    fn clear(&mut self) {
        self.frame.clear();
    }

    fn set_pixel(&mut self, x: usize, y: usize, value: u8) -> u8 {
        self.frame.set_pixel(x, y, value)
    }

    fn present(&mut self) -> Result<(), io::Error> {
        // collect the coordinates up front; the draw closure may not borrow
        // the framebuffer while the terminal is borrowed
        let unlit = self.frame.plane(0);
        let lit = self.frame.plane(1);

        // a 1:1 ratio between terminal cells, chip-8 pixels and the internal
        // TUI canvas, plus a border
        let size = Rect::new(
            0,
            0,
            2 + DISPLAY_WIDTH as u16,
            2 + DISPLAY_HEIGHT as u16,
        );

        self.terminal.draw(|f| {
            let canvas = Canvas::default()
                .block(
                    Block::default()
                        .title("CHIP-8")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(Color::Black)),
                )
                .x_bounds([0.0, (DISPLAY_WIDTH - 1) as f64])
                .y_bounds([-1.0 * (DISPLAY_HEIGHT - 1) as f64, 0.0])
                .marker(Marker::Block)
                .paint(|ctx| {
                    ctx.draw(&Points {
                        coords: &unlit,
                        color: Color::Black,
                    });
                    ctx.draw(&Points {
                        coords: &lit,
                        color: Color::White,
                    });
                });
            f.render_widget(canvas, size);
        })?;
        Ok(())
    }
}

/// plain text sink; every present writes the whole grid to stdout
pub struct ConsoleDisplay {
    frame: FrameBuffer,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        ConsoleDisplay {
            frame: FrameBuffer::new(),
        }
    }
}

impl Renderer for ConsoleDisplay {
    fn clear(&mut self) {
        self.frame.clear();
    }

    fn set_pixel(&mut self, x: usize, y: usize, value: u8) -> u8 {
        self.frame.set_pixel(x, y, value)
    }

    fn present(&mut self) -> Result<(), io::Error> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        write!(handle, "{}\r\n", self.frame.ascii_rows())?;
        handle.flush()
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

/// Fans every call out to an ordered list of renderers, so several
/// presentation sinks can mirror one machine. `set_pixel` ORs the collision
/// results together.
pub struct MultiRenderer<'a> {
    sinks: Vec<&'a mut dyn Renderer>,
}

impl<'a> MultiRenderer<'a> {
    pub fn new() -> Self {
        MultiRenderer { sinks: Vec::new() }
    }

    pub fn add(&mut self, sink: &'a mut dyn Renderer) {
        self.sinks.push(sink);
    }
}

impl Renderer for MultiRenderer<'_> {
    fn clear(&mut self) {
        for sink in self.sinks.iter_mut() {
            sink.clear();
        }
    }

    fn set_pixel(&mut self, x: usize, y: usize, value: u8) -> u8 {
        let mut collision = 0;
        for sink in self.sinks.iter_mut() {
            collision |= sink.set_pixel(x, y, value);
        }
        collision
    }

    fn present(&mut self) -> Result<(), io::Error> {
        for sink in self.sinks.iter_mut() {
            sink.present()?;
        }
        Ok(())
    }
}

impl Default for MultiRenderer<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // FrameBuffer tests
    #[test]
    fn test_set_pixel_turns_on() {
        let mut fb = FrameBuffer::new();
        assert_eq!(fb.set_pixel(3, 4, 1), 0);
        assert_eq!(fb.pixel(3, 4), 1);
    }

    #[test]
    fn test_set_pixel_xor_clears_and_reports_collision() {
        let mut fb = FrameBuffer::new();
        fb.set_pixel(3, 4, 1);
        assert_eq!(fb.set_pixel(3, 4, 1), 1);
        assert_eq!(fb.pixel(3, 4), 0);
    }

    #[test]
    fn test_set_pixel_zero_never_collides() {
        let mut fb = FrameBuffer::new();
        fb.set_pixel(3, 4, 1);
        assert_eq!(fb.set_pixel(3, 4, 0), 0);
        assert_eq!(fb.pixel(3, 4), 1);
    }

    #[test]
    fn test_set_pixel_wraps_modulo() {
        let mut fb = FrameBuffer::new();
        fb.set_pixel(DISPLAY_WIDTH + 1, DISPLAY_HEIGHT + 2, 1);
        assert_eq!(fb.pixel(1, 2), 1);
    }

    #[test]
    fn test_clear_blanks_everything() {
        let mut fb = FrameBuffer::new();
        fb.set_pixel(0, 0, 1);
        fb.set_pixel(63, 31, 1);
        fb.clear();
        assert!(fb.rows().iter().all(|row| row.iter().all(|c| *c == 0)));
    }

    #[test]
    fn test_cells_stay_single_bit() {
        let mut fb = FrameBuffer::new();
        for _ in 0..3 {
            fb.set_pixel(5, 5, 1);
        }
        assert!(fb.pixel(5, 5) <= 1);
    }

    #[test]
    fn test_present_is_a_no_op() {
        let mut fb = FrameBuffer::new();
        fb.set_pixel(1, 1, 1);
        fb.present().unwrap();
        assert_eq!(fb.pixel(1, 1), 1);
    }

    #[test]
    fn test_plane_partitions_the_grid() {
        let mut fb = FrameBuffer::new();
        fb.set_pixel(2, 1, 1);
        let lit = fb.plane(1);
        assert_eq!(lit, vec![(2.0, -1.0)]);
        assert_eq!(fb.plane(0).len(), DISPLAY_WIDTH * DISPLAY_HEIGHT - 1);
    }

    #[test]
    fn test_ascii_rows_shape() {
        let mut fb = FrameBuffer::new();
        fb.set_pixel(0, 0, 1);
        let text = fb.ascii_rows();
        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(lines.len(), DISPLAY_HEIGHT + 1); // trailing newline
        assert!(lines[0].starts_with('#'));
        assert_eq!(lines[0].len(), DISPLAY_WIDTH);
        assert!(lines[1].chars().all(|c| c == ' '));
    }

    // MultiRenderer tests
    #[test]
    fn test_fan_out_broadcasts_pixels() {
        let mut a = FrameBuffer::new();
        let mut b = FrameBuffer::new();
        {
            let mut multi = MultiRenderer::new();
            multi.add(&mut a);
            multi.add(&mut b);
            multi.set_pixel(7, 8, 1);
        }
        assert_eq!(a.pixel(7, 8), 1);
        assert_eq!(b.pixel(7, 8), 1);
    }

    #[test]
    fn test_fan_out_ors_collisions() {
        let mut a = FrameBuffer::new();
        let mut b = FrameBuffer::new();
        a.set_pixel(7, 8, 1); // only one sink will collide
        let mut multi = MultiRenderer::new();
        multi.add(&mut a);
        multi.add(&mut b);
        assert_eq!(multi.set_pixel(7, 8, 1), 1);
    }

    #[test]
    fn test_fan_out_clear_broadcasts() {
        let mut a = FrameBuffer::new();
        let mut b = FrameBuffer::new();
        a.set_pixel(1, 1, 1);
        b.set_pixel(2, 2, 1);
        {
            let mut multi = MultiRenderer::new();
            multi.add(&mut a);
            multi.add(&mut b);
            multi.clear();
        }
        assert_eq!(a.pixel(1, 1), 0);
        assert_eq!(b.pixel(2, 2), 0);
    }

    #[test]
    fn test_empty_fan_out_never_collides() {
        let mut multi = MultiRenderer::new();
        assert_eq!(multi.set_pixel(0, 0, 1), 0);
        multi.present().unwrap();
    }
}
