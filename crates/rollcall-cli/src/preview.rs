//! Live camera preview in an inline terminal viewport.
//!
//! Each terminal cell shows two vertically stacked pixels with the upper half
//! block: foreground is the top pixel, background the bottom one.

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Style, Stylize};
use ratatui::widgets::{Block, Borders, Paragraph, Widget};
use ratatui::{Terminal, TerminalOptions, Viewport};
use rollcall_hw::{ChannelOrder, Frame};
use rollcall_session::{AttendanceRecord, DisplaySink, TIMESTAMP_FORMAT};
use std::io::{self, Stdout};
use std::time::Duration;

pub const WINDOW_TITLE: &str = "Face Recognition - Attendance";

/// Rows taken by the inline viewport, borders and status line included.
const VIEWPORT_HEIGHT: u16 = 24;

const UPPER_HALF_BLOCK: &str = "\u{2580}";

pub struct TerminalPreview {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    marked_count: usize,
}

impl TerminalPreview {
    pub fn open() -> io::Result<Self> {
        enable_raw_mode()?;
        let terminal = Terminal::with_options(
            CrosstermBackend::new(io::stdout()),
            TerminalOptions {
                viewport: Viewport::Inline(VIEWPORT_HEIGHT),
            },
        );
        match terminal {
            Ok(terminal) => Ok(Self { terminal, marked_count: 0 }),
            Err(e) => {
                let _ = disable_raw_mode();
                Err(e)
            }
        }
    }
}

impl DisplaySink for TerminalPreview {
    fn show(&mut self, frame: &Frame) -> io::Result<()> {
        let marked = self.marked_count;
        self.terminal.draw(|f| {
            let block = Block::default()
                .borders(Borders::ALL)
                .title(WINDOW_TITLE)
                .title_style(Style::new().bold());
            let inner = block.inner(f.area());
            f.render_widget(block, f.area());

            let [picture, status] =
                Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(inner);
            f.render_widget(FrameView { frame }, picture);
            f.render_widget(
                Paragraph::new(format!("q: quit   marked: {marked}")).dark_gray(),
                status,
            );
        })?;
        Ok(())
    }

    fn quit_requested(&mut self) -> io::Result<bool> {
        if !event::poll(Duration::from_millis(1))? {
            return Ok(false);
        }
        let Event::Key(key) = event::read()? else {
            return Ok(false);
        };
        if key.kind != KeyEventKind::Press {
            return Ok(false);
        }
        Ok(is_quit_key(key.code, key.modifiers))
    }

    fn marked(&mut self, record: &AttendanceRecord) -> io::Result<()> {
        self.marked_count += 1;
        let line = format!(
            "Marked {} at {}",
            record.name,
            record.timestamp.format(TIMESTAMP_FORMAT)
        );
        self.terminal
            .insert_before(1, |buf| Paragraph::new(line).render(buf.area, buf))
    }
}

impl Drop for TerminalPreview {
    fn drop(&mut self) {
        let _ = self.terminal.clear();
        let _ = disable_raw_mode();
        let _ = self.terminal.show_cursor();
        tracing::debug!("preview closed");
    }
}

fn is_quit_key(code: KeyCode, modifiers: KeyModifiers) -> bool {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        // raw mode swallows SIGINT
        KeyCode::Char('c') => modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Draws a frame scaled to fit its area, centred, aspect ratio kept.
struct FrameView<'a> {
    frame: &'a Frame,
}

impl Widget for FrameView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (cols, rows) = fit(self.frame.width, self.frame.height, area.width, area.height);
        if cols == 0 || rows == 0 {
            return;
        }
        let left = area.x + (area.width - cols) / 2;
        let top = area.y + (area.height - rows) / 2;
        let px_rows = u32::from(rows) * 2;

        for row in 0..rows {
            for col in 0..cols {
                let x = sample_coord(u32::from(col), u32::from(cols), self.frame.width);
                let upper = sample_coord(u32::from(row) * 2, px_rows, self.frame.height);
                let lower = sample_coord(u32::from(row) * 2 + 1, px_rows, self.frame.height);
                if let Some(cell) = buf.cell_mut((left + col, top + row)) {
                    cell.set_symbol(UPPER_HALF_BLOCK)
                        .set_fg(pixel(self.frame, x, upper))
                        .set_bg(pixel(self.frame, x, lower));
                }
            }
        }
    }
}

/// Largest cell grid inside `cols × rows` showing a `width × height` image
/// without distortion. A cell is one pixel wide and two pixels tall.
fn fit(width: u32, height: u32, cols: u16, rows: u16) -> (u16, u16) {
    if width == 0 || height == 0 || cols == 0 || rows == 0 {
        return (0, 0);
    }
    let px_rows = u64::from(rows) * 2;
    let (width, height) = (u64::from(width), u64::from(height));

    // Limited by width unless that overflows the available rows.
    let by_width = (u64::from(cols), u64::from(cols) * height / width);
    let (fit_cols, fit_px_rows) = if by_width.1 <= px_rows {
        by_width
    } else {
        (px_rows * width / height, px_rows)
    };

    let fit_rows = fit_px_rows.div_ceil(2).clamp(1, u64::from(rows));
    (fit_cols.clamp(1, u64::from(cols)) as u16, fit_rows as u16)
}

/// Nearest source coordinate for output index `i` of `n` over `size` pixels.
fn sample_coord(i: u32, n: u32, size: u32) -> u32 {
    let scaled = (u64::from(i) * u64::from(size) + u64::from(size) / 2) / u64::from(n.max(1));
    (scaled as u32).min(size.saturating_sub(1))
}

fn pixel(frame: &Frame, x: u32, y: u32) -> Color {
    let offset = ((y as usize) * (frame.width as usize) + x as usize) * 3;
    let Some(p) = frame.data.get(offset..offset + 3) else {
        return Color::Reset;
    };
    match frame.order {
        ChannelOrder::Rgb => Color::Rgb(p[0], p[1], p[2]),
        ChannelOrder::Bgr => Color::Rgb(p[2], p[1], p[0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_wide_area() {
        // 640x480 in 100x20 cells: height-bound, 40 pixel rows → 53 cols.
        assert_eq!(fit(640, 480, 100, 20), (53, 20));
    }

    #[test]
    fn test_fit_narrow_area() {
        // 40 cols → 30 pixel rows → 15 cell rows.
        assert_eq!(fit(640, 480, 40, 50), (40, 15));
    }

    #[test]
    fn test_fit_degenerate() {
        assert_eq!(fit(0, 480, 40, 20), (0, 0));
        assert_eq!(fit(640, 480, 0, 20), (0, 0));
    }

    #[test]
    fn test_sample_coord_stays_in_bounds() {
        for i in 0..53 {
            assert!(sample_coord(i, 53, 640) < 640);
        }
        assert_eq!(sample_coord(0, 1, 1), 0);
    }

    #[test]
    fn test_pixel_respects_channel_order() {
        let rgb = Frame::new(vec![10, 20, 30], 1, 1, ChannelOrder::Rgb).unwrap();
        let bgr = Frame::new(vec![10, 20, 30], 1, 1, ChannelOrder::Bgr).unwrap();
        assert_eq!(pixel(&rgb, 0, 0), Color::Rgb(10, 20, 30));
        assert_eq!(pixel(&bgr, 0, 0), Color::Rgb(30, 20, 10));
    }

    #[test]
    fn test_frame_view_paints_half_blocks() {
        let frame = Frame::solid(8, 8, [200, 0, 0]);
        let area = Rect::new(0, 0, 4, 2);
        let mut buf = Buffer::empty(area);
        FrameView { frame: &frame }.render(area, &mut buf);

        let cell = &buf[(0, 0)];
        assert_eq!(cell.symbol(), UPPER_HALF_BLOCK);
        assert_eq!(cell.fg, Color::Rgb(200, 0, 0));
        assert_eq!(cell.bg, Color::Rgb(200, 0, 0));
    }

    #[test]
    fn test_quit_keys() {
        assert!(is_quit_key(KeyCode::Char('q'), KeyModifiers::NONE));
        assert!(is_quit_key(KeyCode::Esc, KeyModifiers::NONE));
        assert!(is_quit_key(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(!is_quit_key(KeyCode::Char('c'), KeyModifiers::NONE));
        assert!(!is_quit_key(KeyCode::Enter, KeyModifiers::NONE));
    }
}
