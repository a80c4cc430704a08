//! The text-mode console: a fixed character grid shared between the
//! executor (through the memory-mapped video window) and the UI threads.
//!
//! The render and input threads shut down cooperatively: `cleanup` clears
//! the request flags, and both loops poll with short timeouts so the exit
//! flags are set within a bounded delay.

use std::collections::VecDeque;
use std::io::{stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use common::constants::{
    KBD_DATA, KBD_STATUS, VIDEO_CURSOR_VISIBLE, VIDEO_CURSOR_X, VIDEO_CURSOR_Y, VIDEO_END,
    VIDEO_HEIGHT, VIDEO_START, VIDEO_WIDTH,
};
use common::error::MemoryFault;

use crossbeam_channel::{bounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode};
use crossterm::style::Print;
use crossterm::{cursor, queue, terminal};
use log::{error, warn};

use crate::bus::MmioDevice;
use crate::ordered::OrderedMutex;
use crate::RANK_DISPLAY;

const RENDER_INTERVAL: Duration = Duration::from_millis(25);
const INPUT_POLL: Duration = Duration::from_millis(50);
const KEY_QUEUE_DEPTH: usize = 64;

/// A snapshot of the grid handed to a [`Surface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `VIDEO_HEIGHT` lines, trailing blanks trimmed.
    pub lines: Vec<String>,
    pub cursor: (u8, u8),
    pub cursor_visible: bool,
}

impl Frame {
    /// The exported textual form: one line per row, newline separated.
    pub fn to_text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Where frames go and where keystrokes come from. Mirrors the split
/// between a real terminal and a captured pipe used by tests.
pub trait Surface: Send + Sync {
    /// Called once when the UI threads start.
    fn attach(&self) {}
    /// Called once after the UI threads have exited.
    fn detach(&self) {}

    fn present(&self, frame: &Frame);
    fn poll_key(&self, timeout: Duration) -> Option<u8>;
}

struct GridState {
    cells: Vec<u32>,
    cursor_x: u8,
    cursor_y: u8,
    cursor_visible: bool,
}

pub struct Console {
    grid: OrderedMutex<GridState>,
    dirty: AtomicBool,
    running: AtomicBool,
    input_enabled: AtomicBool,
    render_exited: AtomicBool,
    input_exited: AtomicBool,
    key_tx: Sender<u8>,
    key_rx: Receiver<u8>,
    surface: Arc<dyn Surface>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Console {
    pub fn new(surface: Arc<dyn Surface>) -> Console {
        let (key_tx, key_rx) = bounded(KEY_QUEUE_DEPTH);
        Console {
            grid: OrderedMutex::new(
                RANK_DISPLAY,
                GridState {
                    cells: vec![0; VIDEO_WIDTH * VIDEO_HEIGHT],
                    cursor_x: 0,
                    cursor_y: 0,
                    cursor_visible: true,
                },
            ),
            dirty: AtomicBool::new(true),
            running: AtomicBool::new(false),
            input_enabled: AtomicBool::new(false),
            render_exited: AtomicBool::new(false),
            input_exited: AtomicBool::new(false),
            key_tx,
            key_rx,
            surface,
            threads: Mutex::new(Vec::new()),
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Grid access
    ///////////////////////////////////////////////////////////////////////////

    pub fn set_char(&self, x: usize, y: usize, code: u32) {
        assert!(x < VIDEO_WIDTH && y < VIDEO_HEIGHT, "cell ({x}, {y}) out of grid");
        self.grid.lock().cells[y * VIDEO_WIDTH + x] = code;
        self.dirty.store(true, Ordering::Release);
    }

    pub fn get_char(&self, x: usize, y: usize) -> u32 {
        assert!(x < VIDEO_WIDTH && y < VIDEO_HEIGHT, "cell ({x}, {y}) out of grid");
        self.grid.lock().cells[y * VIDEO_WIDTH + x]
    }

    pub fn set_cursor(&self, x: u8, y: u8) {
        let mut grid = self.grid.lock();
        grid.cursor_x = x;
        grid.cursor_y = y;
        self.dirty.store(true, Ordering::Release);
    }

    pub fn get_cursor(&self) -> (u8, u8) {
        let grid = self.grid.lock();
        (grid.cursor_x, grid.cursor_y)
    }

    pub fn set_cursor_visible(&self, visible: bool) {
        self.grid.lock().cursor_visible = visible;
        self.dirty.store(true, Ordering::Release);
    }

    /// Scroll the grid up one row, blanking the last. Used by the console
    /// itself, not the executor.
    pub fn scroll_up(&self) {
        let mut grid = self.grid.lock();
        grid.cells.copy_within(VIDEO_WIDTH.., 0);
        let len = grid.cells.len();
        grid.cells[len - VIDEO_WIDTH..].fill(0);
        self.dirty.store(true, Ordering::Release);
    }

    /// Snapshot the grid for rendering or export.
    pub fn frame(&self) -> Frame {
        let grid = self.grid.lock();
        let lines = grid
            .cells
            .chunks(VIDEO_WIDTH)
            .map(|row| {
                let mut line: String = row
                    .iter()
                    .map(|&cp| match cp {
                        0 => ' ',
                        cp => char::from_u32(cp).unwrap_or(' '),
                    })
                    .collect();
                line.truncate(line.trim_end().len());
                line
            })
            .collect();
        Frame {
            lines,
            cursor: (grid.cursor_x, grid.cursor_y),
            cursor_visible: grid.cursor_visible,
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Keystrokes
    ///////////////////////////////////////////////////////////////////////////

    pub fn try_key(&self) -> Option<u8> {
        self.key_rx.try_recv().ok()
    }

    pub fn key_available(&self) -> bool {
        !self.key_rx.is_empty()
    }

    /// Enqueue a keystroke as if typed. Dropped when the executor is behind.
    pub fn inject_key(&self, key: u8) {
        if self.key_tx.try_send(key).is_err() {
            warn!("key queue full; dropping {key:#x}");
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Lifecycle
    ///////////////////////////////////////////////////////////////////////////

    /// Start the render and input threads.
    pub fn initialize(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.input_enabled.store(true, Ordering::Release);
        self.render_exited.store(false, Ordering::Release);
        self.input_exited.store(false, Ordering::Release);
        self.surface.attach();
        self.dirty.store(true, Ordering::Release);

        let mut threads = self.threads.lock().unwrap();

        let console = Arc::clone(self);
        threads.push(std::thread::spawn(move || console.render_loop()));

        let console = Arc::clone(self);
        threads.push(std::thread::spawn(move || console.input_loop()));
    }

    /// Request shutdown and join both threads.
    pub fn cleanup(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        self.input_enabled.store(false, Ordering::Release);
        let handles: Vec<_> = self.threads.lock().unwrap().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("console thread panicked");
            }
        }
        if was_running {
            self.surface.detach();
        }
    }

    pub fn render_exited(&self) -> bool {
        self.render_exited.load(Ordering::Acquire)
    }

    pub fn input_exited(&self) -> bool {
        self.input_exited.load(Ordering::Acquire)
    }

    fn render_loop(&self) {
        while self.running.load(Ordering::Acquire) {
            // The dirty flag is release/acquire: observing it here orders
            // this thread after the write that set it.
            if self.dirty.swap(false, Ordering::AcqRel) {
                let frame = self.frame();
                self.surface.present(&frame);
            } else {
                std::thread::sleep(RENDER_INTERVAL);
            }
        }
        self.render_exited.store(true, Ordering::Release);
    }

    fn input_loop(&self) {
        while self.input_enabled.load(Ordering::Acquire) {
            if let Some(key) = self.surface.poll_key(INPUT_POLL) {
                self.inject_key(key);
            }
        }
        self.input_exited.store(true, Ordering::Release);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Surfaces
////////////////////////////////////////////////////////////////////////////////

/// A real terminal: raw mode plus the alternate screen, entered only while
/// the UI threads are running so the surrounding shell keeps line input.
#[derive(Default)]
pub struct TerminalSurface {
    attached: AtomicBool,
}

impl TerminalSurface {
    pub fn new() -> std::io::Result<TerminalSurface> {
        Ok(TerminalSurface::default())
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        self.detach();
    }
}

impl Surface for TerminalSurface {
    fn attach(&self) {
        if self.attached.swap(true, Ordering::AcqRel) {
            return;
        }
        let setup = || -> std::io::Result<()> {
            terminal::enable_raw_mode()?;
            let mut out = stdout().lock();
            queue!(out, terminal::EnterAlternateScreen, terminal::Clear(terminal::ClearType::All))?;
            out.flush()
        };
        if let Err(e) = setup() {
            error!("terminal setup failed: {e}");
        }
    }

    fn detach(&self) {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut out = stdout().lock();
        let _ = queue!(out, terminal::LeaveAlternateScreen, cursor::Show);
        let _ = out.flush();
        let _ = terminal::disable_raw_mode();
    }

    fn present(&self, frame: &Frame) {
        let mut out = stdout().lock();
        let mut draw = || -> std::io::Result<()> {
            queue!(out, terminal::Clear(terminal::ClearType::All))?;
            for (y, line) in frame.lines.iter().enumerate() {
                queue!(out, cursor::MoveTo(0, y as u16), Print(line))?;
            }
            if frame.cursor_visible {
                queue!(out, cursor::MoveTo(frame.cursor.0 as u16, frame.cursor.1 as u16))?;
                queue!(out, cursor::Show)?;
            } else {
                queue!(out, cursor::Hide)?;
            }
            out.flush()
        };
        if let Err(e) = draw() {
            error!("render failed: {e}");
        }
    }

    fn poll_key(&self, timeout: Duration) -> Option<u8> {
        match event::poll(timeout) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) => match key.code {
                    KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
                    KeyCode::Enter => Some(b'\n'),
                    KeyCode::Backspace => Some(0x08),
                    KeyCode::Esc => Some(0x1B),
                    _ => None,
                },
                Ok(_) => None,
                Err(e) => {
                    error!("input read failed: {e}");
                    None
                }
            },
            Ok(false) => None,
            Err(e) => {
                error!("input poll failed: {e}");
                std::thread::sleep(timeout);
                None
            }
        }
    }
}

/// A captured surface for tests and headless runs: frames accumulate in
/// memory and keystrokes are scripted.
#[derive(Default)]
pub struct PipeSurface {
    frames: Mutex<Vec<Frame>>,
    input: Mutex<VecDeque<u8>>,
}

impl PipeSurface {
    pub fn push_input(&self, keys: &[u8]) {
        self.input.lock().unwrap().extend(keys);
    }

    pub fn take_frames(&self) -> Vec<Frame> {
        std::mem::take(&mut self.frames.lock().unwrap())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl Surface for PipeSurface {
    fn present(&self, frame: &Frame) {
        self.frames.lock().unwrap().push(frame.clone());
    }

    fn poll_key(&self, timeout: Duration) -> Option<u8> {
        let key = self.input.lock().unwrap().pop_front();
        if key.is_none() {
            std::thread::sleep(timeout);
        }
        key
    }
}

////////////////////////////////////////////////////////////////////////////////
// Memory-mapped windows
////////////////////////////////////////////////////////////////////////////////

/// The video window: one byte per grid cell, then the cursor registers.
pub struct Screen {
    console: Arc<Console>,
}

impl Screen {
    pub fn new(console: Arc<Console>) -> Screen {
        Screen { console }
    }
}

impl MmioDevice for Screen {
    fn range(&self) -> std::ops::Range<u64> {
        VIDEO_START..VIDEO_END
    }

    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        for (i, byte) in buf.iter_mut().enumerate() {
            let at = addr + i as u64;
            *byte = match at {
                VIDEO_CURSOR_X => self.console.get_cursor().0,
                VIDEO_CURSOR_Y => self.console.get_cursor().1,
                VIDEO_CURSOR_VISIBLE => self.console.frame().cursor_visible as u8,
                _ => {
                    let off = (at - VIDEO_START) as usize;
                    self.console.get_char(off % VIDEO_WIDTH, off / VIDEO_WIDTH) as u8
                }
            };
        }
        Ok(())
    }

    fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemoryFault> {
        for (i, byte) in data.iter().enumerate() {
            let at = addr + i as u64;
            match at {
                VIDEO_CURSOR_X => {
                    let (_, y) = self.console.get_cursor();
                    self.console.set_cursor(*byte, y);
                }
                VIDEO_CURSOR_Y => {
                    let (x, _) = self.console.get_cursor();
                    self.console.set_cursor(x, *byte);
                }
                VIDEO_CURSOR_VISIBLE => self.console.set_cursor_visible(*byte != 0),
                _ => {
                    let off = (at - VIDEO_START) as usize;
                    self.console.set_char(off % VIDEO_WIDTH, off / VIDEO_WIDTH, *byte as u32);
                }
            }
        }
        Ok(())
    }
}

/// The keyboard port: a status byte and a data byte that pops the queue.
pub struct Keyboard {
    console: Arc<Console>,
}

impl Keyboard {
    pub fn new(console: Arc<Console>) -> Keyboard {
        Keyboard { console }
    }
}

impl MmioDevice for Keyboard {
    fn range(&self) -> std::ops::Range<u64> {
        KBD_DATA..KBD_STATUS + 1
    }

    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryFault> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = match addr + i as u64 {
                a if a == KBD_DATA => self.console.try_key().unwrap_or(0),
                _ => self.console.key_available() as u8,
            };
        }
        Ok(())
    }

    fn write(&self, _addr: u64, _data: &[u8]) -> Result<(), MemoryFault> {
        // Writes to the keyboard port are ignored.
        Ok(())
    }
}
