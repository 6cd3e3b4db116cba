//! # Display Module
//!
//! Sinks which show frames to the user, and the keyboard events read back from them.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use crate::error::Result;
use crate::frame::Frame;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Something frames can be shown on, which also acts as the keyboard event source.
pub trait DisplaySink {
    /// Show `frame` in the window called `window`, creating the window if needed.
    fn show(&mut self, window: &str, frame: &Frame) -> Result<()>;

    /// Poll for a key press since the last poll. Called once per tick.
    fn wait_key(&mut self) -> Result<Option<Key>>;

    /// Close every window.
    fn close(&mut self) -> Result<()>;
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// A key event read from a display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    /// A printable key, lowercase
    Char(char),

    Escape,

    /// The user closed a window
    Closed,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// A display without any windows.
///
/// Shown frames are kept, in order, along with the window they were shown in, unless the display
/// was created with [`HeadlessDisplay::counting`]. Key presses are replayed from a script indexed
/// by poll number, starting at 1.
#[derive(Default)]
pub struct HeadlessDisplay {
    shown: Vec<(String, Frame)>,
    shown_count: usize,
    discard: bool,
    script: BTreeMap<u64, Key>,
    polls: u64,
    closed: bool,
}

#[cfg(feature = "window")]
pub struct WindowDisplay {
    windows: Vec<Surface>,
}

#[cfg(feature = "window")]
struct Surface {
    name: String,
    window: minifb::Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
    updated: bool,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A headless display which only counts shown frames.
    pub fn counting() -> Self {
        Self {
            discard: true,
            ..Self::default()
        }
    }

    /// Press `key` on the given poll.
    pub fn press_at(mut self, poll: u64, key: Key) -> Self {
        self.script.insert(poll, key);

        self
    }

    /// Press the character key `c` on the given poll.
    pub fn press_char_at(self, poll: u64, c: char) -> Self {
        self.press_at(poll, Key::Char(c))
    }

    /// All frames shown in `window`, oldest first.
    pub fn frames<'a>(&'a self, window: &'a str) -> impl Iterator<Item = &'a Frame> + 'a {
        self.shown
            .iter()
            .filter(move |(w, _)| w == window)
            .map(|(_, f)| f)
    }

    /// Total number of frames shown in any window.
    pub fn shown_count(&self) -> usize {
        self.shown_count
    }

    /// Number of times the key source was polled.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show(&mut self, window: &str, frame: &Frame) -> Result<()> {
        self.closed = false;
        self.shown_count += 1;

        if !self.discard {
            self.shown.push((window.to_string(), frame.clone()));
        }

        Ok(())
    }

    fn wait_key(&mut self) -> Result<Option<Key>> {
        self.polls += 1;

        Ok(self.script.get(&self.polls).copied())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;

        Ok(())
    }
}

#[cfg(feature = "window")]
impl Default for WindowDisplay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "window")]
impl WindowDisplay {
    pub fn new() -> Self {
        Self { windows: Vec::new() }
    }

    fn surface(&mut self, name: &str, width: usize, height: usize) -> Result<&mut Surface> {
        let existing = self.windows.iter().position(|s| s.name == name);

        let index = match existing {
            Some(i) if self.windows[i].width == width && self.windows[i].height == height => i,
            other => {
                // Frame size changed or the window is new
                if let Some(i) = other {
                    self.windows.remove(i);
                }

                log::debug!("Opening window {:?} at {}x{}", name, width, height);

                let window = minifb::Window::new(
                    name,
                    width,
                    height,
                    minifb::WindowOptions::default()
                ).map_err(|e| crate::error::Error::DisplayError(e.to_string()))?;

                self.windows.push(Surface {
                    name: name.to_string(),
                    window,
                    buffer: vec![0; width * height],
                    width,
                    height,
                    updated: false,
                });

                self.windows.len() - 1
            }
        };

        Ok(&mut self.windows[index])
    }
}

#[cfg(feature = "window")]
impl DisplaySink for WindowDisplay {
    fn show(&mut self, window: &str, frame: &Frame) -> Result<()> {
        let surface = self.surface(window, frame.width() as usize, frame.height() as usize)?;

        surface.buffer = frame.to_0rgb();
        surface.window
            .update_with_buffer(&surface.buffer, surface.width, surface.height)
            .map_err(|e| crate::error::Error::DisplayError(e.to_string()))?;
        surface.updated = true;

        Ok(())
    }

    fn wait_key(&mut self) -> Result<Option<Key>> {
        let mut key = None;

        for surface in self.windows.iter_mut() {
            // Windows which were not drawn this tick still need their events pumped
            if !surface.updated {
                surface.window.update();
            }
            surface.updated = false;

            if !surface.window.is_open() {
                return Ok(Some(Key::Closed));
            }

            if key.is_none() {
                key = surface.window
                    .get_keys_pressed(minifb::KeyRepeat::No)
                    .into_iter()
                    .filter_map(key_from_minifb)
                    .next();
            }
        }

        Ok(key)
    }

    fn close(&mut self) -> Result<()> {
        self.windows.clear();

        Ok(())
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

#[cfg(feature = "window")]
fn key_from_minifb(key: minifb::Key) -> Option<Key> {
    use minifb::Key as K;

    let c = match key {
        K::A => 'a', K::B => 'b', K::C => 'c', K::D => 'd', K::E => 'e', K::F => 'f',
        K::G => 'g', K::H => 'h', K::I => 'i', K::J => 'j', K::K => 'k', K::L => 'l',
        K::M => 'm', K::N => 'n', K::O => 'o', K::P => 'p', K::Q => 'q', K::R => 'r',
        K::S => 's', K::T => 't', K::U => 'u', K::V => 'v', K::W => 'w', K::X => 'x',
        K::Y => 'y', K::Z => 'z', K::Space => ' ',
        K::Escape => return Some(Key::Escape),
        _ => return None
    };

    Some(Key::Char(c))
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use image::GrayImage;

    #[test]
    fn headless_replays_script() {
        let mut d = HeadlessDisplay::new()
            .press_char_at(2, 's')
            .press_at(3, Key::Escape);

        assert_eq!(d.wait_key().unwrap(), None);
        assert_eq!(d.wait_key().unwrap(), Some(Key::Char('s')));
        assert_eq!(d.wait_key().unwrap(), Some(Key::Escape));
        assert_eq!(d.wait_key().unwrap(), None);
        assert_eq!(d.polls(), 4);
    }

    #[test]
    fn headless_keeps_frames_per_window() {
        let mut d = HeadlessDisplay::new();
        let f = Frame::Gray(GrayImage::new(2, 2));

        d.show("a", &f).unwrap();
        d.show("b", &f).unwrap();
        d.show("a", &f).unwrap();
        d.close().unwrap();

        assert_eq!(d.frames("a").count(), 2);
        assert_eq!(d.frames("b").count(), 1);
        assert_eq!(d.shown_count(), 3);
        assert!(d.is_closed());
    }

    #[test]
    fn counting_display_drops_frames() {
        let mut d = HeadlessDisplay::counting();
        d.show("a", &Frame::Gray(GrayImage::new(2, 2))).unwrap();

        assert_eq!(d.shown_count(), 1);
        assert_eq!(d.frames("a").count(), 0);
    }

    #[cfg(feature = "window")]
    #[test]
    fn minifb_keys_map_to_display_keys() {
        assert_eq!(key_from_minifb(minifb::Key::Q), Some(Key::Char('q')));
        assert_eq!(key_from_minifb(minifb::Key::S), Some(Key::Char('s')));
        assert_eq!(key_from_minifb(minifb::Key::Space), Some(Key::Char(' ')));
        assert_eq!(key_from_minifb(minifb::Key::Escape), Some(Key::Escape));
        assert_eq!(key_from_minifb(minifb::Key::LeftShift), None);
    }
}
