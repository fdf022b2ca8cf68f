use std::collections::HashMap;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crossterm::event::{poll, read, Event, KeyCode};
use crossterm::terminal;

/// left-hand side of a qwerty keyboard, mapped onto the 4x4 hex keypad
/// the way the COSMAC keypad was laid out
const CHIP8_KEYMAP: [(char, u8); 16] = [
    ('1', 0x1),
    ('2', 0x2),
    ('3', 0x3),
    ('4', 0xc),
    ('q', 0x4),
    ('w', 0x5),
    ('e', 0x6),
    ('r', 0xd),
    ('a', 0x7),
    ('s', 0x8),
    ('d', 0x9),
    ('f', 0xe),
    ('z', 0xa),
    ('x', 0x0),
    ('c', 0xb),
    ('v', 0xf),
];

/// what the host loop gets back from a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// a keypad key, already translated to its hex value
    Key(u8),
    /// the user wants out
    Quit,
}

/// reads keypresses
pub trait Input {
    /// return the next pending event, or None when the queue is dry
    fn poll_key(&mut self) -> Result<Option<InputEvent>, io::Error>;
}

/// simple implementation of Input, using STDIN in raw mode
pub struct StdinInput {
    keymap: HashMap<char, u8>,
}

impl StdinInput {
    pub fn new() -> Self {
        terminal::enable_raw_mode().unwrap();
        StdinInput {
            keymap: HashMap::from(CHIP8_KEYMAP),
        }
    }
}

impl Drop for StdinInput {
    fn drop(&mut self) {
        terminal::disable_raw_mode().unwrap();
    }
}

impl Input for StdinInput {
    fn poll_key(&mut self) -> Result<Option<InputEvent>, io::Error> {
        while poll(Duration::from_millis(0))? {
            match read()? {
                Event::Key(evt) => match evt.code {
                    KeyCode::Char(key) => match self.keymap.get(&key) {
                        Some(mapped) => return Ok(Some(InputEvent::Key(*mapped))),
                        None => {
                            eprintln!("Warning: no keypad mapping for {:?}", key);
                        }
                    },
                    KeyCode::Esc => return Ok(Some(InputEvent::Quit)),
                    _ => {}
                },
                _ => {}
            }
        }
        Ok(None)
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

/// scripted Input implementation for testing
pub struct DummyInput {
    events: VecDeque<InputEvent>,
}

impl DummyInput {
    pub fn new(keys: &[u8]) -> Self {
        DummyInput {
            events: keys.iter().map(|k| InputEvent::Key(*k)).collect(),
        }
    }
}

impl Input for DummyInput {
    fn poll_key(&mut self) -> Result<Option<InputEvent>, io::Error> {
        Ok(self.events.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_input_replays_in_order() -> Result<(), io::Error> {
        let mut input = DummyInput::new(&[0xa, 0xb]);
        assert_eq!(input.poll_key()?, Some(InputEvent::Key(0xa)));
        assert_eq!(input.poll_key()?, Some(InputEvent::Key(0xb)));
        assert_eq!(input.poll_key()?, None);
        Ok(())
    }

    #[test]
    fn test_keymap_covers_the_whole_keypad() {
        let mut values: Vec<u8> = CHIP8_KEYMAP.iter().map(|(_, v)| *v).collect();
        values.sort_unstable();
        assert_eq!(values, (0..=0xf).collect::<Vec<u8>>());
    }

    #[test]
    fn test_keymap_chars_are_unique() {
        let keys: HashMap<char, u8> = HashMap::from(CHIP8_KEYMAP);
        assert_eq!(keys.len(), 16);
        assert_eq!(keys[&'x'], 0x0);
        assert_eq!(keys[&'v'], 0xf);
    }
}
