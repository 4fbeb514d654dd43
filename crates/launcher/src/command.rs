//! Launcher commands
//!
//! The commands a claimed launcher understands. How a command is encoded on
//! the wire is the backend's business.

/// Direction to move the launcher in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Down,
    Up,
    Left,
    Right,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Down => write!(f, "down"),
            Direction::Up => write!(f, "up"),
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
        }
    }
}

/// A string that names no [`Direction`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid direction '{0}', must be one of: down, up, left, right")]
pub struct ParseDirectionError(pub String);

impl std::str::FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "down" => Ok(Direction::Down),
            "up" => Ok(Direction::Up),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            _ => Err(ParseDirectionError(s.to_string())),
        }
    }
}

/// A single command sent to a launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherCommand {
    /// Start moving; the launcher keeps moving until told to stop
    Move(Direction),
    Stop,
    Fire,
    /// Switch the LED on (`true`) or off
    Led(bool),
}
