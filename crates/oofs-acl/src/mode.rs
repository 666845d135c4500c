use std::fmt;
use std::str::FromStr;

use crate::AdminError;

/// Read/write permission bits, used both for rules and for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode {
    pub read: bool,
    pub write: bool,
}

impl Mode {
    pub const NONE: Mode = Mode {
        read: false,
        write: false,
    };
    pub const READ: Mode = Mode {
        read: true,
        write: false,
    };
    pub const WRITE: Mode = Mode {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Mode = Mode {
        read: true,
        write: true,
    };

    /// True when every bit in `wanted` is granted.
    pub fn allows(self, wanted: Mode) -> bool {
        (!wanted.read || self.read) && (!wanted.write || self.write)
    }

    pub(crate) fn flag(bit: bool) -> char {
        if bit {
            '1'
        } else {
            '0'
        }
    }
}

impl FromStr for Mode {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(Mode::READ),
            "w" => Ok(Mode::WRITE),
            "rw" | "wr" => Ok(Mode::READ_WRITE),
            "-" => Ok(Mode::NONE),
            other => Err(AdminError::MalformedMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match (self.read, self.write) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "-",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for text in ["r", "w", "rw", "-"] {
            assert_eq!(text.parse::<Mode>().unwrap().to_string(), text);
        }
        assert_eq!(
            "rx".parse::<Mode>(),
            Err(AdminError::MalformedMode("rx".into()))
        );
    }

    #[test]
    fn test_allows() {
        assert!(Mode::READ_WRITE.allows(Mode::WRITE));
        assert!(Mode::READ.allows(Mode::READ));
        assert!(!Mode::READ.allows(Mode::READ_WRITE));
        assert!(!Mode::NONE.allows(Mode::READ));
    }
}
