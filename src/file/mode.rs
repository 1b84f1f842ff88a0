use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::str::FromStr;

use crate::common::exception::IoError;

/// Permission bits for newly created files, before the umask applies.
const CREATE_PERMISSIONS: u32 = 0o666;

/// Access flags derived from an `fopen`-style mode string.
///
/// | mode | read | write | create | truncate | start at end |
/// |------|------|-------|--------|----------|--------------|
/// | `r`  | yes  |       |        |          |              |
/// | `r+` | yes  | yes   |        |          |              |
/// | `w`  |      | yes   | yes    | yes      |              |
/// | `w+` | yes  | yes   | yes    | yes      |              |
/// | `a`  |      | yes   | yes    |          | yes          |
/// | `a+` | yes  | yes   | yes    |          | yes          |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenMode {
    pub fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .create(self.create)
            .truncate(self.truncate)
            .mode(CREATE_PERMISSIONS);
        options
    }
}

impl FromStr for OpenMode {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, plus) = match s.as_bytes() {
            [kind] => (*kind, false),
            [kind, b'+'] => (*kind, true),
            _ => return Err(IoError::BadArgument("bad open mode")),
        };

        let mut mode = match kind {
            b'r' => OpenMode {
                read: true,
                write: false,
                append: false,
                create: false,
                truncate: false,
            },
            b'w' => OpenMode {
                read: false,
                write: true,
                append: false,
                create: true,
                truncate: true,
            },
            b'a' => OpenMode {
                read: false,
                write: true,
                append: true,
                create: true,
                truncate: false,
            },
            _ => return Err(IoError::BadArgument("bad open mode")),
        };

        if plus {
            mode.read = true;
            mode.write = true;
        }

        Ok(mode)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.append {
            "a"
        } else if self.truncate {
            "w"
        } else {
            "r"
        };
        let plus = if self.read && self.write { "+" } else { "" };
        write!(f, "{}{}", kind, plus)
    }
}
