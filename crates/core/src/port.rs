//! Ports
//!
//! Unified byte-level I/O over host files, standard streams, and in-memory
//! string buffers. Character decoding (UTF-8) sits directly above the byte
//! layer; the single-slot pushback lives on the interpreter, not here.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use bitflags::bitflags;

use crate::skstring::decode_utf8;

bitflags! {
    /// Port kind bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortKind: u8 {
        const INPUT   = 1 << 0;
        const OUTPUT  = 1 << 1;
        const FILE    = 1 << 2;
        const STRING  = 1 << 3;
        /// Output string port that grows on demand.
        const GROWABLE = 1 << 4;
        /// End of file has been observed on the load port.
        const SAW_EOF = 1 << 5;
    }
}

#[derive(Debug)]
pub enum Backend {
    Stdin(std::io::Stdin),
    Stdout(std::io::Stdout),
    FileRead(BufReader<File>),
    FileWrite(File),
    FileReadWrite(File),
    StringInput { bytes: Vec<u8>, pos: usize },
    /// `cap` bounds a fixed-size buffer (writes past it are dropped);
    /// growable ports have no cap.
    StringOutput { bytes: Vec<u8>, cap: Option<usize> },
    Closed,
}

#[derive(Debug)]
pub struct Port {
    pub kind: PortKind,
    pub backend: Backend,
    /// Close the underlying file when the cell is collected or the port is
    /// fully closed. Standard streams are never closed.
    pub close_on_collect: bool,
    /// Source name for error messages (input file ports).
    pub filename: Option<String>,
    /// Current line, 0-based, maintained by the reader.
    pub curr_line: usize,
}

impl Port {
    pub fn from_stdin() -> Port {
        Port {
            kind: PortKind::INPUT | PortKind::FILE,
            backend: Backend::Stdin(std::io::stdin()),
            close_on_collect: false,
            filename: None,
            curr_line: 0,
        }
    }

    pub fn from_stdout() -> Port {
        Port {
            kind: PortKind::OUTPUT | PortKind::FILE,
            backend: Backend::Stdout(std::io::stdout()),
            close_on_collect: false,
            filename: None,
            curr_line: 0,
        }
    }

    /// Open a file port. `kind` must request INPUT, OUTPUT, or both;
    /// input-output opens in append-plus mode like the original.
    pub fn from_filename(path: &Path, kind: PortKind) -> std::io::Result<Port> {
        let backend = if kind.contains(PortKind::INPUT | PortKind::OUTPUT) {
            let f = File::options()
                .read(true)
                .append(true)
                .create(true)
                .open(path)?;
            Backend::FileReadWrite(f)
        } else if kind.contains(PortKind::OUTPUT) {
            Backend::FileWrite(File::create(path)?)
        } else {
            Backend::FileRead(BufReader::new(File::open(path)?))
        };
        Ok(Port {
            kind: kind | PortKind::FILE,
            backend,
            close_on_collect: true,
            filename: Some(path.display().to_string()),
            curr_line: 0,
        })
    }

    /// Input port over a copy of the given bytes.
    pub fn from_string(bytes: Vec<u8>, kind: PortKind) -> Port {
        Port {
            kind: kind | PortKind::STRING,
            backend: Backend::StringInput { bytes, pos: 0 },
            close_on_collect: false,
            filename: None,
            curr_line: 0,
        }
    }

    /// Growable output string port.
    pub fn from_scratch() -> Port {
        Port {
            kind: PortKind::OUTPUT | PortKind::STRING | PortKind::GROWABLE,
            backend: Backend::StringOutput {
                bytes: Vec::with_capacity(256),
                cap: None,
            },
            close_on_collect: false,
            filename: None,
            curr_line: 0,
        }
    }

    /// Fixed-capacity output string port over a copy of an existing buffer's
    /// size; writes past the end are dropped.
    pub fn output_over(bytes: Vec<u8>) -> Port {
        let cap = bytes.len();
        Port {
            kind: PortKind::OUTPUT | PortKind::STRING,
            backend: Backend::StringOutput {
                bytes: Vec::new(),
                cap: Some(cap),
            },
            close_on_collect: false,
            filename: None,
            curr_line: 0,
        }
    }

    pub fn is_input(&self) -> bool {
        self.kind.contains(PortKind::INPUT)
    }

    pub fn is_output(&self) -> bool {
        self.kind.contains(PortKind::OUTPUT)
    }

    /// Drop the given direction; when neither direction remains, release
    /// the backend.
    pub fn close(&mut self, flag: PortKind) {
        self.kind.remove(flag & (PortKind::INPUT | PortKind::OUTPUT));
        if !self.is_input() && !self.is_output() {
            self.backend = Backend::Closed;
            self.curr_line = 0;
            self.filename = None;
        }
    }

    /// Read one raw byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        let mut one = [0u8; 1];
        match &mut self.backend {
            Backend::Stdin(s) => match s.read(&mut one) {
                Ok(1) => Some(one[0]),
                _ => None,
            },
            Backend::FileRead(r) => match r.read(&mut one) {
                Ok(1) => Some(one[0]),
                _ => None,
            },
            Backend::FileReadWrite(f) => match f.read(&mut one) {
                Ok(1) => Some(one[0]),
                _ => None,
            },
            Backend::StringInput { bytes, pos } => {
                if *pos >= bytes.len() {
                    None
                } else {
                    let b = bytes[*pos];
                    *pos += 1;
                    Some(b)
                }
            }
            _ => None,
        }
    }

    /// Read one UTF-8 code point.
    pub fn read_char(&mut self) -> Option<u32> {
        let first = self.read_byte()?;
        decode_utf8(first, &mut || self.read_byte())
    }

    /// Write raw bytes; errors and writes past a fixed cap are dropped, as
    /// the stdio-based original dropped them.
    pub fn write_bytes(&mut self, data: &[u8]) {
        match &mut self.backend {
            Backend::Stdout(s) => {
                let _ = s.write_all(data);
                let _ = s.flush();
            }
            Backend::FileWrite(f) => {
                let _ = f.write_all(data);
            }
            Backend::FileReadWrite(f) => {
                let _ = f.write_all(data);
            }
            Backend::StringOutput { bytes, cap } => match cap {
                None => bytes.extend_from_slice(data),
                Some(c) => {
                    let room = c.saturating_sub(bytes.len());
                    bytes.extend_from_slice(&data[..data.len().min(room)]);
                }
            },
            _ => {}
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn write_u8(&mut self, b: u8) {
        self.write_bytes(&[b]);
    }

    /// Contents of an output string port so far.
    pub fn output_bytes(&self) -> Option<&[u8]> {
        match &self.backend {
            Backend::StringOutput { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_string_input_bytes_then_eof() {
        let mut p = Port::from_string(b"ab".to_vec(), PortKind::INPUT);
        assert_eq!(p.read_byte(), Some(b'a'));
        assert_eq!(p.read_byte(), Some(b'b'));
        assert_eq!(p.read_byte(), None);
        assert_eq!(p.read_byte(), None);
    }

    #[test]
    fn test_string_input_decodes_utf8() {
        let mut p = Port::from_string("\u{3BB}x".as_bytes().to_vec(), PortKind::INPUT);
        assert_eq!(p.read_char(), Some(0x3BB));
        assert_eq!(p.read_char(), Some('x' as u32));
        assert_eq!(p.read_char(), None);
    }

    #[test]
    fn test_scratch_output_grows() {
        let mut p = Port::from_scratch();
        for _ in 0..100 {
            p.write_str("0123456789");
        }
        assert_eq!(p.output_bytes().unwrap().len(), 1000);
    }

    #[test]
    fn test_fixed_output_drops_past_cap() {
        let mut p = Port::output_over(vec![0u8; 4]);
        p.write_str("abcdef");
        assert_eq!(p.output_bytes().unwrap(), b"abcd");
    }

    #[test]
    fn test_close_both_directions_releases_backend() {
        let mut p = Port::from_string(b"x".to_vec(), PortKind::INPUT);
        p.close(PortKind::INPUT);
        assert!(!p.is_input());
        assert!(matches!(p.backend, Backend::Closed));
        assert_eq!(p.read_byte(), None);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(b"hi").unwrap();
        }
        let mut p = Port::from_filename(&path, PortKind::INPUT).unwrap();
        assert!(p.is_input());
        assert_eq!(p.read_byte(), Some(b'h'));
        assert_eq!(p.read_byte(), Some(b'i'));
        assert_eq!(p.read_byte(), None);
    }
}
