//! Printing atoms
//!
//! `write` output is re-readable (escaped strings, named characters);
//! `display` output is raw. List and vector structure is printed by the
//! evaluator's printer opcodes; this module renders single atoms and the
//! number formats.

use crate::cell::{Kind, Ptr, Tag};
use crate::interp::Interp;
use crate::skstring::{push_utf8, StrBuf};

/// Render an integer in the given base, uppercase digits, like the
/// original's hand-rolled converter.
pub(crate) fn long_to_str(v: i64, base: u32) -> String {
    if v == 0 {
        return "0".to_string();
    }
    let neg = v < 0;
    let mut v = v.unsigned_abs();
    let mut digits = Vec::new();
    while v > 0 {
        let d = (v % base as u64) as u32;
        digits.push(char::from_digit(d, base).map(|c| c.to_ascii_uppercase()).unwrap_or('?'));
        v /= base as u64;
    }
    if neg {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

/// Shortest decimal rendering with at most ten significant digits, always
/// carrying a decimal point or exponent so reals re-read as reals.
pub(crate) fn fmt_double(v: f64) -> String {
    if v.is_nan() {
        return "+nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "+inf" } else { "-inf" }.to_string();
    }
    let mut s = fmt_g(v, 10);
    if !s.contains('.') && !s.contains('e') {
        s.push_str(".0");
    }
    s
}

fn fmt_g(v: f64, prec: i32) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let exp = v.abs().log10().floor() as i32;
    if exp < -4 || exp >= prec {
        let mut s = format!("{:.*e}", (prec - 1) as usize, v);
        // Trim trailing zeros in the mantissa.
        if let Some(epos) = s.find('e') {
            let (mant, tail) = s.split_at(epos);
            let mant = mant.trim_end_matches('0').trim_end_matches('.');
            s = format!("{}{}", mant, tail);
        }
        s
    } else {
        let decimals = (prec - 1 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, v);
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }
}

impl Interp {
    /// Write a string to the current output port.
    pub(crate) fn putstr(&mut self, s: &str) {
        let out = self.outport;
        if self.is_port(out) {
            self.port_mut(out).write_str(s);
        }
    }

    pub(crate) fn putchars(&mut self, bytes: &[u8]) {
        let out = self.outport;
        if self.is_port(out) {
            self.port_mut(out).write_bytes(bytes);
        }
    }

    /// Write one raw byte (used by `write-u8` and string escapes).
    pub(crate) fn putcharacter(&mut self, b: u8) {
        self.putchars(&[b]);
    }

    /// Print one atom to the output port. `write_mode` selects re-readable
    /// rendering.
    pub(crate) fn printatom(&mut self, l: Ptr, write_mode: bool) {
        if self.is_string(l) && write_mode {
            let s = self.strbuf(l).clone();
            self.print_slash_string(&s);
            return;
        }
        let text = self.atom_to_bytes(l, if write_mode { 1 } else { 0 });
        self.putchars(&text);
    }

    /// Render an atom. `f` is 0 for display, 1 for write, or a numeric
    /// base between 2 and 36.
    pub(crate) fn atom_to_bytes(&self, l: Ptr, f: i32) -> Vec<u8> {
        if l == Ptr::NIL {
            return b"()".to_vec();
        }
        if l == Ptr::T {
            return b"#t".to_vec();
        }
        if l == Ptr::F {
            return b"#f".to_vec();
        }
        if l == Ptr::EOF_OBJ {
            return b"#<EOF>".to_vec();
        }
        match self.tag(l) {
            Tag::Port => b"#<PORT>".to_vec(),
            Tag::Num => {
                if f <= 1 || f == 10 {
                    match self.cell(l).kind {
                        Kind::Num(crate::num::Num::Int(i)) => i.to_string().into_bytes(),
                        Kind::Num(crate::num::Num::Real(r)) => fmt_double(r).into_bytes(),
                        _ => Vec::new(),
                    }
                } else if (2..=36).contains(&f) {
                    long_to_str(self.ivalue(l), f as u32).into_bytes()
                } else {
                    Vec::new()
                }
            }
            Tag::Str => {
                // Write mode is handled by printatom; this is display.
                let mut out = Vec::new();
                for c in self.strbuf(l).chars() {
                    if c == 0 {
                        out.push(0);
                    } else {
                        push_utf8(&mut out, c);
                    }
                }
                out
            }
            Tag::Char => {
                let c = self.charvalue(l);
                if f == 0 {
                    let mut out = Vec::new();
                    push_utf8(&mut out, c);
                    out
                } else {
                    match c {
                        0x20 => b"#\\space".to_vec(),
                        0x0A => b"#\\newline".to_vec(),
                        0x0D => b"#\\return".to_vec(),
                        0x09 => b"#\\tab".to_vec(),
                        c if c < 32 || c >= 0x80 => format!("#\\x{:x}", c).into_bytes(),
                        c => {
                            let mut out = b"#\\".to_vec();
                            push_utf8(&mut out, c);
                            out
                        }
                    }
                }
            }
            Tag::Sym => {
                let name = self.strbuf(self.car(l));
                let mut out = Vec::new();
                for c in name.chars() {
                    push_utf8(&mut out, c);
                }
                out
            }
            Tag::Proc => {
                let op = self.proc_op(l);
                let name = op.info().name.unwrap_or("ILLEGAL!");
                format!("#<{} PROCEDURE {}>", name, op as usize).into_bytes()
            }
            Tag::Macro => b"#<MACRO>".to_vec(),
            Tag::Closure => b"#<CLOSURE>".to_vec(),
            Tag::Promise => b"#<PROMISE>".to_vec(),
            Tag::Foreign => b"#<FOREIGN PROCEDURE>".to_vec(),
            Tag::Continuation => b"#<CONTINUATION>".to_vec(),
            Tag::Bytevector => {
                let len = match &self.cell(l).kind {
                    Kind::Bytevector(b) => b.len(),
                    _ => 0,
                };
                format!("#u8(len={})", len).into_bytes()
            }
            _ => b"#<ERROR>".to_vec(),
        }
    }

    /// Re-readable string rendering with escapes.
    fn print_slash_string(&mut self, s: &StrBuf) {
        self.putcharacter(b'"');
        for c in s.chars() {
            if c == '"' as u32 || c < 32 || c == '\\' as u32 {
                self.putcharacter(b'\\');
                match c {
                    0x22 => self.putcharacter(b'"'),
                    0x0A => self.putcharacter(b'n'),
                    0x09 => self.putcharacter(b't'),
                    0x0D => self.putcharacter(b'r'),
                    0x5C => self.putcharacter(b'\\'),
                    _ => {
                        let hex = format!("x{:02X}", c);
                        self.putstr(&hex);
                    }
                }
            } else {
                let mut out = Vec::new();
                push_utf8(&mut out, c);
                self.putchars(&out);
            }
        }
        self.putcharacter(b'"');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_double_forces_point() {
        assert_eq!(fmt_double(3.0), "3.0");
        assert_eq!(fmt_double(0.5), "0.5");
        assert_eq!(fmt_double(-2.0), "-2.0");
        assert_eq!(fmt_double(45.0), "45.0");
    }

    #[test]
    fn test_fmt_double_nonfinite() {
        assert_eq!(fmt_double(f64::INFINITY), "+inf");
        assert_eq!(fmt_double(f64::NEG_INFINITY), "-inf");
        assert_eq!(fmt_double(f64::NAN), "+nan");
    }

    #[test]
    fn test_fmt_double_ten_significant_digits() {
        assert_eq!(fmt_double(1.0 / 3.0), "0.3333333333");
        assert_eq!(fmt_double(1e30), "1e30");
    }

    #[test]
    fn test_long_to_str_bases() {
        assert_eq!(long_to_str(255, 16), "FF");
        assert_eq!(long_to_str(-5, 2), "-101");
        assert_eq!(long_to_str(0, 8), "0");
        assert_eq!(long_to_str(35, 36), "Z");
    }

    #[test]
    fn test_atom_rendering() {
        let mut interp = Interp::new().unwrap();
        let n = interp.mk_integer(-7);
        assert_eq!(interp.atom_to_bytes(n, 0), b"-7");
        let r = interp.mk_real(3.0);
        assert_eq!(interp.atom_to_bytes(r, 0), b"3.0");
        let c = interp.mk_character('a' as u32);
        assert_eq!(interp.atom_to_bytes(c, 1), b"#\\a");
        assert_eq!(interp.atom_to_bytes(c, 0), b"a");
        let nl = interp.mk_character('\n' as u32);
        assert_eq!(interp.atom_to_bytes(nl, 1), b"#\\newline");
        let sym = interp.mk_symbol("abc");
        assert_eq!(interp.atom_to_bytes(sym, 1), b"abc");
        assert_eq!(interp.atom_to_bytes(Ptr::NIL, 1), b"()");
        assert_eq!(interp.atom_to_bytes(Ptr::T, 1), b"#t");
    }

    #[test]
    fn test_string_write_mode_escapes() {
        let mut interp = Interp::new().unwrap();
        interp.set_output_string();
        let s = interp.mk_string("a\"b\\c\nd");
        interp.printatom(s, true);
        assert_eq!(interp.output_string(), "\"a\\\"b\\\\c\\nd\"");
    }

    #[test]
    fn test_string_display_mode_raw() {
        let mut interp = Interp::new().unwrap();
        interp.set_output_string();
        let s = interp.mk_string("plain text");
        interp.printatom(s, false);
        assert_eq!(interp.output_string(), "plain text");
    }

    #[test]
    fn test_integer_in_base() {
        let mut interp = Interp::new().unwrap();
        let n = interp.mk_integer(255);
        assert_eq!(interp.atom_to_bytes(n, 16), b"FF");
        assert_eq!(interp.atom_to_bytes(n, 2), b"11111111");
    }
}
