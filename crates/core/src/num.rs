//! Numeric tower: 64-bit fixnums and IEEE doubles
//!
//! Operations preserve fixnum-ness only when both operands are fixnums and
//! the operation is exact; `/` promotes to a real unless the division is
//! exact. `remainder` takes the sign of the dividend, `modulo` the sign of
//! the divisor. Callers guard the zero-divisor cases.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Real(f64),
}

impl Num {
    pub const ZERO: Num = Num::Int(0);
    pub const ONE: Num = Num::Int(1);

    pub fn is_int(self) -> bool {
        matches!(self, Num::Int(_))
    }

    pub fn ivalue(self) -> i64 {
        match self {
            Num::Int(i) => i,
            Num::Real(r) => r as i64,
        }
    }

    pub fn rvalue(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Real(r) => r,
        }
    }

    pub fn add(a: Num, b: Num) -> Num {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_add(y)),
            _ => Num::Real(a.rvalue() + b.rvalue()),
        }
    }

    pub fn sub(a: Num, b: Num) -> Num {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_sub(y)),
            _ => Num::Real(a.rvalue() - b.rvalue()),
        }
    }

    pub fn mul(a: Num, b: Num) -> Num {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_mul(y)),
            _ => Num::Real(a.rvalue() * b.rvalue()),
        }
    }

    /// `/` stays exact only when both operands are fixnums and the division
    /// leaves no remainder.
    pub fn div(a: Num, b: Num) -> Num {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) if y != 0 && x % y == 0 => Num::Int(x / y),
            _ => Num::Real(a.rvalue() / b.rvalue()),
        }
    }

    /// Truncating integer division. Zero divisor is the caller's problem.
    pub fn intdiv(a: Num, b: Num) -> Num {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_div(y)),
            _ => Num::Real((a.rvalue() / b.rvalue()).trunc()),
        }
    }

    /// Remainder with the sign of the dividend.
    pub fn rem(a: Num, b: Num) -> Num {
        let exact = a.is_int() && b.is_int();
        let e1 = a.ivalue();
        let e2 = b.ivalue();
        let mut res = e1 % e2;
        if res > 0 {
            if e1 < 0 {
                res -= e2.abs();
            }
        } else if res < 0 && e1 > 0 {
            res += e2.abs();
        }
        if exact {
            Num::Int(res)
        } else {
            Num::Real(res as f64)
        }
    }

    /// Modulo with the sign of the divisor.
    pub fn modulo(a: Num, b: Num) -> Num {
        let exact = a.is_int() && b.is_int();
        let e1 = a.ivalue();
        let e2 = b.ivalue();
        let mut res = e1 % e2;
        if (res < 0) != (e2 < 0) && res != 0 {
            res += e2;
        }
        if exact {
            Num::Int(res)
        } else {
            Num::Real(res as f64)
        }
    }

    pub fn num_eq(a: Num, b: Num) -> bool {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => a.rvalue() == b.rvalue(),
        }
    }

    pub fn gt(a: Num, b: Num) -> bool {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) => x > y,
            _ => a.rvalue() > b.rvalue(),
        }
    }

    pub fn lt(a: Num, b: Num) -> bool {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) => x < y,
            _ => a.rvalue() < b.rvalue(),
        }
    }

    pub fn ge(a: Num, b: Num) -> bool {
        !Num::lt(a, b)
    }

    pub fn le(a: Num, b: Num) -> bool {
        !Num::gt(a, b)
    }
}

/// Round to nearest, ties to even.
pub fn round_per_r5rs(x: f64) -> f64 {
    let fl = x.floor();
    let ce = x.ceil();
    let dfl = x - fl;
    let dce = ce - x;
    if dfl > dce {
        ce
    } else if dfl < dce {
        fl
    } else if (fl % 2.0) == 0.0 {
        fl
    } else {
        ce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_preserves_fixnum() {
        assert_eq!(Num::add(Num::Int(1), Num::Int(2)), Num::Int(3));
        assert_eq!(Num::add(Num::Int(1), Num::Real(2.0)), Num::Real(3.0));
    }

    #[test]
    fn test_div_promotes_unless_exact() {
        assert_eq!(Num::div(Num::Int(6), Num::Int(3)), Num::Int(2));
        assert_eq!(Num::div(Num::Int(7), Num::Int(2)), Num::Real(3.5));
        assert_eq!(Num::div(Num::Int(1), Num::Real(2.0)), Num::Real(0.5));
    }

    #[test]
    fn test_remainder_sign_of_dividend() {
        assert_eq!(Num::rem(Num::Int(7), Num::Int(-3)), Num::Int(1));
        assert_eq!(Num::rem(Num::Int(-7), Num::Int(3)), Num::Int(-1));
        assert_eq!(Num::rem(Num::Int(-7), Num::Int(-3)), Num::Int(-1));
        assert_eq!(Num::rem(Num::Int(6), Num::Int(3)), Num::Int(0));
    }

    #[test]
    fn test_modulo_sign_of_divisor() {
        assert_eq!(Num::modulo(Num::Int(7), Num::Int(-3)), Num::Int(-2));
        assert_eq!(Num::modulo(Num::Int(-7), Num::Int(3)), Num::Int(2));
        assert_eq!(Num::modulo(Num::Int(-7), Num::Int(-3)), Num::Int(-1));
        assert_eq!(Num::modulo(Num::Int(6), Num::Int(3)), Num::Int(0));
    }

    #[test]
    fn test_quotient_remainder_identity() {
        for &(a, b) in &[(7, -3), (-7, 3), (7, 3), (-7, -3), (13, 4)] {
            let q = Num::intdiv(Num::Int(a), Num::Int(b)).ivalue();
            let r = Num::rem(Num::Int(a), Num::Int(b)).ivalue();
            assert_eq!(a, q * b + r, "identity failed for {}/{}", a, b);
        }
    }

    #[test]
    fn test_round_ties_to_even() {
        assert_eq!(round_per_r5rs(0.5), 0.0);
        assert_eq!(round_per_r5rs(1.5), 2.0);
        assert_eq!(round_per_r5rs(2.5), 2.0);
        assert_eq!(round_per_r5rs(-0.5), 0.0);
        assert_eq!(round_per_r5rs(2.4), 2.0);
        assert_eq!(round_per_r5rs(2.6), 3.0);
    }
}
