//! Integer constant expressions
//!
//! Used for array lengths, bit-field widths, enumerator values and `#define`
//! bodies. Arithmetic is on `i64` with wrapping semantics.

use super::lexer::TokenKind;
use super::Parser;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Or,
    Xor,
    And,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

fn binary_op(punct: &str) -> Option<(BinOp, u8)> {
    let op = match punct {
        "|" => (BinOp::Or, 1),
        "^" => (BinOp::Xor, 2),
        "&" => (BinOp::And, 3),
        "<<" => (BinOp::Shl, 4),
        ">>" => (BinOp::Shr, 4),
        "+" => (BinOp::Add, 5),
        "-" => (BinOp::Sub, 5),
        "*" => (BinOp::Mul, 6),
        "/" => (BinOp::Div, 6),
        "%" => (BinOp::Rem, 6),
        _ => return None,
    };
    Some(op)
}

fn apply(op: BinOp, lhs: i64, rhs: i64) -> std::result::Result<i64, &'static str> {
    let shift = |rhs: i64| {
        u32::try_from(rhs)
            .ok()
            .filter(|s| *s < 64)
            .ok_or("shift count out of range")
    };
    Ok(match op {
        BinOp::Or => lhs | rhs,
        BinOp::Xor => lhs ^ rhs,
        BinOp::And => lhs & rhs,
        BinOp::Shl => lhs.wrapping_shl(shift(rhs)?),
        BinOp::Shr => lhs.wrapping_shr(shift(rhs)?),
        BinOp::Add => lhs.wrapping_add(rhs),
        BinOp::Sub => lhs.wrapping_sub(rhs),
        BinOp::Mul => lhs.wrapping_mul(rhs),
        BinOp::Div => lhs.checked_div(rhs).ok_or("division by zero")?,
        BinOp::Rem => lhs.checked_rem(rhs).ok_or("division by zero")?,
    })
}

impl Parser<'_> {
    pub(super) fn const_expr(&mut self) -> Result<i64> {
        self.binary(0)
    }

    fn binary(&mut self, min_prec: u8) -> Result<i64> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.peek_punct().and_then(binary_op) {
            if prec < min_prec {
                break;
            }
            let token = self.advance();
            let rhs = self.binary(prec + 1)?;
            lhs = apply(op, lhs, rhs).map_err(|msg| self.syntax_at(&token, msg))?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64> {
        let token = self.advance();
        match &token.kind {
            TokenKind::Int(v) => Ok(*v),
            TokenKind::Punct("+") => self.unary(),
            TokenKind::Punct("-") => Ok(self.unary()?.wrapping_neg()),
            TokenKind::Punct("~") => Ok(!self.unary()?),
            TokenKind::Punct("!") => Ok((self.unary()? == 0) as i64),
            TokenKind::Punct("(") => {
                let v = self.const_expr()?;
                self.expect(")")?;
                Ok(v)
            }
            TokenKind::Ident(name) if name == "sizeof" => {
                self.expect("(")?;
                let ty = self.type_name()?;
                self.expect(")")?;
                Ok(ty.size()? as i64)
            }
            TokenKind::Ident(name) => self
                .lookup_constant(name)
                .ok_or_else(|| self.syntax_at(&token, "not an integer constant")),
            _ => Err(self.syntax_at(&token, "expected integer constant expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse_declarations;
    use crate::registry::TypeRegistry;

    fn eval(expr: &str) -> i64 {
        let reg = TypeRegistry::new();
        parse_declarations(&format!("#define X {}\n", expr), &reg).unwrap();
        reg.constant("X").unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3"), 7);
        assert_eq!(eval("(1 + 2) * 3"), 9);
        assert_eq!(eval("1 << 4 | 1"), 17);
        assert_eq!(eval("10 - 4 - 3"), 3);
        assert_eq!(eval("-8 / 2 % 3"), -1);
    }

    #[test]
    fn test_unary_and_sizeof() {
        assert_eq!(eval("~0"), -1);
        assert_eq!(eval("!5"), 0);
        assert_eq!(eval("sizeof(int) * 2"), 2 * std::mem::size_of::<std::ffi::c_int>() as i64);
        assert_eq!(eval("sizeof(char *)"), std::mem::size_of::<usize>() as i64);
    }

    #[test]
    fn test_division_by_zero() {
        let reg = TypeRegistry::new();
        assert!(parse_declarations("#define X (1 / 0)\n", &reg).is_err());
    }
}
