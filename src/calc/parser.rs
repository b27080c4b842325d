//! Recursive-descent evaluation over the token stream.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('+' | '-') unary | primary
//! primary := NUMBER | FUNCTION '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use super::lexer::{Token, TokenKind};
use super::{CalcError, MAX_DEPTH};

pub(crate) struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Evaluate the whole token stream as one expression.
    pub(crate) fn evaluate(mut self) -> Result<f64, CalcError> {
        if self.tokens.is_empty() {
            return Err(CalcError::Empty);
        }
        let value = self.expr()?;
        match self.peek() {
            None => Ok(value),
            Some(token) => Err(unexpected(token)),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), CalcError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(unexpected(token)),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        loop {
            match self.peek().map(|t| t.kind) {
                Some(TokenKind::Plus) => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(TokenKind::Minus) => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        loop {
            match self.peek().map(|t| t.kind) {
                Some(TokenKind::Star) => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some(TokenKind::Slash) => {
                    self.pos += 1;
                    value /= self.unary()?;
                }
                Some(TokenKind::Percent) => {
                    self.pos += 1;
                    value %= self.unary()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek().map(|t| t.kind) {
            Some(TokenKind::Minus) => {
                self.pos += 1;
                self.descend()?;
                let value = -self.unary()?;
                self.ascend();
                Ok(value)
            }
            Some(TokenKind::Plus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary()?;
                self.ascend();
                Ok(value)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, CalcError> {
        let token = self.next().ok_or(CalcError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Number(value) => Ok(value),
            TokenKind::LParen => {
                self.descend()?;
                let value = self.expr()?;
                self.expect(TokenKind::RParen)?;
                self.ascend();
                Ok(value)
            }
            TokenKind::Function(function) => {
                self.descend()?;
                self.expect(TokenKind::LParen)?;
                let mut args = vec![self.expr()?];
                while self.peek().map(|t| t.kind) == Some(TokenKind::Comma) {
                    self.pos += 1;
                    args.push(self.expr()?);
                }
                self.expect(TokenKind::RParen)?;
                self.ascend();
                function.apply(&args)
            }
            _ => Err(unexpected(token)),
        }
    }
}

fn unexpected(token: &Token) -> CalcError {
    let found = match token.kind {
        TokenKind::Number(value) => value.to_string(),
        TokenKind::Function(function) => function.name().to_string(),
        TokenKind::Plus => "+".to_string(),
        TokenKind::Minus => "-".to_string(),
        TokenKind::Star => "*".to_string(),
        TokenKind::Slash => "/".to_string(),
        TokenKind::Percent => "%".to_string(),
        TokenKind::LParen => "(".to_string(),
        TokenKind::RParen => ")".to_string(),
        TokenKind::Comma => ",".to_string(),
    };
    CalcError::UnexpectedToken {
        found,
        pos: token.pos,
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval(source: &str) -> Result<f64, CalcError> {
        Parser::new(&tokenize(source)?).evaluate()
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(eval("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(eval("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(eval("100 / 10 / 5").unwrap(), 2.0);
        assert_eq!(eval("7 % 4 * 2").unwrap(), 6.0);
        assert_eq!(eval("-7 % 4").unwrap(), -3.0);
    }

    #[test]
    fn test_unary_operators() {
        assert_eq!(eval("-3").unwrap(), -3.0);
        assert_eq!(eval("--3").unwrap(), 3.0);
        assert_eq!(eval("2 * -(1 + 1)").unwrap(), -4.0);
        assert_eq!(eval("+5").unwrap(), 5.0);
    }

    #[test]
    fn test_structural_errors() {
        assert_eq!(eval("").unwrap_err(), CalcError::Empty);
        assert_eq!(eval("1 +").unwrap_err(), CalcError::UnexpectedEnd);
        assert_eq!(eval("(1 + 2").unwrap_err(), CalcError::UnexpectedEnd);
        assert_eq!(
            eval("1 + 2)").unwrap_err(),
            CalcError::UnexpectedToken {
                found: ")".to_string(),
                pos: 5
            }
        );
        assert_eq!(
            eval("1 2").unwrap_err(),
            CalcError::UnexpectedToken {
                found: "2".to_string(),
                pos: 2
            }
        );
        assert!(matches!(
            eval("round 2").unwrap_err(),
            CalcError::UnexpectedToken { .. }
        ));
        assert!(matches!(
            eval("max()").unwrap_err(),
            CalcError::UnexpectedToken { .. }
        ));
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(
            eval(&deep).unwrap_err(),
            CalcError::TooDeep { max: MAX_DEPTH }
        );

        let ok = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(eval(&ok).unwrap(), 1.0);

        let minus = format!("{}1", "-".repeat(MAX_DEPTH + 1));
        assert_eq!(
            eval(&minus).unwrap_err(),
            CalcError::TooDeep { max: MAX_DEPTH }
        );
    }
}
