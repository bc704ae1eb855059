//! String literal scanning, including escape sequences.

use hulascript_util::error::CompileResult;

use super::core::Lexer;
use crate::cursor::EOF;
use crate::TokenKind;

impl<'a> Lexer<'a> {
    pub(super) fn scan_string_literal(&mut self) -> CompileResult<TokenKind> {
        self.cursor().advance(); // consume opening '"'

        let mut buf = String::new();
        loop {
            if self.cursor().current() == b'"' {
                self.cursor().advance();
                break;
            }
            if self.cursor().current() == EOF {
                return Err(self.error("unexpected end of source in string literal"));
            }
            buf.push(self.scan_literal_char()? as char);
        }
        Ok(TokenKind::StringLiteral(buf))
    }

    /// Scan a single (possibly escaped) character, advancing past it.
    fn scan_literal_char(&mut self) -> CompileResult<u8> {
        if self.cursor().current() == b'\\' {
            self.cursor().advance();
            let c = self.cursor().current();
            return match c {
                b'r' => {
                    self.cursor().advance();
                    Ok(b'\r')
                }
                b'n' => {
                    self.cursor().advance();
                    Ok(b'\n')
                }
                b't' => {
                    self.cursor().advance();
                    Ok(b'\t')
                }
                b'"' => {
                    self.cursor().advance();
                    Ok(b'"')
                }
                b'\'' => {
                    self.cursor().advance();
                    Ok(b'\'')
                }
                b'0' => {
                    self.cursor().advance();
                    Ok(0)
                }
                b'x' => {
                    self.cursor().advance();
                    let mut digits = String::new();
                    while self.cursor().current().is_ascii_hexdigit() {
                        digits.push(self.cursor().current() as char);
                        self.cursor().advance();
                    }
                    let value = u32::from_str_radix(&digits, 16).map_err(|_| {
                        self.error(format!("cannot parse hex escape \"\\x{}\"", digits))
                    })?;
                    if value > u8::MAX as u32 {
                        return Err(self.error(format!(
                            "hex escape \\x{} cannot be more than 256 or less than 0",
                            digits
                        )));
                    }
                    Ok(value as u8)
                }
                _ => Err(self.error(format!("unrecognized escape sequence \\{}", c as char))),
            };
        }
        let c = self.cursor().current();
        self.cursor().advance();
        Ok(c)
    }
}
