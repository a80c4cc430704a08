//! Tokenizing assembly source lines.
//!
//! The lexer only splits a line into coarse tokens; the payload of a
//! bracketed `<...>` operand is handed to the target grammar in
//! [`crate::target`] untouched.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    /// A mnemonic.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lx| lx.slice().to_string())]
    Ident(String),

    /// A width suffix such as `.64bit`.
    #[regex(r"\.[0-9]+bit", |lx| lx.slice()[1..].to_string())]
    WidthSuffix(String),

    /// A data directive such as `.org` or `.byte`.
    #[regex(r"\.[A-Za-z_][A-Za-z0-9_]*", |lx| lx.slice()[1..].to_string())]
    Directive(String),

    /// An angle-bracketed operand. The payload is everything between the
    /// brackets, still unparsed.
    #[regex(r"<[^>\n]*>", |lx| {
        let s = lx.slice();
        s[1..s.len() - 1].to_string()
    })]
    Target(String),

    /// A bare integer, used by directive arguments.
    #[regex(r"0[xX][0-9A-Fa-f]+|[0-9]+", lex_number)]
    Number(u64),

    #[token(",")]
    Comma,
}

fn lex_number(lx: &mut logos::Lexer<Token>) -> Option<u64> {
    let s = lx.slice();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Lex one source line. `None` marks an unrecognized token.
pub fn lex_line(line: &str) -> Result<Vec<Token>, ()> {
    Token::lexer(line).collect::<Result<Vec<_>, _>>().map_err(|_| ())
}
