// src/envd/parser.rs

//! Parser for shell-style `KEY=value` fragments
//!
//! Handles the subset of sh syntax env.d files use: comments, an optional
//! `export` prefix, single and double quotes, backslash escapes, line
//! continuations and `$VAR` / `${VAR}` expansion against earlier keys of the
//! same file. Unknown variables expand to the empty string; the process
//! environment is never consulted.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Parse a fragment file into its assignments
pub fn read_bash_dict(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)?;
    parse_bash_dict(&text, &path.display().to_string())
}

/// Parse fragment text; `source` names it in error messages
pub fn parse_bash_dict(text: &str, source: &str) -> Result<BTreeMap<String, String>> {
    let mut lexer = Lexer {
        chars: text.chars().collect(),
        pos: 0,
        line: 1,
        source,
    };
    let mut vars = BTreeMap::new();

    loop {
        lexer.skip_blank(true);
        let Some(c) = lexer.peek() else { break };
        if c == '#' {
            lexer.skip_comment();
            continue;
        }

        let mut key = lexer.read_name();
        if key == "export" && lexer.peek().is_some_and(|c| c == ' ' || c == '\t') {
            lexer.skip_blank(false);
            key = lexer.read_name();
        }
        if key.is_empty() {
            return Err(lexer.error(format!("unexpected character {:?}", c)));
        }
        if lexer.peek() != Some('=') {
            return Err(lexer.error(format!("expected '=' after {}", key)));
        }
        lexer.bump();

        let value = lexer.read_value(&vars)?;
        vars.insert(key, value);

        lexer.skip_blank(false);
        match lexer.peek() {
            None | Some('\n') => {}
            Some('#') => lexer.skip_comment(),
            // Another assignment on the same line
            Some(_) => {}
        }
    }

    Ok(vars)
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    source: &'a str,
}

impl Lexer<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: String) -> Error {
        Error::Config(format!("{}:{}: {}", self.source, self.line, message))
    }

    fn skip_blank(&mut self, newlines: bool) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {}
                '\n' if newlines => {}
                '\\' if self.chars.get(self.pos + 1) == Some(&'\n') => {
                    self.bump();
                }
                _ => break,
            }
            self.bump();
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn read_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            let valid = if name.is_empty() {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !valid {
                break;
            }
            name.push(c);
            self.bump();
        }
        name
    }

    fn read_value(&mut self, vars: &BTreeMap<String, String>) -> Result<String> {
        let mut value = String::new();
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => break,
                '\'' => {
                    self.bump();
                    self.read_single_quoted(&mut value)?;
                }
                '"' => {
                    self.bump();
                    self.read_double_quoted(&mut value, vars)?;
                }
                '\\' => {
                    self.bump();
                    match self.bump() {
                        Some('\n') | None => {}
                        Some(escaped) => value.push(escaped),
                    }
                }
                '$' => {
                    self.bump();
                    self.expand(&mut value, vars)?;
                }
                _ => {
                    value.push(c);
                    self.bump();
                }
            }
        }
        Ok(value)
    }

    fn read_single_quoted(&mut self, value: &mut String) -> Result<()> {
        loop {
            match self.bump() {
                Some('\'') => return Ok(()),
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated single quote".to_string())),
            }
        }
    }

    fn read_double_quoted(&mut self, value: &mut String, vars: &BTreeMap<String, String>) -> Result<()> {
        loop {
            match self.bump() {
                Some('"') => return Ok(()),
                Some('\\') => match self.bump() {
                    Some('\n') => {}
                    Some(c @ ('"' | '\\' | '$' | '`')) => value.push(c),
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => return Err(self.error("unterminated double quote".to_string())),
                },
                Some('$') => self.expand(value, vars)?,
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated double quote".to_string())),
            }
        }
    }

    /// Expand after a consumed `$`
    fn expand(&mut self, value: &mut String, vars: &BTreeMap<String, String>) -> Result<()> {
        let name = if self.peek() == Some('{') {
            self.bump();
            let name = self.read_name();
            if self.bump() != Some('}') {
                return Err(self.error("unterminated ${ expansion".to_string()));
            }
            name
        } else {
            let name = self.read_name();
            if name.is_empty() {
                value.push('$');
                return Ok(());
            }
            name
        };

        if let Some(expanded) = vars.get(&name) {
            value.push_str(expanded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> BTreeMap<String, String> {
        parse_bash_dict(text, "test").unwrap()
    }

    #[test]
    fn test_plain_and_quoted_values() {
        let vars = parse(
            "# comment\nPATH=/usr/bin\nexport MANPATH=\"/usr/share/man\"\nROOTPATH='/sbin:$X'\n\nEMPTY=\n",
        );
        assert_eq!(vars["PATH"], "/usr/bin");
        assert_eq!(vars["MANPATH"], "/usr/share/man");
        assert_eq!(vars["ROOTPATH"], "/sbin:$X");
        assert_eq!(vars["EMPTY"], "");
    }

    #[test]
    fn test_expansion_uses_earlier_keys() {
        let vars = parse("BASE=/opt/foo\nLDPATH=\"${BASE}/lib:$BASE/lib64\"\nOTHER=$MISSING/x\nCOST=5$\n");
        assert_eq!(vars["LDPATH"], "/opt/foo/lib:/opt/foo/lib64");
        assert_eq!(vars["OTHER"], "/x");
        assert_eq!(vars["COST"], "5$");
    }

    #[test]
    fn test_multiline_and_escapes() {
        let vars = parse("CONFIG_PROTECT=\"/usr/share/config\n  /etc/foo\" # trailing\nA=x\\ y B=\"q\\\"uote\"\n");
        assert_eq!(vars["CONFIG_PROTECT"], "/usr/share/config\n  /etc/foo");
        assert_eq!(vars["A"], "x y");
        assert_eq!(vars["B"], "q\"uote");
    }

    #[test]
    fn test_malformed_input() {
        assert!(parse_bash_dict("PATH\n", "t").is_err());
        assert!(parse_bash_dict("PATH=\"/usr/bin\n", "t").is_err());
        assert!(parse_bash_dict("=value\n", "t").is_err());
        let err = parse_bash_dict("A=1\nB='x\n", "frag").unwrap_err();
        assert!(err.to_string().contains("frag:"));
    }
}
