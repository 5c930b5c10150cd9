// Copyright © 2015 Sebastian Thiel
// Copyright © 2015 Andy Grover
//
// Permission is hereby granted, free of charge, to any person obtaining
// a copy of this software and associated documentation files (the
// “Software”), to deal in the Software without restriction, including
// without limitation the rights to use, copy, modify, merge, publish,
// distribute, sublicense, and/or sell copies of the Software, and to
// permit persons to whom the Software is furnished to do so, subject to
// the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE
// LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION
// WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! A lexer and parser for LVM2's text metadata format.
//!
//! Given a `&[u8]`, the lexer produces a stream of tokens. `buf_to_textmap`
//! takes those tokens and builds an `LvmTextMap`, a nested key/value
//! structure. `vg::from_textmap` (and friends) then turn that into actual
//! `VG`/`LV`/`PV` values.

use std::collections::BTreeMap;
use std::io;
use std::io::ErrorKind::Other;

#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    CurlyOpen,
    CurlyClose,
    BracketOpen,
    BracketClose,
    Equals,
    Comma,
    String(&'a [u8]),
    Ident(&'a [u8]),
    Number(i64),
    Comment(&'a [u8]),
    /// The type of the token could not be identified.
    Invalid(u8),
}

pub struct Lexer<'a> {
    chars: &'a [u8],
    next_byte: Option<u8>,
    cursor: usize,
    next_is_ident: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(chars: &'a [u8]) -> Lexer<'a> {
        Lexer {
            chars,
            next_byte: None,
            cursor: 0,
            next_is_ident: false,
        }
    }

    fn put_back(&mut self, c: u8) {
        debug_assert!(self.next_byte.is_none());
        self.next_byte = Some(c);
        self.cursor -= 1;
    }

    fn next_byte(&mut self) -> Option<u8> {
        match self.next_byte.take() {
            Some(c) => {
                self.cursor += 1;
                Some(c)
            }
            None => {
                if self.cursor >= self.chars.len() {
                    None
                } else {
                    let res = self.chars[self.cursor];
                    self.cursor += 1;
                    Some(res)
                }
            }
        }
    }
}

enum Mode {
    Main,
    // tells position where these modes were started
    String(usize),
    Ident(usize),
    Number(usize),
    Comment(usize),
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let mut state = Mode::Main;

        while let Some(c) = self.next_byte() {
            match state {
                Mode::Main => match c {
                    b'{' => {
                        self.next_is_ident = true;
                        return Some(Token::CurlyOpen);
                    }
                    b'}' => return Some(Token::CurlyClose),
                    b'"' => state = Mode::String(self.cursor - 1),
                    b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'.' => {
                        state = Mode::Ident(self.cursor - 1)
                    }
                    b'0'..=b'9' | b'-' => {
                        if self.next_is_ident {
                            state = Mode::Ident(self.cursor - 1);
                        } else {
                            state = Mode::Number(self.cursor - 1);
                        }
                    }
                    b'#' => state = Mode::Comment(self.cursor - 1),
                    b'[' => return Some(Token::BracketOpen),
                    b']' => return Some(Token::BracketClose),
                    b'=' => return Some(Token::Equals),
                    b',' => return Some(Token::Comma),
                    b' ' | b'\n' | b'\t' | b'\0' => {
                        // ignore whitespace
                    }
                    _ => return Some(Token::Invalid(c)),
                },
                Mode::String(first) => match c {
                    b'"' => return Some(Token::String(&self.chars[first + 1..self.cursor - 1])),
                    _ => continue,
                },
                Mode::Ident(first) => match c {
                    b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'.' | b'-' => continue,
                    _ => {
                        self.put_back(c);
                        self.next_is_ident = false;
                        return Some(Token::Ident(&self.chars[first..self.cursor]));
                    }
                },
                Mode::Number(first) => match c {
                    b'0'..=b'9' => continue,
                    _ => {
                        self.put_back(c);
                        let s = String::from_utf8_lossy(&self.chars[first..self.cursor]);
                        return Some(Token::Number(s.parse().unwrap()));
                    }
                },
                Mode::Comment(first) => match c {
                    b'\n' => {
                        self.put_back(c);
                        return Some(Token::Comment(&self.chars[first..self.cursor]));
                    }
                    _ => continue,
                },
            }
        }

        None
    }
}

pub type LvmTextMap = BTreeMap<String, Entry>;

#[derive(Debug, PartialEq, Clone)]
pub enum Entry {
    Number(i64),
    String(String),
    TextMap(Box<LvmTextMap>),
    List(Vec<Entry>),
}

pub trait TextMapOps {
    fn i64_from_textmap(&self, name: &str) -> Option<i64>;
    fn string_from_textmap(&self, name: &str) -> Option<&str>;
    fn textmap_from_textmap(&self, name: &str) -> Option<&LvmTextMap>;
    fn list_from_textmap(&self, name: &str) -> Option<&Vec<Entry>>;
}

impl TextMapOps for LvmTextMap {
    fn i64_from_textmap(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Entry::Number(x)) => Some(*x),
            _ => None,
        }
    }
    fn string_from_textmap(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Entry::String(x)) => Some(x),
            _ => None,
        }
    }
    fn textmap_from_textmap(&self, name: &str) -> Option<&LvmTextMap> {
        match self.get(name) {
            Some(Entry::TextMap(x)) => Some(x),
            _ => None,
        }
    }
    fn list_from_textmap(&self, name: &str) -> Option<&Vec<Entry>> {
        match self.get(name) {
            Some(Entry::List(x)) => Some(x),
            _ => None,
        }
    }
}

fn find_matching_token<'a, 'b>(
    tokens: &'b [Token<'a>],
    begin: &Token<'a>,
    end: &Token<'a>,
) -> io::Result<&'b [Token<'a>]> {
    let mut brace_count = 0;

    for (i, x) in tokens.iter().enumerate() {
        if x == begin {
            brace_count += 1;
        } else if x == end {
            brace_count -= 1;
            if brace_count == 0 {
                return Ok(&tokens[..i + 1]);
            }
        }
    }
    Err(io::Error::new(Other, "token mismatch"))
}

// lists can only contain strings and numbers
pub fn get_list(tokens: &[Token]) -> io::Result<Vec<Entry>> {
    let mut v = Vec::new();

    assert_eq!(*tokens.first().unwrap(), Token::BracketOpen);
    assert_eq!(*tokens.last().unwrap(), Token::BracketClose);

    for tok in &tokens[1..tokens.len() - 1] {
        match *tok {
            Token::Number(x) => v.push(Entry::Number(x)),
            Token::String(x) => v.push(Entry::String(String::from_utf8_lossy(x).into_owned())),
            Token::Comma => {}
            _ => return Err(io::Error::new(Other, format!("Unexpected {:?}", *tok))),
        }
    }

    Ok(v)
}

fn get_textmap(tokens: &[Token]) -> io::Result<LvmTextMap> {
    let mut ret: LvmTextMap = BTreeMap::new();

    assert_eq!(*tokens.first().unwrap(), Token::CurlyOpen);
    assert_eq!(*tokens.last().unwrap(), Token::CurlyClose);

    let mut cur = 1;

    while tokens[cur] != Token::CurlyClose {
        let ident = match tokens[cur] {
            Token::Ident(x) => String::from_utf8_lossy(x).into_owned(),
            Token::Comment(_) => {
                cur += 1;
                continue;
            }
            _ => {
                return Err(io::Error::new(
                    Other,
                    format!("Unexpected {:?} when seeking ident", tokens[cur]),
                ))
            }
        };

        cur += 1;
        match tokens[cur] {
            Token::Equals => {
                cur += 1;
                match tokens[cur] {
                    Token::Number(x) => {
                        cur += 1;
                        ret.insert(ident, Entry::Number(x));
                    }
                    Token::String(x) => {
                        cur += 1;
                        ret.insert(ident, Entry::String(String::from_utf8_lossy(x).into_owned()));
                    }
                    Token::BracketOpen => {
                        let slc = find_matching_token(
                            &tokens[cur..],
                            &Token::BracketOpen,
                            &Token::BracketClose,
                        )?;
                        ret.insert(ident, Entry::List(get_list(slc)?));
                        cur += slc.len();
                    }
                    _ => {
                        return Err(io::Error::new(
                            Other,
                            format!("Unexpected {:?} as rvalue", tokens[cur]),
                        ))
                    }
                }
            }
            Token::CurlyOpen => {
                let slc = find_matching_token(
                    &tokens[cur..],
                    &Token::CurlyOpen,
                    &Token::CurlyClose,
                )?;
                ret.insert(ident, Entry::TextMap(Box::new(get_textmap(slc)?)));
                cur += slc.len();
            }
            _ => {
                return Err(io::Error::new(
                    Other,
                    format!("Unexpected {:?} after an ident", tokens[cur]),
                ))
            }
        };
    }

    Ok(ret)
}

pub fn buf_to_textmap(buf: &[u8]) -> io::Result<LvmTextMap> {
    let mut tokens: Vec<Token> = Vec::new();

    // LVM vsn1 is implicitly a map at the top level, so add
    // the appropriate tokens.
    tokens.push(Token::CurlyOpen);
    tokens.extend(Lexer::new(buf));
    tokens.push(Token::CurlyClose);

    get_textmap(&tokens)
}

/// status may be either a single string or a list of strings
pub fn status_from_textmap(map: &LvmTextMap) -> io::Result<Vec<String>> {
    match map.get("status") {
        Some(Entry::String(x)) => Ok(vec![x.clone()]),
        Some(Entry::List(x)) => Ok(x
            .iter()
            .filter_map(|item| match item {
                Entry::String(x) => Some(x.clone()),
                _ => None,
            })
            .collect()),
        _ => Err(io::Error::new(Other, "status textmap parsing error")),
    }
}

pub fn flags_from_textmap(map: &LvmTextMap) -> io::Result<Vec<String>> {
    Ok(map
        .list_from_textmap("flags")
        .ok_or_else(|| io::Error::new(Other, "flags textmap parsing error"))?
        .iter()
        .filter_map(|item| match item {
            Entry::String(x) => Some(x.clone()),
            _ => None,
        })
        .collect())
}

pub fn textmap_to_buf(tm: &LvmTextMap) -> Vec<u8> {
    let mut vec = Vec::new();

    for (k, v) in tm {
        match v {
            Entry::String(x) => {
                vec.extend(k.as_bytes());
                vec.extend(b" = \"");
                vec.extend(x.as_bytes());
                vec.extend(b"\"\n");
            }
            Entry::Number(x) => {
                vec.extend(k.as_bytes());
                vec.extend(b" = ");
                vec.extend(format!("{}\n", x).as_bytes());
            }
            Entry::List(x) => {
                vec.extend(k.as_bytes());
                vec.extend(b" = [");
                let parts: Vec<_> = x
                    .iter()
                    .map(|x| match x {
                        Entry::String(x) => format!("\"{}\"", x),
                        Entry::Number(x) => format!("{}", x),
                        _ => panic!("should not be in lists"),
                    })
                    .collect();
                vec.extend(parts.join(", ").as_bytes());
                vec.extend(b"]\n");
            }
            Entry::TextMap(x) => {
                vec.extend(k.as_bytes());
                vec.extend(b" {\n");
                vec.extend(textmap_to_buf(x));
                vec.extend(b"}\n");
            }
        };
    }

    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_simple_map() {
        let buf = br#"foo = 1
bar = "hi"
baz = [1, "two"]
nested {
    inner = 2
}
"#;
        let map = buf_to_textmap(buf).unwrap();
        assert_eq!(map.i64_from_textmap("foo"), Some(1));
        assert_eq!(map.string_from_textmap("bar"), Some("hi"));
        assert_eq!(map.list_from_textmap("baz").unwrap().len(), 2);
        assert_eq!(
            map.textmap_from_textmap("nested")
                .unwrap()
                .i64_from_textmap("inner"),
            Some(2)
        );
    }

    #[test]
    fn round_trips_through_buf() {
        let buf = b"id = \"abc\"\nseqno = 3\n";
        let map = buf_to_textmap(buf).unwrap();
        let out = textmap_to_buf(&map);
        let map2 = buf_to_textmap(&out).unwrap();
        assert_eq!(map, map2);
    }

    #[test]
    fn ignores_comments() {
        let buf = b"# a comment\nfoo = 1\n";
        let map = buf_to_textmap(buf).unwrap();
        assert_eq!(map.i64_from_textmap("foo"), Some(1));
    }
}
