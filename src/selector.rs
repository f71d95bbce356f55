//! Compound CSS selectors: `tag`, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`,
//! combined without whitespace and separated by commas. Combinators are rejected.

use std::str::FromStr;

use crate::dom::Element;
use crate::error::ConfigError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectorList(Vec<Compound>);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    value: Option<String>,
}

impl SelectorList {
    /// Parses every selector and concatenates them into one list.
    pub fn parse_all<I, S>(selectors: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        for s in selectors {
            out.extend(s.as_ref().parse::<SelectorList>()?.0);
        }
        Ok(Self(out))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, el: &Element) -> bool {
        self.0.iter().any(|c| c.matches(el))
    }
}

impl Compound {
    fn matches(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if !el.name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if el.attribute("id") != Some(id.as_str()) {
                return false;
            }
        }
        self.classes.iter().all(|c| el.has_class(c))
            && self.attrs.iter().all(|a| match (&a.value, el.attribute(&a.name)) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(want), Some(have)) => want == have,
            })
    }
}

impl FromStr for SelectorList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser { chars: s.chars().collect(), pos: 0 }
            .list()
            .map(Self)
            .map_err(|reason| ConfigError::InvalidSelector { selector: s.to_string(), reason })
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn list(&mut self) -> Result<Vec<Compound>, String> {
        let mut list = Vec::new();
        loop {
            self.skip_ws();
            list.push(self.compound()?);
            self.skip_ws();
            match self.peek() {
                None => return Ok(list),
                Some(',') => self.pos += 1,
                Some(c) => return Err(format!("unsupported combinator or character '{c}'")),
            }
        }
    }

    fn compound(&mut self) -> Result<Compound, String> {
        let start = self.pos;
        let mut c = Compound::default();
        match self.peek() {
            Some('*') => self.pos += 1,
            Some(ch) if is_ident(ch) => c.tag = Some(self.ident()?.to_ascii_lowercase()),
            _ => {}
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    c.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    c.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    c.attrs.push(self.attr()?);
                }
                _ => break,
            }
        }
        if self.pos == start {
            return Err("expected a selector".into());
        }
        Ok(c)
    }

    fn ident(&mut self) -> Result<String, String> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err("expected an identifier".into());
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn attr(&mut self) -> Result<AttrMatch, String> {
        self.skip_ws();
        let name = self.ident()?;
        self.skip_ws();
        let value = match self.peek() {
            Some(']') => None,
            Some('=') => {
                self.pos += 1;
                self.skip_ws();
                Some(self.attr_value()?)
            }
            _ => return Err(format!("unsupported attribute matcher in [{name}")),
        };
        self.skip_ws();
        if self.peek() != Some(']') {
            return Err("unterminated attribute selector".into());
        }
        self.pos += 1;
        Ok(AttrMatch { name, value })
    }

    fn attr_value(&mut self) -> Result<String, String> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err("unterminated string".into());
                }
                let value = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(value)
            }
            _ => self.ident(),
        }
    }
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}
