use super::path::{Path, PathElement};
use crate::tf;

/// Error produced when parsing a string into a [Path].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
	#[error("unexpected character {found:?} at offset {offset}")]
	UnexpectedChar { offset: usize, found: char },
	#[error("unexpected end of path, expected {expected}")]
	UnexpectedEnd { expected: &'static str },
	#[error("unbalanced target brackets starting at offset {offset}")]
	UnbalancedTarget { offset: usize },
}

pub(crate) fn parse(text: &str) -> Result<Path, PathError> {
	if text.is_empty() {
		return Ok(Path::empty_path());
	}
	let mut parser = Parser { text, pos: 0 };
	let path = parser.path()?;
	match parser.peek() {
		None => Ok(path),
		Some(found) => Err(PathError::UnexpectedChar {
			offset: parser.pos,
			found,
		}),
	}
}

struct Parser<'a> {
	text: &'a str,
	pos: usize,
}

impl Parser<'_> {
	fn peek(&self) -> Option<char> {
		self.text[self.pos..].chars().next()
	}

	fn eat(&mut self, c: char) -> bool {
		if self.peek() == Some(c) {
			self.pos += c.len_utf8();
			true
		} else {
			false
		}
	}

	fn expect(&mut self, c: char, expected: &'static str) -> Result<(), PathError> {
		match self.peek() {
			Some(found) if found == c => {
				self.pos += c.len_utf8();
				Ok(())
			}
			Some(found) => Err(PathError::UnexpectedChar {
				offset: self.pos,
				found,
			}),
			None => Err(PathError::UnexpectedEnd { expected }),
		}
	}

	fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &str {
		let start = self.pos;
		while let Some(c) = self.peek() {
			if !pred(c) {
				break;
			}
			self.pos += c.len_utf8();
		}
		&self.text[start..self.pos]
	}

	fn identifier(&mut self, expected: &'static str) -> Result<tf::Token, PathError> {
		match self.peek() {
			Some(c) if c.is_alphabetic() || c == '_' => {}
			Some(found) => {
				return Err(PathError::UnexpectedChar {
					offset: self.pos,
					found,
				});
			}
			None => return Err(PathError::UnexpectedEnd { expected }),
		}
		Ok(tf::Token::new(
			self.take_while(|c| c.is_alphanumeric() || c == '_'),
		))
	}

	fn property_name(&mut self) -> Result<tf::Token, PathError> {
		let name = self.identifier("property name")?;
		let mut full = name.as_str().to_string();
		while self.eat(':') {
			full.push(':');
			full.push_str(self.identifier("namespaced property name")?.as_str());
		}
		Ok(tf::Token::new(full))
	}

	fn variant_selection(&mut self) -> Result<PathElement, PathError> {
		let set = self.identifier("variant set name")?;
		self.expect('=', "'='")?;
		let variant = tf::Token::new(
			self.take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '|' | '-')),
		);
		self.expect('}', "'}'")?;
		Ok(PathElement::VariantSelection { set, variant })
	}

	fn target(&mut self) -> Result<Path, PathError> {
		let start = self.pos;
		let mut depth = 1usize;
		for (offset, c) in self.text[start..].char_indices() {
			match c {
				'[' => depth += 1,
				']' => {
					depth -= 1;
					if depth == 0 {
						let inner = &self.text[start..start + offset];
						self.pos = start + offset + 1;
						return parse(inner);
					}
				}
				_ => {}
			}
		}
		Err(PathError::UnbalancedTarget { offset: start })
	}

	fn property_part(&mut self, elements: &mut Vec<PathElement>) -> Result<(), PathError> {
		elements.push(PathElement::Property(self.property_name()?));
		if self.eat('[') {
			elements.push(PathElement::Target(self.target()?));
			if self.eat('.') {
				elements.push(PathElement::RelationalAttribute(self.property_name()?));
			}
		}
		Ok(())
	}

	fn path(&mut self) -> Result<Path, PathError> {
		let absolute = self.eat('/');
		let mut elements = Vec::new();

		if self.peek().is_none() {
			return Ok(Path::from_elements(absolute, elements));
		}

		if !absolute && self.eat('.') {
			self.property_part(&mut elements)?;
			return Ok(Path::from_elements(absolute, elements));
		}

		elements.push(PathElement::Prim(self.identifier("prim name")?));
		loop {
			match self.peek() {
				Some('/') => {
					self.pos += 1;
					elements.push(PathElement::Prim(self.identifier("prim name")?));
				}
				Some('{') => {
					self.pos += 1;
					elements.push(self.variant_selection()?);
					if matches!(self.peek(), Some(c) if c.is_alphabetic() || c == '_') {
						elements.push(PathElement::Prim(self.identifier("prim name")?));
					}
				}
				Some('.') => {
					self.pos += 1;
					self.property_part(&mut elements)?;
					break;
				}
				_ => break,
			}
		}

		Ok(Path::from_elements(absolute, elements))
	}
}
