//! A minimal element tree built from quick-xml events.
//!
//! The reference documents are small and only ever navigated by element
//! name, so they are read into memory whole. Namespace prefixes are dropped.

use std::borrow::Cow;

use quick_xml::{
  Reader,
  events::{BytesStart, Event},
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
  pub name:       String,
  pub attributes: Vec<(String, String)>,
  pub text:       String,
  pub children:   Vec<Element>,
}

impl Element {
  /// First direct child called `name`.
  pub fn child(&self, name: &str) -> Option<&Element> {
    self.children.iter().find(|c| c.name == name)
  }

  /// Direct children called `name`, in document order.
  pub fn children_named<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Iterator<Item = &'a Element> + 'a {
    self.children.iter().filter(move |c| c.name == name)
  }

  /// Trimmed text of the first child called `name`; `None` when absent or
  /// blank.
  pub fn child_text(&self, name: &str) -> Option<&str> {
    self
      .child(name)
      .map(|c| c.text.trim())
      .filter(|t| !t.is_empty())
  }

  pub fn attribute(&self, name: &str) -> Option<&str> {
    self
      .attributes
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }

  /// Every element called `name` at any depth below this one, in document
  /// order.
  pub fn descendants_named<'a>(&'a self, name: &'a str) -> Vec<&'a Element> {
    let mut found = Vec::new();
    let mut stack: Vec<&Element> = self.children.iter().rev().collect();
    while let Some(el) = stack.pop() {
      if el.name == name {
        found.push(el);
      }
      stack.extend(el.children.iter().rev());
    }
    found
  }
}

/// Parse a whole document and return its root element.
pub fn parse_document(xml: &[u8]) -> Result<Element> {
  let mut reader = Reader::from_reader(xml);
  reader.config_mut().trim_text(true);

  let mut stack: Vec<Element> = Vec::new();
  let mut root: Option<Element> = None;
  let mut buf = Vec::new();

  loop {
    match reader.read_event_into(&mut buf)? {
      Event::Start(ref e) => stack.push(open(e)?),
      Event::Empty(ref e) => {
        let el = open(e)?;
        attach(&mut stack, &mut root, el);
      }
      Event::Text(ref e) => {
        if let Some(top) = stack.last_mut() {
          top.text.push_str(&e.unescape()?);
        }
      }
      Event::CData(e) => {
        if let Some(top) = stack.last_mut() {
          top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
        }
      }
      Event::End(_) => {
        if let Some(el) = stack.pop() {
          attach(&mut stack, &mut root, el);
        }
      }
      Event::Eof => break,
      _ => {}
    }
    buf.clear();
  }

  if let Some(open) = stack.pop() {
    return Err(Error::Unclosed(open.name));
  }
  root.ok_or(Error::EmptyDocument)
}

fn open(start: &BytesStart<'_>) -> Result<Element> {
  let mut attributes = Vec::new();
  for attr in start.attributes() {
    let attr = attr?;
    let key = decode(local_name(attr.key.as_ref())).into_owned();
    attributes.push((key, attr.unescape_value()?.into_owned()));
  }
  Ok(Element {
    name: decode(local_name(start.name().as_ref())).into_owned(),
    attributes,
    ..Default::default()
  })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) {
  match stack.last_mut() {
    Some(parent) => parent.children.push(el),
    None => {
      if root.is_none() {
        *root = Some(el);
      }
    }
  }
}

fn local_name(name: &[u8]) -> &[u8] {
  match name.iter().rposition(|&b| b == b':') {
    Some(pos) => &name[pos + 1..],
    None => name,
  }
}

fn decode(bytes: &[u8]) -> Cow<'_, str> { String::from_utf8_lossy(bytes) }
