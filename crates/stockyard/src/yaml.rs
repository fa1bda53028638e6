//! position-tracking YAML front-end
//!
//! Adapter between yaml-rust2's marked event stream and the [Traceable]
//! value model. Every scalar, sequence start and mapping start event carries
//! a [yaml_rust2::scanner::Marker]; we copy its line, column and byte index
//! onto the value being built, together with the `tag` naming the source
//! file. The tag is only copied through, never interpreted.
//!
//! Everything scalar is kept as a string. YAML would happily hand us
//! integers and booleans, but warehouse data is matched, concatenated and
//! templated as text, so the source spelling is the value.
//!
//! Aliases and multi-document streams are rejected: an aliased value would
//! have two plausible source positions, and nothing in a warehouse needs
//! either feature.
use crate::value::{Position, Traceable, Value};
use indexmap::IndexMap;
use std::path::Path;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, ScanError, TScalarStyle};

#[derive(thiserror::Error, Debug)]
pub enum YamlError {
    #[error("unable to scan yaml document")]
    Scan(#[from] ScanError),
    #[error("yaml alias at {position} is not supported")]
    Alias { position: Position },
    #[error("unexpected yaml structure at {position}")]
    Structure { position: Position },
    #[error("unable to read yaml document")]
    Io(#[from] std::io::Error),
}

/// Parse a single YAML document from `source`, tagging every value with
/// `tag` as its file name.
///
/// An empty document yields an empty mapping.
pub fn parse(source: &str, tag: &str) -> Result<Traceable, YamlError> {
    let mut builder = TreeBuilder::new(tag);
    let mut parser = Parser::new_from_str(source);
    parser.load(&mut builder, false)?;

    if let Some(error) = builder.error {
        return Err(error);
    }

    Ok(builder
        .root
        .unwrap_or_else(|| Traceable::mapping(IndexMap::new(), Position::whole_file(tag))))
}

/// Load a YAML document from `path`, tagging every value with `tag`.
pub fn load_file(path: &Path, tag: &str) -> Result<Traceable, YamlError> {
    tracing::trace!(path = %path.display(), tag, "loading yaml file");
    let source = std::fs::read_to_string(path)?;
    parse(&source, tag)
}

enum Frame {
    Sequence {
        items: Vec<Traceable>,
        position: Position,
    },
    Mapping {
        entries: IndexMap<String, Traceable>,
        pending_key: Option<String>,
        position: Position,
    },
}

struct TreeBuilder<'t> {
    tag: &'t str,
    stack: Vec<Frame>,
    root: Option<Traceable>,
    error: Option<YamlError>,
}

impl<'t> TreeBuilder<'t> {
    fn new(tag: &'t str) -> Self {
        Self {
            tag,
            stack: Vec::new(),
            root: None,
            error: None,
        }
    }

    fn position(&self, mark: Marker) -> Position {
        // Marker lines are 1-based, columns 0-based.
        Position::new(
            self.tag,
            mark.line() as u64,
            mark.col() as u64 + 1,
            mark.index() as u64,
        )
    }

    /// True when the innermost open container is a mapping waiting for a key.
    fn awaiting_key(&self) -> bool {
        matches!(
            self.stack.last(),
            Some(Frame::Mapping {
                pending_key: None,
                ..
            })
        )
    }

    fn attach(&mut self, value: Traceable) {
        match self.stack.last_mut() {
            None => self.root = Some(value),
            Some(Frame::Sequence { items, .. }) => items.push(value),
            Some(Frame::Mapping {
                entries,
                pending_key,
                ..
            }) => {
                let key = pending_key
                    .take()
                    .expect("attach is never called while a mapping awaits a key");
                entries.insert(key, value);
            }
        }
    }
}

impl MarkedEventReceiver for TreeBuilder<'_> {
    fn on_event(&mut self, event: Event, mark: Marker) {
        if self.error.is_some() {
            return;
        }

        match event {
            Event::Scalar(value, style, _, _) => {
                let value = normalize_null(value, style);
                if self.awaiting_key() {
                    let Some(Frame::Mapping { pending_key, .. }) = self.stack.last_mut() else {
                        unreachable!("awaiting_key checked the top frame");
                    };
                    *pending_key = Some(value);
                } else {
                    let position = self.position(mark);
                    self.attach(Traceable::scalar(value, position));
                }
            }
            Event::SequenceStart(_, _) => {
                if self.awaiting_key() {
                    self.error = Some(YamlError::Structure {
                        position: self.position(mark),
                    });
                    return;
                }
                self.stack.push(Frame::Sequence {
                    items: Vec::new(),
                    position: self.position(mark),
                });
            }
            Event::SequenceEnd => {
                let Some(Frame::Sequence { items, position }) = self.stack.pop() else {
                    unreachable!("sequence end always matches a sequence start");
                };
                self.attach(Traceable::sequence(items, position));
            }
            Event::MappingStart(_, _) => {
                if self.awaiting_key() {
                    self.error = Some(YamlError::Structure {
                        position: self.position(mark),
                    });
                    return;
                }
                self.stack.push(Frame::Mapping {
                    entries: IndexMap::new(),
                    pending_key: None,
                    position: self.position(mark),
                });
            }
            Event::MappingEnd => {
                let Some(Frame::Mapping {
                    entries, position, ..
                }) = self.stack.pop()
                else {
                    unreachable!("mapping end always matches a mapping start");
                };
                self.attach(Traceable::mapping(entries, position));
            }
            Event::Alias(_) => {
                self.error = Some(YamlError::Alias {
                    position: self.position(mark),
                });
            }
            // stream and document markers carry no data
            _ => {}
        }
    }
}

/// YAML nulls become empty strings, matching how every other scalar keeps
/// its source spelling as a string.
fn normalize_null(value: String, style: TScalarStyle) -> String {
    if style == TScalarStyle::Plain && matches!(value.as_str(), "~" | "null" | "Null" | "NULL") {
        String::new()
    } else {
        value
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scalars_carry_file_line_column_byte() {
        let doc = parse("foo:\n  bar: quux\n", "box.yaml").unwrap();
        let bar = &doc.as_mapping().unwrap()["foo"].as_mapping().unwrap()["bar"];

        assert_eq!(bar.as_scalar(), Some("quux"));
        assert_eq!(bar.position.file, "box.yaml");
        assert_eq!(bar.position.line, 2);
        assert!(bar.position.column > 1);
        assert!(bar.position.byte > 0);
        assert!(bar.position.is_tracked());
    }

    #[test]
    fn sequences_and_mappings_are_nested_traceables() {
        let doc = parse("foo:\n  baz:\n    - gazonk\n    - foobar\n", "box.yaml").unwrap();
        let baz = &doc.as_mapping().unwrap()["foo"].as_mapping().unwrap()["baz"];

        let items = baz.as_sequence().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_scalar(), Some("gazonk"));
        assert_eq!(items[0].position.line, 3);
        assert_eq!(items[1].position.line, 4);
        assert!(items.iter().all(|i| i.position.is_tracked()));
    }

    #[test]
    fn scalars_keep_their_source_spelling() {
        let doc = parse("port: 53\nenabled: true\n", "box.yaml").unwrap();
        let entries = doc.as_mapping().unwrap();

        assert_eq!(entries["port"].as_scalar(), Some("53"));
        assert_eq!(entries["enabled"].as_scalar(), Some("true"));
    }

    #[test]
    fn plain_nulls_become_empty_strings() {
        let doc = parse("a: ~\nb: null\nc: \"~\"\n", "box.yaml").unwrap();
        let entries = doc.as_mapping().unwrap();

        assert_eq!(entries["a"].as_scalar(), Some(""));
        assert_eq!(entries["b"].as_scalar(), Some(""));
        assert_eq!(entries["c"].as_scalar(), Some("~"));
    }

    #[test]
    fn empty_document_is_an_empty_mapping() {
        let doc = parse("", "box.yaml").unwrap();
        assert!(doc.as_mapping().unwrap().is_empty());
        assert!(doc.position.is_tracked());
    }

    #[test]
    fn aliases_are_rejected() {
        let result = parse("a: &anchor 1\nb: *anchor\n", "box.yaml");
        assert!(matches!(result, Err(YamlError::Alias { .. })));
    }

    #[test]
    fn syntax_errors_are_scan_errors() {
        let result = parse("a: [unclosed\n", "box.yaml");
        assert!(matches!(result, Err(YamlError::Scan(_))));
    }
}
