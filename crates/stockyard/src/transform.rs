//! declarative key transformation engine
//!
//! A warehouse carries one global rule document, `transforms.yaml`: an
//! ordered sequence of single-key mappings, each key a dotted key path,
//! each value an ordered sequence of operations:
//!
//! ```yaml
//! - net.dns.fqdn:
//!   - synthesize: "#[net.ip.name].#[domain.name]"
//! - net.layer2.name:
//!   - inherit: ~
//!   - synthesize: "#[chassis.nic.name]"
//! ```
//!
//! The [Writer] applies rules to pallets after the whole graph is loaded,
//! ancestors before descendants, so a descendant's rules can reference
//! ancestor keys that are themselves transform output. Per key, operations
//! run in order and the first one to produce a value wins; produced values
//! are stamped with the position of their rule entry in `transforms.yaml`,
//! since the rule — not any referenced file — authored them.
//!
//! An operation that cannot apply is not an error; it just lets the next
//! operation try. Only a malformed rule document is fatal.
//!
//! The [Reader] is the consuming mirror: it splits values that the writer
//! stores in concatenated form back into sequences, without mutating
//! anything.
use crate::graph::{CycleError, Graph, VertexId};
use crate::value::{Position, Traceable};
use indexmap::IndexMap;
use regex::Regex;

#[derive(thiserror::Error, Debug)]
pub enum RuleError {
    #[error("transform rules must be a sequence of single-key mappings ({position})")]
    MalformedRule { position: Position },
    #[error("unknown transform operation `{name}` ({position})")]
    UnknownOperation { name: String, position: Position },
    #[error("bad `{operation}` parameter at {position}: {reason}")]
    BadParameter {
        operation: &'static str,
        position: Position,
        reason: String,
    },
    #[error("bad regexp for synthesize_regexp source `{name}` ({position})")]
    BadRegexp {
        name: String,
        position: Position,
        #[source]
        source: regex::Error,
    },
}

/// The parsed global rule document, in document order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub key: String,
    ops: Vec<Operation>,
}

#[derive(Debug, Clone)]
struct Operation {
    op: Op,
    /// Where this operation is written in the rule document; produced
    /// values carry it as their provenance.
    position: Position,
}

/// The closed set of transform operations.
#[derive(Debug, Clone)]
enum Op {
    Concatenate { separator: String },
    Synthesize { templates: Vec<String> },
    SynthesizeRegexp { sources: Vec<RegexpSource>, produce: String },
    Inherit,
}

#[derive(Debug, Clone)]
struct RegexpSource {
    name: String,
    key: String,
    regexp: Regex,
}

/// Result of one operation against one key.
enum Outcome {
    /// A value was produced; store it and stop this rule list.
    Produced(String),
    /// The operation does not apply; try the next one.
    Pass,
    /// Stop this rule list without storing anything.
    Abort,
}

impl RuleSet {
    pub fn parse(document: &Traceable) -> Result<Self, RuleError> {
        let malformed = |position: &Position| RuleError::MalformedRule {
            position: position.clone(),
        };

        let entries = document
            .as_sequence()
            .ok_or_else(|| malformed(&document.position))?;

        let mut rules = Vec::new();
        for entry in entries {
            let (key, ops_value) = single_entry(entry).ok_or_else(|| malformed(&entry.position))?;
            let op_entries = ops_value
                .as_sequence()
                .ok_or_else(|| malformed(&ops_value.position))?;

            let mut ops = Vec::new();
            for op_entry in op_entries {
                let (name, param) =
                    single_entry(op_entry).ok_or_else(|| malformed(&op_entry.position))?;
                ops.push(Operation {
                    op: parse_operation(name, param)?,
                    position: param.position.clone(),
                });
            }

            rules.push(Rule {
                key: key.to_string(),
                ops,
            });
        }

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    fn rules_for<'r>(&'r self, key: &'r str) -> impl Iterator<Item = &'r Rule> {
        self.rules.iter().filter(move |rule| rule.key == key)
    }
}

fn single_entry(value: &Traceable) -> Option<(&str, &Traceable)> {
    let entries = value.as_mapping()?;
    if entries.len() != 1 {
        return None;
    }
    entries.iter().next().map(|(k, v)| (k.as_str(), v))
}

fn parse_operation(name: &str, param: &Traceable) -> Result<Op, RuleError> {
    let bad = |operation: &'static str, reason: &str| RuleError::BadParameter {
        operation,
        position: param.position.clone(),
        reason: reason.to_string(),
    };

    match name {
        "concatenate" => {
            let separator = param
                .as_scalar()
                .ok_or_else(|| bad("concatenate", "expected a separator string"))?;
            Ok(Op::Concatenate {
                separator: separator.to_string(),
            })
        }
        "synthesize" => {
            let templates = if let Some(template) = param.as_scalar() {
                vec![template.to_string()]
            } else if let Some(alternatives) = param.as_sequence() {
                alternatives
                    .iter()
                    .map(|alt| alt.as_scalar().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| bad("synthesize", "alternatives must be strings"))?
            } else {
                return Err(bad("synthesize", "expected a template or list of templates"));
            };
            Ok(Op::Synthesize { templates })
        }
        "synthesize_regexp" => {
            let entries = param
                .as_mapping()
                .ok_or_else(|| bad("synthesize_regexp", "expected a mapping"))?;
            let source_entries = entries
                .get("sources")
                .and_then(Traceable::as_mapping)
                .ok_or_else(|| bad("synthesize_regexp", "expected a `sources` mapping"))?;

            let mut sources = Vec::new();
            for (source_name, entry) in source_entries {
                let fields = entry.as_mapping().ok_or_else(|| {
                    bad("synthesize_regexp", "each source must be a mapping")
                })?;
                let key = fields
                    .get("key")
                    .and_then(Traceable::as_scalar)
                    .ok_or_else(|| bad("synthesize_regexp", "each source needs a `key`"))?;
                let pattern = fields
                    .get("regexp")
                    .and_then(Traceable::as_scalar)
                    .ok_or_else(|| bad("synthesize_regexp", "each source needs a `regexp`"))?;
                let regexp = Regex::new(pattern).map_err(|source| RuleError::BadRegexp {
                    name: source_name.clone(),
                    position: entry.position.clone(),
                    source,
                })?;

                sources.push(RegexpSource {
                    name: source_name.clone(),
                    key: key.to_string(),
                    regexp,
                });
            }

            let produce = entries
                .get("produce")
                .and_then(Traceable::as_scalar)
                .ok_or_else(|| bad("synthesize_regexp", "expected a `produce` template"))?;

            Ok(Op::SynthesizeRegexp {
                sources,
                produce: produce.to_string(),
            })
        }
        "inherit" => Ok(Op::Inherit),
        _ => Err(RuleError::UnknownOperation {
            name: name.to_string(),
            position: param.position.clone(),
        }),
    }
}

/// Rule evaluator that derives and stores pallet values.
pub struct Writer {
    rules: RuleSet,
    placeholder: Regex,
}

impl Writer {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            placeholder: Regex::new(r"#\[([A-Za-z0-9._-]+)\]")
                .expect("placeholder pattern is valid"),
        }
    }

    /// Apply the rule set to every pallet in the graph, inheritance sources
    /// before their dependents.
    pub fn transform_all(&self, graph: &mut Graph) -> Result<(), CycleError> {
        let order = graph.topological_order()?;
        for vertex in order.into_iter().rev() {
            self.transform_one(graph, vertex);
        }
        Ok(())
    }

    /// Apply the rule set to one pallet.
    pub fn transform_one(&self, graph: &mut Graph, pallet: VertexId) {
        for rule in &self.rules.rules {
            let shallow = graph.lookup_key(pallet, &rule.key, true).cloned();

            for operation in &rule.ops {
                match self.apply(graph, pallet, rule, shallow.as_ref(), &operation.op) {
                    Outcome::Produced(value) => {
                        tracing::debug!(key = %rule.key, %value, "transform produced value");
                        graph
                            .kv_mut(pallet)
                            .set(&rule.key, Traceable::scalar(value, operation.position.clone()));
                        break;
                    }
                    Outcome::Abort => break,
                    Outcome::Pass => {}
                }
            }
        }
    }

    fn apply(
        &self,
        graph: &Graph,
        pallet: VertexId,
        rule: &Rule,
        shallow: Option<&Traceable>,
        op: &Op,
    ) -> Outcome {
        match op {
            Op::Concatenate { separator } => concatenate(shallow, separator),
            Op::Synthesize { templates } => {
                self.synthesize(graph, pallet, shallow, templates)
            }
            Op::SynthesizeRegexp { sources, produce } => {
                self.synthesize_regexp(graph, pallet, shallow, sources, produce)
            }
            Op::Inherit => inherit(graph, pallet, &rule.key),
        }
    }

    /// Paste other keys together. Alternatives are tried in order; the
    /// first template whose `#[key]` placeholders all resolve wins. Never
    /// overrides a value that is already present on the pallet itself.
    fn synthesize(
        &self,
        graph: &Graph,
        pallet: VertexId,
        shallow: Option<&Traceable>,
        templates: &[String],
    ) -> Outcome {
        if shallow.is_some() {
            return Outcome::Pass;
        }

        for template in templates {
            let resolved = self.fill_template(template, |key| {
                graph
                    .lookup_key(pallet, key, false)
                    .and_then(Traceable::as_scalar)
                    .map(str::to_string)
            });

            if let Some(value) = resolved {
                return Outcome::Produced(value);
            }
        }

        Outcome::Pass
    }

    /// Pull parts out of other keys with named regexp captures, then paste
    /// the captures together with a `produce` template.
    ///
    /// All source keys must resolve; a source whose regexp does not match
    /// simply contributes no captures. Capture names are shared across
    /// sources, and a later source silently overwrites an earlier capture
    /// of the same name.
    fn synthesize_regexp(
        &self,
        graph: &Graph,
        pallet: VertexId,
        shallow: Option<&Traceable>,
        sources: &[RegexpSource],
        produce: &str,
    ) -> Outcome {
        if shallow.is_some() {
            return Outcome::Pass;
        }

        let mut captures: IndexMap<String, String> = IndexMap::new();
        for source in sources {
            let Some(value) = graph
                .lookup_key(pallet, &source.key, false)
                .and_then(Traceable::as_scalar)
            else {
                return Outcome::Pass;
            };

            if let Some(found) = source.regexp.captures(value) {
                for name in source.regexp.capture_names().flatten() {
                    if let Some(capture) = found.name(name) {
                        if captures.contains_key(name) {
                            tracing::trace!(source = %source.name, name, "capture overwritten");
                        }
                        captures.insert(name.to_string(), capture.as_str().to_string());
                    }
                }
            }
        }

        if captures.is_empty() {
            return Outcome::Pass;
        }

        match self.fill_template(produce, |name| captures.get(name).cloned()) {
            Some(value) => Outcome::Produced(value),
            None => Outcome::Pass,
        }
    }

    /// Substitute every `#[name]` in `template` via `resolve`, copying all
    /// other characters verbatim. Any unresolved placeholder fails the
    /// whole template.
    fn fill_template(
        &self,
        template: &str,
        mut resolve: impl FnMut(&str) -> Option<String>,
    ) -> Option<String> {
        let mut result = String::new();
        let mut copied_until = 0;

        for captures in self.placeholder.captures_iter(template) {
            let whole = captures.get(0).expect("capture 0 is the whole match");
            result.push_str(&template[copied_until..whole.start()]);
            result.push_str(&resolve(&captures[1])?);
            copied_until = whole.end();
        }

        result.push_str(&template[copied_until..]);
        Some(result)
    }
}

/// Join a shallow sequence value into one string.
fn concatenate(shallow: Option<&Traceable>, separator: &str) -> Outcome {
    let Some(items) = shallow.and_then(Traceable::as_sequence) else {
        return Outcome::Pass;
    };

    let Some(parts) = items
        .iter()
        .map(Traceable::as_scalar)
        .collect::<Option<Vec<_>>>()
    else {
        return Outcome::Pass;
    };

    Outcome::Produced(parts.join(separator))
}

/// Stop synthesizing as soon as any value — own or inherited — exists for
/// the key.
fn inherit(graph: &Graph, pallet: VertexId, key: &str) -> Outcome {
    if graph.lookup_key(pallet, key, false).is_some() {
        Outcome::Abort
    } else {
        Outcome::Pass
    }
}

/// Rule evaluator for consumers of structured values; performs no mutation.
#[derive(derive_new::new)]
pub struct Reader {
    rules: RuleSet,
}

impl Reader {
    /// Split a scalar that the writer stores concatenated back into its
    /// sequence form, using the separator declared for `key`.
    ///
    /// Returns `None` when no `concatenate` rule exists for `key`.
    pub fn structured(&self, key: &str, value: &str) -> Option<Vec<String>> {
        self.rules.rules_for(key).find_map(|rule| {
            rule.ops.iter().find_map(|operation| match &operation.op {
                Op::Concatenate { separator } => {
                    Some(value.split(separator.as_str()).map(str::to_string).collect())
                }
                _ => None,
            })
        })
    }
}
