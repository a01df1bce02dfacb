//! Core value types: capabilities, parameters and workflow nodes

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/* ===================== Capabilities ===================== */

/// An activation capability a workflow node invokes.
///
/// The builtin activations are closed tags; anything else the generated code
/// calls is kept verbatim in `Other` so graphs can carry capabilities that are
/// only known to the caller at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    SendMessage,
    SendEmail,
    DraftEmail,
    MakeCall,
    GenerateSummary,
    WebSearch,
    DocSearch,
    FetchCalendarEvents,
    ConditionalCheck,
    LoopCheck,
    UserApprovalCheck,
    TimeBasedTrigger,
    Other(String),
}

impl Capability {
    /// Every builtin capability, in catalog order.
    pub const BUILTIN: [Capability; 12] = [
        Capability::SendMessage,
        Capability::SendEmail,
        Capability::DraftEmail,
        Capability::MakeCall,
        Capability::GenerateSummary,
        Capability::WebSearch,
        Capability::DocSearch,
        Capability::FetchCalendarEvents,
        Capability::ConditionalCheck,
        Capability::LoopCheck,
        Capability::UserApprovalCheck,
        Capability::TimeBasedTrigger,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Capability::SendMessage => "send_message",
            Capability::SendEmail => "send_email",
            Capability::DraftEmail => "draft_email",
            Capability::MakeCall => "make_call",
            Capability::GenerateSummary => "generate_summary",
            Capability::WebSearch => "web_search",
            Capability::DocSearch => "doc_search",
            Capability::FetchCalendarEvents => "fetch_calendar_events",
            Capability::ConditionalCheck => "conditional_check",
            Capability::LoopCheck => "loop_check",
            Capability::UserApprovalCheck => "user_approval_check",
            Capability::TimeBasedTrigger => "time_based_trigger",
            Capability::Other(name) => name,
        }
    }

    /// True for the closed set of builtin activations.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, Capability::Other(_))
    }
}

impl From<&str> for Capability {
    fn from(name: &str) -> Self {
        Capability::BUILTIN
            .iter()
            .find(|c| c.as_str() == name)
            .cloned()
            .unwrap_or_else(|| Capability::Other(name.to_string()))
    }
}

impl From<String> for Capability {
    fn from(name: String) -> Self {
        match Capability::from(name.as_str()) {
            Capability::Other(_) => Capability::Other(name),
            builtin => builtin,
        }
    }
}

impl From<Capability> for String {
    fn from(capability: Capability) -> Self {
        match capability {
            Capability::Other(name) => name,
            builtin => builtin.as_str().to_string(),
        }
    }
}

impl FromStr for Capability {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Capability::from(s))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capability names a caller considers valid.
///
/// Used for advisory diagnostics only; unknown actions never block graph
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityCatalog {
    names: BTreeSet<String>,
}

impl CapabilityCatalog {
    /// A catalog with no known capabilities.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A catalog holding the builtin activations.
    pub fn builtin() -> Self {
        Self::from_names(Capability::BUILTIN.iter().map(|c| c.as_str()))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Add more names (e.g. a caller-supplied "available nodes" list).
    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.names.extend(
            names
                .into_iter()
                .map(|n| n.as_ref().trim().to_string())
                .filter(|n| !n.is_empty()),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/* ===================== Parameters ===================== */

/// Key of a call parameter: a positional slot or a keyword name.
///
/// Serialized as a string; positional keys are their decimal index, which can
/// never collide with a keyword since identifiers don't start with a digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParamKey {
    Positional(usize),
    Keyword(String),
}

impl ParamKey {
    pub fn keyword(name: impl Into<String>) -> Self {
        ParamKey::Keyword(name.into())
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Positional(index) => write!(f, "{}", index),
            ParamKey::Keyword(name) => f.write_str(name),
        }
    }
}

impl From<ParamKey> for String {
    fn from(key: ParamKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ParamKey {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw.is_empty() {
            return Err("parameter key must not be empty".to_string());
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return raw
                .parse::<usize>()
                .map(ParamKey::Positional)
                .map_err(|e| format!("invalid positional key '{}': {}", raw, e));
        }
        Ok(ParamKey::Keyword(raw))
    }
}

/// Value bound to a node parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    /// Output of another node, by id.
    Ref(String),
    /// Any other expression, kept as its source text and never evaluated.
    Expr(String),
}

impl ParamValue {
    pub fn str(value: impl Into<String>) -> Self {
        ParamValue::Str(value.into())
    }

    pub fn reference(id: impl Into<String>) -> Self {
        ParamValue::Ref(id.into())
    }

    /// The producer id if this value is a node reference.
    pub fn as_ref_id(&self) -> Option<&str> {
        match self {
            ParamValue::Ref(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        !matches!(self, ParamValue::Ref(_) | ParamValue::Expr(_))
    }
}

impl fmt::Display for ParamValue {
    /// Renders the value the way it would be written in the source.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write_quoted(f, s),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => {
                if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            ParamValue::Bool(true) => f.write_str("True"),
            ParamValue::Bool(false) => f.write_str("False"),
            ParamValue::None => f.write_str("None"),
            ParamValue::Ref(id) => f.write_str(id),
            ParamValue::Expr(text) => f.write_str(text),
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for ch in s.chars() {
        match ch {
            '\\' => f.write_str("\\\\")?,
            '\'' => f.write_str("\\'")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("'")
}

/// Ordered parameter mapping, in the order the arguments were written.
pub type Parameters = IndexMap<ParamKey, ParamValue>;

/* ===================== Workflow Node ===================== */

/// One activation call with its bound parameters.
///
/// Graphs key nodes by `id`; the derived `PartialEq` compares every field and
/// is meant for assertions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub action: Capability,
    #[serde(default)]
    pub parameters: Parameters,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, action: impl Into<Capability>, parameters: Parameters) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            parameters,
        }
    }

    /// Node ids this node's parameters reference, in parameter order.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.parameters.values().filter_map(ParamValue::as_ref_id)
    }

    /// Human-readable call form, e.g. `send_message(recipient='ops', body=summary)`.
    pub fn describe(&self) -> String {
        let args: Vec<String> = self
            .parameters
            .iter()
            .map(|(key, value)| match key {
                ParamKey::Positional(_) => value.to_string(),
                ParamKey::Keyword(name) => format!("{}={}", name, value),
            })
            .collect();
        format!("{}({})", self.action, args.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_round_trips_through_strings() {
        assert_eq!(Capability::from("send_email"), Capability::SendEmail);
        assert_eq!(
            Capability::from("escalate_ticket"),
            Capability::Other("escalate_ticket".to_string())
        );
        assert_eq!(String::from(Capability::MakeCall), "make_call");

        let json = serde_json::to_string(&Capability::GenerateSummary).unwrap();
        assert_eq!(json, "\"generate_summary\"");
        let back: Capability = serde_json::from_str("\"custom\"").unwrap();
        assert_eq!(back, Capability::Other("custom".to_string()));
    }

    #[test]
    fn test_catalog_builtin_and_extension() {
        let mut catalog = CapabilityCatalog::builtin();
        assert!(catalog.contains("send_message"));
        assert!(!catalog.contains("escalate_ticket"));

        catalog.extend(["escalate_ticket", "  "]);
        assert!(catalog.contains("escalate_ticket"));
        assert_eq!(catalog.names().count(), Capability::BUILTIN.len() + 1);
    }

    #[test]
    fn test_param_key_serialization() {
        let positional = serde_json::to_string(&ParamKey::Positional(2)).unwrap();
        assert_eq!(positional, "\"2\"");
        let keyword: ParamKey = serde_json::from_str("\"body\"").unwrap();
        assert_eq!(keyword, ParamKey::keyword("body"));
        assert!(ParamKey::try_from(String::new()).is_err());
    }

    #[test]
    fn test_describe_renders_python_style_call() {
        let mut parameters = Parameters::new();
        parameters.insert(ParamKey::Positional(0), ParamValue::str("it's"));
        parameters.insert(ParamKey::keyword("count"), ParamValue::Int(3));
        parameters.insert(ParamKey::keyword("ratio"), ParamValue::Float(2.0));
        parameters.insert(ParamKey::keyword("urgent"), ParamValue::Bool(true));
        parameters.insert(ParamKey::keyword("cc"), ParamValue::None);
        parameters.insert(ParamKey::keyword("body"), ParamValue::reference("summary"));
        parameters.insert(ParamKey::keyword("to"), ParamValue::Expr("[\"a\"]".to_string()));
        let node = WorkflowNode::new("notify", "send_message", parameters);

        assert_eq!(
            node.describe(),
            "send_message('it\\'s', count=3, ratio=2.0, urgent=True, cc=None, body=summary, to=[\"a\"])"
        );
        assert_eq!(node.references().collect::<Vec<_>>(), vec!["summary"]);
    }
}
