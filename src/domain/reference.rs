//! Tree references: immutable paths of (name, multiplicity) steps.
//!
//! A reference identifies a node's position without holding a handle to it,
//! so it survives arena mutations and can key maps and caches.

use std::fmt;

use itertools::Itertools;

use crate::domain::error::ReferenceParseError;

/// Multiplicity not yet chosen (used while walking before an index is fixed).
pub const INDEX_UNBOUND: i32 = -1;
/// Multiplicity of a repeat prototype; never enumerated as real data.
pub const INDEX_TEMPLATE: i32 = -2;
/// Multiplicity carried by attribute nodes.
pub const INDEX_ATTRIBUTE: i32 = -4;
/// Multiplicity given to freshly instantiated repeat content.
pub const DEFAULT_MULTIPLICITY: i32 = 0;

/// Multiplicities a structural child may carry: a position or the template
/// sentinel.
pub fn is_structural_multiplicity(multiplicity: i32) -> bool {
    multiplicity >= 0 || multiplicity == INDEX_TEMPLATE
}

/// `ref_level` of a root-anchored reference.
pub const REF_ABSOLUTE: i32 = -1;

/// How a reference's first step is anchored when evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ReferenceContext {
    /// Resolved against whatever instance the evaluator is currently in.
    #[default]
    Inherited,
    /// Bound to the named secondary instance carried by the reference.
    Instance,
}

/// One path step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Step {
    pub name: String,
    pub multiplicity: i32,
}

impl Step {
    pub fn new(name: impl Into<String>, multiplicity: i32) -> Self {
        Self {
            name: name.into(),
            multiplicity,
        }
    }

    pub fn is_attribute(&self) -> bool {
        self.multiplicity == INDEX_ATTRIBUTE
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.multiplicity {
            INDEX_ATTRIBUTE => write!(f, "@{}", self.name),
            INDEX_TEMPLATE => write!(f, "{}[@template]", self.name),
            INDEX_UNBOUND => write!(f, "{}", self.name),
            m if m >= 0 => write!(f, "{}[{}]", self.name, i64::from(m) + 1),
            m => write!(f, "{}[#{}]", self.name, m),
        }
    }
}

/// Immutable hierarchical path addressing a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeReference {
    ref_level: i32,
    context: ReferenceContext,
    instance_name: Option<String>,
    steps: Vec<Step>,
}

impl TreeReference {
    /// The root-anchored empty path (`/`).
    pub fn root_ref() -> Self {
        Self {
            ref_level: REF_ABSOLUTE,
            context: ReferenceContext::Inherited,
            instance_name: None,
            steps: Vec::new(),
        }
    }

    /// The relative empty path (`.`).
    pub fn self_ref() -> Self {
        Self {
            ref_level: 0,
            context: ReferenceContext::Inherited,
            instance_name: None,
            steps: Vec::new(),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.ref_level == REF_ABSOLUTE
    }

    pub fn ref_level(&self) -> i32 {
        self.ref_level
    }

    pub fn context(&self) -> ReferenceContext {
        self.context
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.steps.get(index).map(|s| s.name.as_str())
    }

    pub fn multiplicity_at(&self, index: usize) -> Option<i32> {
        self.steps.get(index).map(|s| s.multiplicity)
    }

    /// Tags the reference with a secondary instance; a named instance switches
    /// the context to [`ReferenceContext::Instance`].
    pub fn with_instance(mut self, instance_name: Option<&str>) -> Self {
        self.instance_name = instance_name.map(str::to_string);
        self.context = if self.instance_name.is_some() {
            ReferenceContext::Instance
        } else {
            ReferenceContext::Inherited
        };
        self
    }

    pub fn push_step(&mut self, name: impl Into<String>, multiplicity: i32) {
        self.steps.push(Step::new(name, multiplicity));
    }

    /// New reference with one more step.
    pub fn extend(&self, name: impl Into<String>, multiplicity: i32) -> Self {
        let mut extended = self.clone();
        extended.push_step(name, multiplicity);
        extended
    }

    /// Reference to the containing node, `None` for an empty path.
    pub fn parent_ref(&self) -> Option<Self> {
        if self.steps.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.steps.pop();
        Some(parent)
    }

    /// Copy with the multiplicity of step `index` replaced.
    pub fn with_multiplicity(&self, index: usize, multiplicity: i32) -> Self {
        let mut copy = self.clone();
        if let Some(step) = copy.steps.get_mut(index) {
            step.multiplicity = multiplicity;
        }
        copy
    }

    /// Same path with every element multiplicity unbound (attributes keep theirs).
    pub fn generic(&self) -> Self {
        let mut copy = self.clone();
        for step in copy.steps.iter_mut().filter(|s| !s.is_attribute()) {
            step.multiplicity = INDEX_UNBOUND;
        }
        copy
    }

    /// True when `other` lies strictly below this reference.
    ///
    /// An unbound step on this side matches any multiplicity on the other.
    pub fn is_ancestor_of(&self, other: &TreeReference) -> bool {
        self.ref_level == other.ref_level
            && self.instance_name == other.instance_name
            && self.steps.len() < other.steps.len()
            && self.steps.iter().zip(&other.steps).all(|(a, b)| {
                a.name == b.name
                    && (a.multiplicity == b.multiplicity || a.multiplicity == INDEX_UNBOUND)
            })
    }

    /// Parses the textual form produced by `Display`.
    pub fn parse(input: &str) -> Result<Self, ReferenceParseError> {
        let err = |reason: &str| ReferenceParseError {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let mut rest = input.trim();
        let mut instance_name = None;

        if let Some(after) = rest.strip_prefix("instance('") {
            let end = after.find("')").ok_or_else(|| err("unterminated instance()"))?;
            instance_name = Some(&after[..end]);
            rest = &after[end + 2..];
            if !rest.is_empty() && !rest.starts_with('/') {
                return Err(err("instance() must be followed by '/'"));
            }
        }

        let mut reference = if let Some(path) = rest.strip_prefix('/') {
            rest = path;
            Self::root_ref()
        } else if instance_name.is_some() {
            Self::root_ref()
        } else {
            let mut level = 0;
            while let Some(path) = rest.strip_prefix("../") {
                level += 1;
                rest = path;
            }
            if rest == ".." {
                level += 1;
                rest = "";
            }
            if rest == "." {
                rest = "";
            }
            let mut relative = Self::self_ref();
            relative.ref_level = level;
            relative
        };

        for raw in rest.split('/').filter(|s| !s.is_empty()) {
            reference.steps.push(parse_step(raw).ok_or_else(|| err("malformed step"))?);
        }

        Ok(reference.with_instance(instance_name))
    }
}

fn parse_step(raw: &str) -> Option<Step> {
    if let Some(name) = raw.strip_prefix('@') {
        return valid_name(name).then(|| Step::new(name, INDEX_ATTRIBUTE));
    }
    let (name, multiplicity) = match raw.find('[') {
        None => (raw, INDEX_UNBOUND),
        Some(open) => {
            let predicate = raw[open + 1..].strip_suffix(']')?;
            let multiplicity = if predicate == "@template" {
                INDEX_TEMPLATE
            } else {
                predicate
                    .parse::<i64>()
                    .ok()
                    .filter(|n| *n >= 1)
                    .and_then(|n| i32::try_from(n - 1).ok())?
            };
            (&raw[..open], multiplicity)
        }
    };
    valid_name(name).then(|| Step::new(name, multiplicity))
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

impl fmt::Display for TreeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(instance) = &self.instance_name {
            write!(f, "instance('{}')", instance)?;
        }
        let path = self.steps.iter().join("/");
        match self.ref_level {
            REF_ABSOLUTE => write!(f, "/{}", path),
            0 if path.is_empty() => write!(f, "."),
            level => {
                let up = (0..level).map(|_| "..").join("/");
                if path.is_empty() {
                    write!(f, "{}", up)
                } else if up.is_empty() {
                    write!(f, "{}", path)
                } else {
                    write!(f, "{}/{}", up, path)
                }
            }
        }
    }
}
