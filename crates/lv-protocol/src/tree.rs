// Render trees and patches.
//
// A rendering is an alternating sequence of static spans and dynamic holes:
// `statics[0] dyn[0] statics[1] dyn[1] ... statics[n]`. For a fixed template
// the statics never change, which is what lets updates travel as a sparse
// map of changed dynamics only.
//
// Wire shape of a full tree: `{"s": ["..."], "d": {"0": v, ...}}` where each
// value is a string or a nested tree of the same shape. Wire shape of a
// patch: the sparse `d` map alone; a nested `{"d": {...}}` object is a
// recursive patch, a nested `{"s": [...], "d": {...}}` object is a full
// subtree replacement.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building, decoding, or applying trees and patches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// `statics.len() != dynamics.len() + 1`.
    Shape { statics: usize, dynamics: usize },
    /// A full tree's dynamics map skipped an index.
    SparseDynamics { index: usize },
    /// A dynamics key was not a base-10 index.
    BadIndex(String),
    /// A patch referenced an index past the end of the tree.
    IndexOutOfRange { index: usize, len: usize },
    /// A nested patch landed on a string dynamic (or vice versa).
    TypeMismatch { index: usize },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::Shape { statics, dynamics } => write!(
                f,
                "malformed tree: {statics} statics for {dynamics} dynamics (want dynamics + 1)"
            ),
            TreeError::SparseDynamics { index } => {
                write!(f, "full tree is missing dynamic index {index}")
            }
            TreeError::BadIndex(key) => write!(f, "dynamics key {key:?} is not an index"),
            TreeError::IndexOutOfRange { index, len } => {
                write!(f, "patch index {index} out of range for {len} dynamics")
            }
            TreeError::TypeMismatch { index } => {
                write!(f, "nested patch at index {index} does not match a subtree")
            }
        }
    }
}

impl std::error::Error for TreeError {}

// ---------------------------------------------------------------------------
// RenderTree
// ---------------------------------------------------------------------------

/// A single dynamic hole: rendered text, or a nested sub-view rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dynamic {
    Text(String),
    Tree(RenderTree),
}

/// A template rendering decomposed into static spans and dynamic holes.
///
/// Invariant: `statics.len() == dynamics.len() + 1`, enforced at
/// construction and on decode. The empty template is `statics = [""]`,
/// `dynamics = []`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TreeWire", into = "TreeWire")]
pub struct RenderTree {
    statics: Vec<String>,
    dynamics: Vec<Dynamic>,
}

impl RenderTree {
    pub fn new(statics: Vec<String>, dynamics: Vec<Dynamic>) -> Result<Self, TreeError> {
        if statics.len() != dynamics.len() + 1 {
            return Err(TreeError::Shape {
                statics: statics.len(),
                dynamics: dynamics.len(),
            });
        }
        Ok(Self { statics, dynamics })
    }

    /// The rendering of an empty template.
    pub fn empty() -> Self {
        Self {
            statics: vec![String::new()],
            dynamics: Vec::new(),
        }
    }

    pub fn statics(&self) -> &[String] {
        &self.statics
    }

    pub fn dynamics(&self) -> &[Dynamic] {
        &self.dynamics
    }

    /// Interleave statics and dynamics into the full HTML string.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        for (i, fixed) in self.statics.iter().enumerate() {
            out.push_str(fixed);
            match self.dynamics.get(i) {
                Some(Dynamic::Text(text)) => out.push_str(text),
                Some(Dynamic::Tree(tree)) => tree.write_html(out),
                None => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// One replacement value inside a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchValue {
    /// The dynamic is now this string.
    Text(String),
    /// Full subtree replacement: the nested statics changed, or the dynamic
    /// changed type between string and subtree.
    Replace(RenderTree),
    /// Recursive sparse patch into an unchanged-statics subtree.
    Nested(Patch),
}

/// A sparse mapping from dynamic index to replacement value.
///
/// Indices refer to positions in the previous rendering's dynamics; entries
/// whose value is byte-identical to the previous rendering are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "PatchWire", into = "PatchWire")]
pub struct Patch(BTreeMap<usize, PatchValue>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, value: PatchValue) {
        self.0.insert(index, value);
    }

    pub fn get(&self, index: usize) -> Option<&PatchValue> {
        self.0.get(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PatchValue)> {
        self.0.iter().map(|(i, v)| (*i, v))
    }

    /// Apply this patch to `base`, producing the next rendering.
    ///
    /// This mirrors the client's static-cache model: statics come from
    /// `base`, patched dynamics replace the old values, untouched dynamics
    /// carry over.
    pub fn apply(&self, base: &RenderTree) -> Result<RenderTree, TreeError> {
        let mut dynamics = base.dynamics.to_vec();
        for (&index, value) in &self.0 {
            let slot = dynamics
                .get_mut(index)
                .ok_or(TreeError::IndexOutOfRange {
                    index,
                    len: base.dynamics.len(),
                })?;
            match value {
                PatchValue::Text(text) => *slot = Dynamic::Text(text.clone()),
                PatchValue::Replace(tree) => *slot = Dynamic::Tree(tree.clone()),
                PatchValue::Nested(patch) => match slot {
                    Dynamic::Tree(subtree) => *slot = Dynamic::Tree(patch.apply(subtree)?),
                    Dynamic::Text(_) => return Err(TreeError::TypeMismatch { index }),
                },
            }
        }
        RenderTree::new(base.statics.clone(), dynamics)
    }
}

impl FromIterator<(usize, PatchValue)> for Patch {
    fn from_iter<I: IntoIterator<Item = (usize, PatchValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Wire representations
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct TreeWire {
    s: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    d: BTreeMap<String, DynamicWire>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DynamicWire {
    Text(String),
    Tree(TreeWire),
}

fn parse_index(key: &str) -> Result<usize, TreeError> {
    key.parse::<usize>()
        .map_err(|_| TreeError::BadIndex(key.to_owned()))
}

impl TryFrom<TreeWire> for RenderTree {
    type Error = TreeError;

    fn try_from(wire: TreeWire) -> Result<Self, Self::Error> {
        let mut by_index = BTreeMap::new();
        for (key, value) in wire.d {
            by_index.insert(parse_index(&key)?, value);
        }
        let mut dynamics = Vec::with_capacity(by_index.len());
        for index in 0..by_index.len() {
            let value = by_index
                .remove(&index)
                .ok_or(TreeError::SparseDynamics { index })?;
            dynamics.push(match value {
                DynamicWire::Text(text) => Dynamic::Text(text),
                DynamicWire::Tree(tree) => Dynamic::Tree(RenderTree::try_from(tree)?),
            });
        }
        RenderTree::new(wire.s, dynamics)
    }
}

impl From<RenderTree> for TreeWire {
    fn from(tree: RenderTree) -> Self {
        let d = tree
            .dynamics
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let wire = match value {
                    Dynamic::Text(text) => DynamicWire::Text(text),
                    Dynamic::Tree(tree) => DynamicWire::Tree(tree.into()),
                };
                (i.to_string(), wire)
            })
            .collect();
        TreeWire { s: tree.statics, d }
    }
}

type PatchWire = BTreeMap<String, PatchValueWire>;

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PatchValueWire {
    Text(String),
    // `{"s": ..., "d": ...}` must be tried before the bare-`d` nested shape.
    Replace(TreeWire),
    Nested(NestedPatchWire),
}

#[derive(Serialize, Deserialize)]
struct NestedPatchWire {
    d: PatchWire,
}

impl TryFrom<PatchWire> for Patch {
    type Error = TreeError;

    fn try_from(wire: PatchWire) -> Result<Self, Self::Error> {
        let mut patch = Patch::new();
        for (key, value) in wire {
            patch.insert(parse_index(&key)?, PatchValue::try_from(value)?);
        }
        Ok(patch)
    }
}

impl TryFrom<PatchValueWire> for PatchValue {
    type Error = TreeError;

    fn try_from(wire: PatchValueWire) -> Result<Self, Self::Error> {
        Ok(match wire {
            PatchValueWire::Text(text) => PatchValue::Text(text),
            PatchValueWire::Replace(tree) => PatchValue::Replace(RenderTree::try_from(tree)?),
            PatchValueWire::Nested(nested) => PatchValue::Nested(Patch::try_from(nested.d)?),
        })
    }
}

impl From<Patch> for PatchWire {
    fn from(patch: Patch) -> Self {
        patch
            .0
            .into_iter()
            .map(|(index, value)| (index.to_string(), value.into()))
            .collect()
    }
}

impl From<PatchValue> for PatchValueWire {
    fn from(value: PatchValue) -> Self {
        match value {
            PatchValue::Text(text) => PatchValueWire::Text(text),
            PatchValue::Replace(tree) => PatchValueWire::Replace(tree.into()),
            PatchValue::Nested(patch) => PatchValueWire::Nested(NestedPatchWire {
                d: patch.into(),
            }),
        }
    }
}
