//! Nested settings trees and staged diffing.
//!
//! This module provides:
//! - [`SettingsTree`] - A tagged tree of typed leaf values
//! - [`SettingsDiffer`] - Stages changed leaves between an old and a new
//!   tree, then commits them as the new baseline
//! - [`SettingsSlot`] - Handle to one key path inside a differ
//!
//! The differ is used for "whole subsystem" state (environment lighting)
//! where only changed leaf values should reach the renderer. Staging is
//! side-effect-free: only an explicit apply step outside this module
//! issues renderer calls, so higher-level logic can decide to skip
//! staging selected paths entirely (e.g. leave background settings alone
//! while the environment is disabled).
//!
//! # Example
//!
//! ```
//! use emberbridge_core::settings::{SettingsDiffer, SettingsTree, SettingsValue};
//!
//! let mut old = SettingsTree::new();
//! old.set(&["ibl", "intensity"], 1.0f32);
//!
//! let mut new = SettingsTree::new();
//! new.set(&["ibl", "intensity"], 2.0f32);
//!
//! let mut differ = SettingsDiffer::new(old, new);
//! assert!(differ.slot(&["ibl", "intensity"]).use_new_value());
//!
//! let baseline = differ.commit();
//! assert_eq!(
//!     baseline.get(&["ibl", "intensity"]),
//!     Some(&SettingsValue::Float(2.0))
//! );
//! ```

use std::collections::BTreeMap;

/// A typed leaf value in a settings tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f32),
    /// Three-component vector (color, rotation).
    Vec3([f32; 3]),
    /// Text (enum tags, resource names).
    Text(String),
}

impl SettingsValue {
    /// Boolean payload, if this is a [`SettingsValue::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Float payload, if this is a [`SettingsValue::Float`].
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Vector payload, if this is a [`SettingsValue::Vec3`].
    pub fn as_vec3(&self) -> Option<[f32; 3]> {
        match self {
            Self::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    /// Text payload, if this is a [`SettingsValue::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for SettingsValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SettingsValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for SettingsValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<[f32; 3]> for SettingsValue {
    fn from(value: [f32; 3]) -> Self {
        Self::Vec3(value)
    }
}

impl From<&str> for SettingsValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SettingsValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A node in a settings tree: either a leaf value or a nested branch.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsNode {
    /// A typed leaf.
    Leaf(SettingsValue),
    /// A nested subtree.
    Branch(SettingsTree),
}

/// A tagged tree of typed settings leaves, addressed by key paths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsTree {
    children: BTreeMap<String, SettingsNode>,
}

impl SettingsTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Set the leaf at `path`, creating intermediate branches.
    ///
    /// Replaces whatever was at the path before, leaf or branch.
    pub fn set(&mut self, path: &[&str], value: impl Into<SettingsValue>) {
        assert!(!path.is_empty(), "settings path must not be empty");
        let mut tree = self;
        for segment in &path[..path.len() - 1] {
            let node = tree
                .children
                .entry((*segment).to_owned())
                .and_modify(|node| {
                    if let SettingsNode::Leaf(_) = node {
                        *node = SettingsNode::Branch(SettingsTree::new());
                    }
                })
                .or_insert_with(|| SettingsNode::Branch(SettingsTree::new()));
            let SettingsNode::Branch(branch) = node else {
                unreachable!("leaf replaced by branch above");
            };
            tree = branch;
        }
        tree.children
            .insert(path[path.len() - 1].to_owned(), SettingsNode::Leaf(value.into()));
    }

    /// The leaf value at `path`, if present.
    pub fn get(&self, path: &[&str]) -> Option<&SettingsValue> {
        let mut tree = self;
        for segment in &path[..path.len().checked_sub(1)?] {
            match tree.children.get(*segment)? {
                SettingsNode::Branch(branch) => tree = branch,
                SettingsNode::Leaf(_) => return None,
            }
        }
        match tree.children.get(*path.last()?)? {
            SettingsNode::Leaf(value) => Some(value),
            SettingsNode::Branch(_) => None,
        }
    }

    /// Whether a leaf exists at `path`.
    pub fn contains(&self, path: &[&str]) -> bool {
        self.get(path).is_some()
    }

    fn set_owned(&mut self, path: &[String], value: SettingsValue) {
        let borrowed: Vec<&str> = path.iter().map(String::as_str).collect();
        self.set(&borrowed, value);
    }
}

/// Stages changed leaves between an old (baseline) and a new tree.
///
/// Call [`slot`](Self::slot) to inspect and stage individual paths, then
/// [`commit`](Self::commit) to fold every staged value into the baseline
/// and get it back. Paths that were never staged keep their baseline
/// value even when the new tree differs - that is what lets callers
/// filter out changes that would have no visible effect.
#[derive(Debug)]
pub struct SettingsDiffer {
    old: SettingsTree,
    new: SettingsTree,
    staged: BTreeMap<Vec<String>, SettingsValue>,
}

impl SettingsDiffer {
    /// Create a differ between a baseline and a freshly-snapshotted tree.
    pub fn new(old: SettingsTree, new: SettingsTree) -> Self {
        Self {
            old,
            new,
            staged: BTreeMap::new(),
        }
    }

    /// Handle to the leaf at `path`.
    pub fn slot<'a>(&'a mut self, path: &[&str]) -> SettingsSlot<'a> {
        SettingsSlot {
            path: path.iter().map(|s| (*s).to_owned()).collect(),
            differ: self,
        }
    }

    /// Whether a value is staged at `path`.
    pub fn is_staged(&self, path: &[&str]) -> bool {
        self.staged
            .contains_key(&path.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>())
    }

    /// Number of staged leaves.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// The effective value at `path`: staged if present, baseline
    /// otherwise.
    pub fn effective(&self, path: &[&str]) -> Option<SettingsValue> {
        let owned: Vec<String> = path.iter().map(|s| (*s).to_owned()).collect();
        if let Some(staged) = self.staged.get(&owned) {
            return Some(staged.clone());
        }
        self.old.get(path).cloned()
    }

    /// Fold every staged value into the baseline and return it.
    pub fn commit(mut self) -> SettingsTree {
        for (path, value) in std::mem::take(&mut self.staged) {
            self.old.set_owned(&path, value);
        }
        self.old
    }
}

/// Handle to one key path inside a [`SettingsDiffer`].
#[derive(Debug)]
pub struct SettingsSlot<'a> {
    differ: &'a mut SettingsDiffer,
    path: Vec<String>,
}

impl SettingsSlot<'_> {
    fn borrowed_path(&self) -> Vec<&str> {
        self.path.iter().map(String::as_str).collect()
    }

    /// Whether the baseline tree has a value at this path.
    pub fn has_old_value(&self) -> bool {
        self.differ.old.contains(&self.borrowed_path())
    }

    /// Whether the new tree has a value at this path.
    pub fn has_new_value(&self) -> bool {
        self.differ.new.contains(&self.borrowed_path())
    }

    /// The baseline value, if any.
    pub fn old_value(&self) -> Option<&SettingsValue> {
        self.differ.old.get(&self.borrowed_path())
    }

    /// The new value, if any.
    pub fn new_value(&self) -> Option<&SettingsValue> {
        self.differ.new.get(&self.borrowed_path())
    }

    /// Whether old and new agree (both absent counts as same).
    pub fn is_same(&self) -> bool {
        match (self.old_value(), self.new_value()) {
            (Some(old), Some(new)) => old == new,
            (None, None) => true,
            _ => false,
        }
    }

    /// Whether a value has been staged at this path.
    pub fn staged(&self) -> bool {
        self.differ.staged.contains_key(&self.path)
    }

    /// The effective value: staged if present, baseline otherwise.
    pub fn value(&self) -> Option<&SettingsValue> {
        if let Some(staged) = self.differ.staged.get(&self.path) {
            return Some(staged);
        }
        self.old_value()
    }

    /// Stage the new value if it is present and differs from the
    /// baseline. Returns whether anything was staged.
    pub fn use_new_value(&mut self) -> bool {
        if !self.has_new_value() || self.is_same() {
            return false;
        }
        let value = self.new_value().cloned().expect("checked above");
        self.differ.staged.insert(self.path.clone(), value);
        true
    }
}
