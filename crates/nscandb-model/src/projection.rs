//! Datalist projection and tree simplification.
//!
//! A [`Projection`] collapses a [`DataList`] into a plain value:
//!
//! ```text
//! entries ──filter──> ──sort──> ──uniq──> ──format──> ──finish──> Node
//! ```
//!
//! Every stage is optional. Projections compose with [`Projection::merge`]:
//! a stage left as [`Override::Inherit`] takes the base value, a stage set to
//! [`Override::Unset`] cancels what the base provides.
//!
//! A [`SimplifySpec`] attaches projections to a tree shape. The spec for a
//! child is the wildcard spec merged with the child's own field spec, so a
//! field can refine or cancel the defaults given for all its siblings.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::{auto_key, cmp_int_split, cmp_values, Data, DataList, Node};

pub type DataPredicate = Arc<dyn Fn(&Data) -> bool + Send + Sync>;
pub type DataCmp = Arc<dyn Fn(&Data, &Data) -> Ordering + Send + Sync>;
pub type DataKey = Arc<dyn Fn(&Data) -> String + Send + Sync>;
pub type DataFormat = Arc<dyn Fn(&Data) -> Node + Send + Sync>;
pub type Finish = Arc<dyn Fn(Vec<Node>) -> Option<Node> + Send + Sync>;

// ============================================================================
// Override
// ============================================================================

/// One stage of a projection relative to the spec it is merged over.
#[derive(Clone)]
pub enum Override<T> {
    Inherit,
    Set(T),
    Unset,
}

impl<T> Default for Override<T> {
    fn default() -> Self {
        Override::Inherit
    }
}

impl<T: Clone> Override<T> {
    fn over(&self, base: &Override<T>) -> Override<T> {
        match self {
            Override::Inherit => base.clone(),
            other => other.clone(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Override::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for Override<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Override::Inherit => f.write_str("Inherit"),
            Override::Set(_) => f.write_str("Set(..)"),
            Override::Unset => f.write_str("Unset"),
        }
    }
}

/// Deduplication criterion; the first entry of each key survives.
#[derive(Clone)]
pub enum Uniq {
    /// Key derived from the value with [`auto_key`].
    Auto,
    By(DataKey),
}

impl Uniq {
    fn key(&self, data: &Data) -> String {
        match self {
            Uniq::Auto => auto_key(&data.value),
            Uniq::By(f) => f(data),
        }
    }
}

#[derive(Clone)]
pub enum Format {
    /// The plain value (the default).
    Value,
    /// The whole observation, origin included, for a custom finish step.
    Raw,
    Custom(DataFormat),
}

// ============================================================================
// Projection
// ============================================================================

#[derive(Clone, Default, Debug)]
pub struct Projection {
    pub filter: Override<DataPredicate>,
    pub sort: Override<DataCmp>,
    pub uniq: Override<Uniq>,
    pub format: Override<Format>,
    pub finish: Override<Finish>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, f: impl Fn(&Data) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Override::Set(Arc::new(f));
        self
    }

    pub fn sort(mut self, cmp: DataCmp) -> Self {
        self.sort = Override::Set(cmp);
        self
    }

    pub fn uniq(mut self) -> Self {
        self.uniq = Override::Set(Uniq::Auto);
        self
    }

    pub fn uniq_by(mut self, f: impl Fn(&Data) -> String + Send + Sync + 'static) -> Self {
        self.uniq = Override::Set(Uniq::By(Arc::new(f)));
        self
    }

    pub fn raw(mut self) -> Self {
        self.format = Override::Set(Format::Raw);
        self
    }

    pub fn format(mut self, f: impl Fn(&Data) -> Node + Send + Sync + 'static) -> Self {
        self.format = Override::Set(Format::Custom(Arc::new(f)));
        self
    }

    pub fn finish(mut self, f: impl Fn(Vec<Node>) -> Option<Node> + Send + Sync + 'static) -> Self {
        self.finish = Override::Set(Arc::new(f));
        self
    }

    /// Keep only the first entry, as a single value instead of an array.
    pub fn first(self) -> Self {
        self.finish(|nodes| nodes.into_iter().next().map(|n| Node::Value(n.to_plain())))
    }

    pub fn cancel_sort(mut self) -> Self {
        self.sort = Override::Unset;
        self
    }

    pub fn cancel_uniq(mut self) -> Self {
        self.uniq = Override::Unset;
        self
    }

    pub fn cancel_finish(mut self) -> Self {
        self.finish = Override::Unset;
        self
    }

    /// `over` applied on top of `base`.
    pub fn merge(base: &Projection, over: &Projection) -> Projection {
        Projection {
            filter: over.filter.over(&base.filter),
            sort: over.sort.over(&base.sort),
            uniq: over.uniq.over(&base.uniq),
            format: over.format.over(&base.format),
            finish: over.finish.over(&base.finish),
        }
    }

    /// Run the pipeline. Without a finish step the result is the array of
    /// formatted entries; a finish step may return `None` to drop the field.
    pub fn apply(&self, list: &DataList) -> Option<Node> {
        let mut items: Vec<&Data> = list.iter().collect();
        if let Some(keep) = self.filter.get() {
            items.retain(|d| keep(d));
        }
        if let Some(cmp) = self.sort.get() {
            items.sort_by(|a, b| cmp(a, b));
        }
        if let Some(uniq) = self.uniq.get() {
            let mut seen = HashSet::new();
            items.retain(|d| seen.insert(uniq.key(d)));
        }
        let nodes: Vec<Node> = items
            .into_iter()
            .map(|d| match self.format.get() {
                Some(Format::Raw) => Node::Data(d.clone()),
                Some(Format::Custom(f)) => f(d),
                Some(Format::Value) | None => Node::Value(d.value.clone()),
            })
            .collect();
        match self.finish.get() {
            Some(finish) => finish(nodes),
            None => Some(Node::Value(Value::Array(
                nodes.iter().map(Node::to_plain).collect(),
            ))),
        }
    }
}

// ============================================================================
// Comparators
// ============================================================================

/// Order by the index of the first pattern contained in the origin
/// (case-insensitive); origins matching nothing sort last.
pub fn by_origin_priority(patterns: &[&str]) -> DataCmp {
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
    Arc::new(move |a: &Data, b: &Data| {
        let rank = |d: &Data| {
            let origin = d.origin.to_lowercase();
            patterns
                .iter()
                .position(|p| origin.contains(p.as_str()))
                .unwrap_or(patterns.len())
        };
        rank(a).cmp(&rank(b))
    })
}

pub fn by_value() -> DataCmp {
    Arc::new(|a: &Data, b: &Data| cmp_values(&a.value, &b.value))
}

/// Numeric-aware order for addresses and interface names.
pub fn by_ip() -> DataCmp {
    Arc::new(|a: &Data, b: &Data| match (a.value.as_str(), b.value.as_str()) {
        (Some(x), Some(y)) => cmp_int_split(x, y),
        _ => cmp_values(&a.value, &b.value),
    })
}

/// Lexicographic combination: the first non-equal comparison decides.
pub fn chain(cmps: Vec<DataCmp>) -> DataCmp {
    Arc::new(move |a: &Data, b: &Data| {
        cmps.iter()
            .map(|c| c(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    })
}

// ============================================================================
// SimplifySpec
// ============================================================================

/// Projection specs laid over a tree.
#[derive(Clone, Default, Debug)]
pub struct SimplifySpec {
    /// Applied when the node itself is a datalist.
    pub leaf: Projection,
    /// Defaults for every child.
    pub wildcard: Option<Box<SimplifySpec>>,
    /// Per-key refinements, merged over the wildcard.
    pub fields: IndexMap<String, SimplifySpec>,
}

impl SimplifySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn leaf(projection: Projection) -> Self {
        Self {
            leaf: projection,
            ..Self::default()
        }
    }

    pub fn any(mut self, spec: SimplifySpec) -> Self {
        self.wildcard = Some(Box::new(spec));
        self
    }

    pub fn field(mut self, key: &str, spec: SimplifySpec) -> Self {
        self.fields.insert(key.to_string(), spec);
        self
    }

    pub fn merge(base: &SimplifySpec, over: &SimplifySpec) -> SimplifySpec {
        let wildcard = match (&base.wildcard, &over.wildcard) {
            (Some(b), Some(o)) => Some(Box::new(SimplifySpec::merge(b, o))),
            (Some(b), None) => Some(b.clone()),
            (None, o) => o.clone(),
        };
        let mut fields = base.fields.clone();
        for (key, spec) in &over.fields {
            let merged = match fields.get(key) {
                Some(b) => SimplifySpec::merge(b, spec),
                None => spec.clone(),
            };
            fields.insert(key.clone(), merged);
        }
        SimplifySpec {
            leaf: Projection::merge(&base.leaf, &over.leaf),
            wildcard,
            fields,
        }
    }

    /// Effective spec for the child at `key`.
    pub fn child(&self, key: &str) -> SimplifySpec {
        match (&self.wildcard, self.fields.get(key)) {
            (Some(w), Some(f)) => SimplifySpec::merge(w, f),
            (Some(w), None) => (**w).clone(),
            (None, Some(f)) => f.clone(),
            (None, None) => SimplifySpec::default(),
        }
    }
}

/// Collapse every datalist of `node` with the projection `spec` assigns to
/// it; data become their value. Map entries whose projection yields nothing
/// are left out.
pub fn simplify(node: &Node, spec: &SimplifySpec) -> Option<Node> {
    match node {
        Node::List(list) => spec.leaf.apply(list),
        Node::Data(data) => Some(Node::Value(data.value.clone())),
        Node::Map(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (key, child) in map {
                if let Some(s) = simplify(child, &spec.child(key)) {
                    out.insert(key.clone(), s);
                }
            }
            Some(Node::Map(out))
        }
        Node::Array(items) => Some(Node::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, child)| {
                    simplify(child, &spec.child(&i.to_string()))
                        .unwrap_or(Node::Value(Value::Null))
                })
                .collect(),
        )),
        Node::Value(v) => Some(Node::Value(v.clone())),
    }
}
