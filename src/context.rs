//! Mutable compilation state, threaded through AST visits as one owned
//! value. The visitor appends SQL fragments into the buffers of the current
//! sublayer; the builder consumes them read-only afterwards.
use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};
use log::trace;
use strum::Display;

/// Which buffer of the current sublayer receives emitted fragments.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    Select,
    Where,
}

/// An intra-layer scope carrying its own SELECT extras and WHERE predicates.
/// Each item is the fragment list of one SQL expression.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Sublayer {
    pub select: Vec<Vec<String>>,
    pub where_: Vec<Vec<String>>,
}

impl Sublayer {
    fn items_mut(&mut self, mode: Mode) -> &mut Vec<Vec<String>> {
        match mode {
            Mode::Select => &mut self.select,
            Mode::Where => &mut self.where_,
        }
    }
}

/// One SQL nesting level. Count lifts open additional sublayers.
pub type Layer = Vec<Sublayer>;

/// A function emission template: literal text interleaved with the indices
/// of call-site arguments to recurse into.
pub type FuncTemplate = Vec<TemplatePart>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Text(String),
    Param(usize),
}

pub struct Context<'a> {
    pub layers: Vec<Layer>,
    sublayer_idx: usize,
    mode: Mode,
    mode_stack: Vec<Mode>,
    lookup_table: &'a HashMap<String, String>,
    function_table: &'a HashMap<String, FuncTemplate>,
    define_table: HashMap<String, String>,
    /// Physical base-table columns referenced anywhere in the rule.
    pub used_columns: BTreeSet<String>,
    gen_idx: usize,
}

impl<'a> Context<'a> {
    pub fn new(
        lookup_table: &'a HashMap<String, String>,
        function_table: &'a HashMap<String, FuncTemplate>,
    ) -> Self {
        Context {
            layers: Vec::new(),
            sublayer_idx: 0,
            mode: Mode::Where,
            mode_stack: Vec::new(),
            lookup_table,
            function_table,
            define_table: HashMap::new(),
            used_columns: BTreeSet::new(),
            gen_idx: 0,
        }
    }

    fn current_items(&mut self) -> &mut Vec<Vec<String>> {
        let layer = self.layers.last_mut().expect("visit outside any layer");
        layer[self.sublayer_idx].items_mut(self.mode)
    }

    /// Append a fragment to the currently-open item.
    pub fn emit<S: Into<String>>(&mut self, fragment: S) {
        let fragment = fragment.into();
        trace!("emit {fragment}");
        self.current_items()
            .last_mut()
            .expect("emit without an open item")
            .push(fragment);
    }

    /// Open a fresh predicate item in the current `where` buffer.
    pub fn new_predicate(&mut self) {
        trace!("new predicate");
        self.current_items().push(Vec::new());
    }

    /// Open a fresh item in the current `select` buffer.
    pub fn new_selected(&mut self) {
        trace!("new selected");
        self.current_items().push(Vec::new());
    }

    /// Append a fresh layer with one empty sublayer and make it current.
    pub fn new_layer(&mut self) {
        trace!("new layer");
        self.layers.push(vec![Sublayer::default()]);
        self.sublayer_idx = 0;
    }

    /// Move to the next sublayer of the current layer, creating it on demand.
    pub fn down(&mut self) {
        trace!("down");
        self.sublayer_idx += 1;
        let layer = self.layers.last_mut().expect("visit outside any layer");
        if layer.len() <= self.sublayer_idx {
            layer.push(Sublayer::default());
        }
    }

    /// Return to the previous sublayer.
    pub fn up(&mut self) -> Result<()> {
        trace!("up");
        if self.sublayer_idx == 0 {
            bail!("already at the outermost sublayer");
        }
        self.sublayer_idx -= 1;
        Ok(())
    }

    /// Remember the current mode and switch.
    pub fn push_mode(&mut self, mode: Mode) {
        trace!("push mode {mode}");
        self.mode_stack.push(self.mode);
        self.mode = mode;
    }

    pub fn pop_mode(&mut self) {
        trace!("pop mode");
        self.mode = self.mode_stack.pop().expect("unbalanced mode stack");
    }

    /// Resolve an identifier: active `for` bindings win, then the `nxdomain`
    /// shorthand, then the identifier map. Unknown names pass through
    /// verbatim as column names. Every name resolved through the map (or
    /// passed through) is tracked as a used column, except the `t0` sentinel.
    pub fn lookup(&mut self, id: &str) -> String {
        trace!("lookup {id}");
        if let Some(replacement) = self.define_table.get(id) {
            return replacement.clone();
        }
        if id == "nxdomain" {
            return "(cat='NXDOMAIN')".to_string();
        }
        let column = self
            .lookup_table
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string());
        if id != "t0" {
            self.used_columns.insert(column.clone());
        }
        column
    }

    pub fn define(&mut self, id: &str, replacement: String) {
        trace!("define {id} {replacement}");
        self.define_table.insert(id.to_string(), replacement);
    }

    pub fn undefine(&mut self, id: &str) {
        trace!("undefine {id}");
        self.define_table.remove(id);
    }

    pub fn function_template(&self, name: &str) -> Option<&FuncTemplate> {
        self.function_table.get(name)
    }

    /// A fresh alias for a lifted aggregate.
    pub fn generate_name(&mut self) -> String {
        let name = format!("number_{}", self.gen_idx);
        trace!("generate name {name}");
        self.gen_idx += 1;
        name
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn maps() -> (HashMap<String, String>, HashMap<String, FuncTemplate>) {
        let lookup = HashMap::from([("domain".to_string(), "request".to_string())]);
        (lookup, HashMap::new())
    }

    #[test]
    fn test_lookup_precedence() {
        let (lookup, functions) = maps();
        let mut ctx = Context::new(&lookup, &functions);

        // Defines shadow the identifier map and are not tracked.
        ctx.define("domain", "'com'".to_string());
        assert_eq!(ctx.lookup("domain"), "'com'");
        assert!(ctx.used_columns.is_empty());
        ctx.undefine("domain");

        assert_eq!(ctx.lookup("domain"), "request");
        assert_eq!(ctx.lookup("nxdomain"), "(cat='NXDOMAIN')");
        // Unknown identifiers pass through and are tracked.
        assert_eq!(ctx.lookup("ttl"), "ttl");
        assert!(ctx.used_columns.contains("request"));
        assert!(ctx.used_columns.contains("ttl"));
        // The timestamp sentinel is never a column.
        ctx.lookup("t0");
        assert!(!ctx.used_columns.contains("t0"));
    }

    #[test]
    fn test_fresh_names_are_monotone() {
        let (lookup, functions) = maps();
        let mut ctx = Context::new(&lookup, &functions);
        assert_eq!(ctx.generate_name(), "number_0");
        assert_eq!(ctx.generate_name(), "number_1");
        assert_eq!(ctx.generate_name(), "number_2");
    }

    #[test]
    fn test_sublayer_navigation() {
        let (lookup, functions) = maps();
        let mut ctx = Context::new(&lookup, &functions);
        ctx.new_layer();
        assert!(ctx.up().is_err());

        ctx.new_predicate();
        ctx.emit("a");
        ctx.down();
        ctx.push_mode(Mode::Select);
        ctx.new_selected();
        ctx.emit("b");
        ctx.up().unwrap();
        ctx.pop_mode();
        ctx.emit("c");

        assert_eq!(ctx.layers[0][0].where_, vec![vec!["a", "c"]]);
        assert_eq!(ctx.layers[0][1].select, vec![vec!["b"]]);
        // `down` re-enters the existing sublayer instead of growing the layer.
        ctx.down();
        assert_eq!(ctx.layers[0].len(), 2);
    }
}
