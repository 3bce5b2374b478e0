//! Assembles the layered query from the context's buffers: the innermost
//! layer scans the base table, every further predicate set wraps it in one
//! `SELECT … FROM (…) layer_n`, and the optional outermost wrap counts
//! suspect clients. The result is a nested line tree rendered at four spaces
//! per nesting level, followed by textual placeholder substitution.
use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};
use itertools::Itertools;

use crate::context::{Layer, Sublayer};
use crate::error::{Error, Reason};

enum Sql {
    Line(String),
    Nested(Vec<Sql>),
}

pub struct SqlBuilder<'a> {
    layers: &'a [Layer],
    table_name: &'a str,
    domain: String,
    client: String,
    timestamp: String,
    /// `", a, b"` — non-basis columns carried through every SELECT/GROUP BY.
    additional: String,
    depth: usize,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(
        layers: &'a [Layer],
        columns: &BTreeSet<String>,
        table_name: &'a str,
        identifier_map: &HashMap<String, String>,
    ) -> Self {
        let basis = |key: &str, default: &str| {
            identifier_map
                .get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };
        let domain = basis("domain", "request");
        let client = basis("client", "dst");
        let timestamp = basis("timestamp", "timestamp");

        let additional = columns
            .iter()
            .filter(|c| **c != domain && **c != client && **c != timestamp)
            .join(", ");
        let additional = if additional.is_empty() {
            additional
        } else {
            format!(", {additional}")
        };

        SqlBuilder {
            layers,
            table_name,
            domain,
            client,
            timestamp,
            additional,
            depth: 0,
        }
    }

    pub fn build(
        mut self,
        with_group_by: bool,
        placeholders: &HashMap<String, String>,
    ) -> Result<String> {
        let (root, rest) = match self.layers.split_first() {
            Some(split) => split,
            None => bail!("a rule needs at least one predicate set"),
        };

        let mut sql = self.root_layer(root)?;
        for layer in rest {
            // The deepest sublayer wraps first so its aliases are in scope
            // for the shallower ones.
            for sublayer in layer.iter().rev() {
                sql = self.wrap_sublayer(sublayer, sql);
            }
        }

        if with_group_by {
            sql = vec![
                Sql::Line(format!(
                    "SELECT {client}, COUNT({client}) AS freq",
                    client = self.client
                )),
                Sql::Line("FROM (".to_string()),
                Sql::Nested(sql),
                Sql::Line(") layer_group".to_string()),
                Sql::Line(format!("GROUP BY {}", self.client)),
            ];
        }

        let mut rendered = render(&sql, 0);
        for (key, value) in placeholders {
            rendered = rendered.replace(&format!("<{key}>"), value);
        }
        Ok(rendered)
    }

    /// The scan of the base table. Count aggregates cannot live here: the
    /// innermost layer must reduce the table before any window runs.
    fn root_layer(&self, layer: &Layer) -> Result<Vec<Sql>> {
        if layer.len() > 1 {
            return Err(Error::new(Reason::Build(
                "the innermost layer cannot contain counts".to_string(),
            ))
            .with_help("wrap the counting predicate in a further predicate set")
            .into());
        }
        let sublayer = &layer[0];

        let mut sql = vec![
            Sql::Line(format!(
                "SELECT {domain}, {client}{additional}, MAX({timestamp}) AS {timestamp}",
                domain = self.domain,
                client = self.client,
                additional = self.additional,
                timestamp = self.timestamp,
            )),
            Sql::Line(format!("FROM {}", self.table_name)),
        ];
        if sublayer.where_.is_empty() {
            sql.push(Sql::Line("WHERE TRUE".to_string()));
        } else {
            sql.push(Sql::Line("WHERE".to_string()));
            for (i, items) in sublayer.where_.iter().enumerate() {
                let predicate = items.concat();
                if i == 0 {
                    sql.push(Sql::Line(format!("    {predicate}")));
                } else {
                    sql.push(Sql::Line(format!("    AND {predicate}")));
                }
            }
        }
        sql.push(Sql::Line(format!(
            "GROUP BY {}, {}{}",
            self.client, self.domain, self.additional
        )));
        Ok(sql)
    }

    fn wrap_sublayer(&mut self, sublayer: &Sublayer, inner: Vec<Sql>) -> Vec<Sql> {
        let mut sql = vec![Sql::Line(format!(
            "SELECT {domain}, {client}{additional}, {timestamp}",
            domain = self.domain,
            client = self.client,
            additional = self.additional,
            timestamp = self.timestamp,
        ))];
        for items in &sublayer.select {
            if let Some(Sql::Line(previous)) = sql.last_mut() {
                previous.push(',');
            }
            sql.push(Sql::Line(format!("    {}", items.concat())));
        }

        sql.push(Sql::Line("FROM (".to_string()));
        sql.push(Sql::Nested(inner));
        sql.push(Sql::Line(format!(") layer_{}", self.depth)));

        for (i, items) in sublayer.where_.iter().enumerate() {
            let predicate = items.concat();
            if i == 0 {
                sql.push(Sql::Line(format!("WHERE {predicate}")));
            } else {
                sql.push(Sql::Line(format!("    AND {predicate}")));
            }
        }

        self.depth += 1;
        sql
    }
}

fn render(lines: &[Sql], depth: usize) -> String {
    lines
        .iter()
        .map(|line| match line {
            Sql::Line(line) => format!("{}{}", "    ".repeat(depth), line),
            Sql::Nested(inner) => render(inner, depth + 1),
        })
        .join("\n")
}
