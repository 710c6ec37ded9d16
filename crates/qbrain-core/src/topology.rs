//! Unit network rebuilt from a store snapshot.
//!
//! Units never register with a directory; the only record of the network is
//! what they publish. Scanning the store and grouping keys by unit id gives the
//! nodes, and each QUnit's `in_qunits` map gives the producer → consumer edges.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::keys::{UnitField, parse_key};
use crate::validate::TargetVector;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub class: Option<String>,
    pub output: Option<String>,
    pub state: Option<String>,
    pub query: Option<Vec<f64>>,
}

/// `from` publishes the output that `to` reads on dimension `dim`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub dim: usize,
    /// Producer's last published output at snapshot time.
    pub output: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Topology {
    nodes: BTreeMap<String, Node>,
    edges: Vec<Edge>,
}

impl Topology {
    /// Build the topology from a full `key -> value` store snapshot.
    /// Keys outside the unit schema and malformed JSON fields are skipped.
    pub fn from_status(status: &BTreeMap<String, String>) -> Self {
        let mut nodes: BTreeMap<String, Node> = BTreeMap::new();
        let mut wiring: Vec<(String, usize, String)> = Vec::new();

        for (key, value) in status {
            let Some((id, field)) = parse_key(key) else {
                continue;
            };
            let node = nodes.entry(id.to_string()).or_insert_with(|| Node {
                id: id.to_string(),
                ..Node::default()
            });
            match field {
                UnitField::Class => node.class = Some(value.clone()),
                UnitField::Output => node.output = Some(value.clone()),
                UnitField::State => node.state = Some(value.clone()),
                UnitField::Query => {
                    node.query = serde_json::from_str::<serde_json::Value>(value)
                        .ok()
                        .and_then(|json| TargetVector::from_json(&json).ok())
                        .map(TargetVector::into_vec);
                }
                UnitField::InQunits => {
                    wiring.extend(parse_in_qunits(value).into_iter().map(
                        |(dim, producer)| (producer, dim, id.to_string()),
                    ));
                }
            }
        }

        let mut edges: Vec<Edge> = Vec::with_capacity(wiring.len());
        for (producer, dim, consumer) in wiring {
            let producer_node = nodes.entry(producer.clone()).or_insert_with(|| Node {
                id: producer.clone(),
                ..Node::default()
            });
            edges.push(Edge {
                output: producer_node.output.clone(),
                from: producer,
                to: consumer,
                dim,
            });
        }
        edges.sort_by(|a, b| (&a.to, a.dim).cmp(&(&b.to, b.dim)));

        Self { nodes, edges }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Units whose output `id` consumes.
    pub fn producers_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.to == id)
            .map(|e| e.from.as_str())
    }

    /// Units that consume the output of `id`.
    pub fn consumers_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.from == id)
            .map(|e| e.to.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn parse_in_qunits(raw: &str) -> Vec<(usize, String)> {
    let Ok(map) = serde_json::from_str::<BTreeMap<String, Option<String>>>(raw) else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(dim, producer)| Some((dim.parse::<usize>().ok()?, producer?)))
        .collect()
}
