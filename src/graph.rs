//! Directed type graph used to plan transformer chains.
//!
//! Nodes are data types, edges are single conversions labelled with the
//! index of the transformer that performs them and the conversion cost.
//! Parallel conversions for the same pair collapse to the cheapest one at
//! build time, so chain planning never has to disambiguate edges.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::transform::Transformer;
use crate::types::{TypeKey, TypePair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EdgeInfo {
    transformer: usize,
    cost: u32,
}

/// One conversion step in a planned chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Index into the pipeline's transformer list.
    pub transformer: usize,
    pub pair: TypePair,
}

/// A planned conversion chain from a source type to the requested type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub source: TypeKey,
    pub cost: u32,
    pub steps: Vec<Step>,
}

pub struct TypeGraph {
    graph: DiGraph<TypeKey, EdgeInfo>,
    nodes: HashMap<TypeKey, NodeIndex>,
}

impl TypeGraph {
    pub fn build(transformers: &[Arc<dyn Transformer>]) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes: HashMap<TypeKey, NodeIndex> = HashMap::new();

        let node_of = |graph: &mut DiGraph<TypeKey, EdgeInfo>,
                           nodes: &mut HashMap<TypeKey, NodeIndex>,
                           key: &TypeKey| {
            if let Some(idx) = nodes.get(key) {
                *idx
            } else {
                let idx = graph.add_node(key.clone());
                nodes.insert(key.clone(), idx);
                idx
            }
        };

        for (index, transformer) in transformers.iter().enumerate() {
            for conversion in transformer.conversions() {
                let from = node_of(&mut graph, &mut nodes, &conversion.pair.from);
                let to = node_of(&mut graph, &mut nodes, &conversion.pair.to);
                let info = EdgeInfo {
                    transformer: index,
                    cost: conversion.cost,
                };
                match graph.find_edge(from, to) {
                    Some(edge) if graph[edge].cost <= info.cost => {}
                    Some(edge) => graph[edge] = info,
                    None => {
                        graph.add_edge(from, to, info);
                    }
                }
            }
        }

        TypeGraph { graph, nodes }
    }

    pub fn contains(&self, data_type: &TypeKey) -> bool {
        self.nodes.contains_key(data_type)
    }

    /// Cheapest chain converting `from` into `to`, if any exists.
    pub fn chain(&self, from: &TypeKey, to: &TypeKey) -> Option<Chain> {
        let start = *self.nodes.get(from)?;
        let goal = *self.nodes.get(to)?;
        let (cost, path) = astar(
            &self.graph,
            start,
            |node| node == goal,
            |edge| edge.weight().cost,
            |_| 0,
        )?;
        if path.len() < 2 {
            return None;
        }
        let mut steps = Vec::with_capacity(path.len() - 1);
        for window in path.windows(2) {
            let edge = self.graph.find_edge(window[0], window[1])?;
            steps.push(Step {
                transformer: self.graph[edge].transformer,
                pair: TypePair::new(
                    self.graph[window[0]].clone(),
                    self.graph[window[1]].clone(),
                ),
            });
        }
        Some(Chain {
            source: from.clone(),
            cost,
            steps,
        })
    }

    /// All chains ending at `target`, one per reachable source type,
    /// cheapest first with lexical source order breaking ties.
    pub fn chains_to(&self, target: &TypeKey) -> Vec<Chain> {
        if !self.contains(target) {
            return Vec::new();
        }
        let mut chains: Vec<Chain> = self
            .nodes
            .keys()
            .filter(|source| *source != target)
            .filter_map(|source| self.chain(source, target))
            .collect();
        chains.sort_by(|a, b| a.cost.cmp(&b.cost).then_with(|| a.source.cmp(&b.source)));
        chains
    }
}
