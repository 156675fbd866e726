use std::collections::{BTreeSet, HashMap, VecDeque};

use super::descriptor::EntityFields;

/// Relation graph between entities, as declared by descriptor `relation`
/// attributes. Self relations are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    entities: Vec<String>,
    // relation target -> entities referring to it, in discovery order
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from discovered entities and their parsed schema. Entities
    /// without a `fields` block take part in the order but declare nothing.
    pub fn from_fields<'a, I>(entities: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a EntityFields>)>,
    {
        let mut graph = Self::new();
        for (entity, fields) in entities {
            graph.add_entity(entity);
            if let Some(fields) = fields {
                for (_, target) in fields.relations() {
                    graph.add_relation(entity, target);
                }
            }
        }
        graph
    }

    pub fn add_entity(&mut self, entity: &str) {
        if !self.entities.iter().any(|e| e == entity) {
            self.entities.push(entity.to_string());
        }
    }

    /// Record that `entity` holds a reference to `target`.
    pub fn add_relation(&mut self, entity: &str, target: &str) {
        if entity == target {
            return;
        }
        self.dependents
            .entry(target.to_string())
            .or_default()
            .push(entity.to_string());
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Entities referring to `target`.
    pub fn dependents_of(&self, target: &str) -> &[String] {
        self.dependents.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entities `entity` refers to.
    pub fn dependencies_of(&self, entity: &str) -> BTreeSet<&str> {
        self.dependents
            .iter()
            .filter(|(_, referrers)| referrers.iter().any(|r| r == entity))
            .map(|(target, _)| target.as_str())
            .collect()
    }

    /// Population order: every entity after the entities it refers to.
    ///
    /// Passes re-place each referenced entity in front of its earliest
    /// already placed referrer until an ordering survives a pass unchanged.
    /// Relation cycles never settle; after the pass limit the order falls
    /// back to a stable topological sort with the cyclic remainder appended
    /// in input order.
    pub fn sort(&self) -> Vec<String> {
        let limit = self.entities.len().max(1) * 4;
        let mut current = self.entities.clone();
        for _ in 0..limit {
            let next = self.pass(&current);
            if next == current {
                return next;
            }
            current = next;
        }

        let (mut order, remainder) = self.stable_topo_order();
        if remainder.is_empty() {
            tracing::debug!(target: "seedloader", event = "sort_fallback", entities = order.len());
        } else {
            tracing::warn!(
                target: "seedloader",
                event = "sort_cycle",
                entities = %remainder.join(",")
            );
        }
        order.extend(remainder);
        order
    }

    fn pass(&self, order: &[String]) -> Vec<String> {
        let ceiling = order.len().saturating_sub(1);
        let mut sorted: Vec<String> = Vec::with_capacity(order.len());
        for entity in order {
            let dependents = self.dependents_of(entity);
            if dependents.is_empty() {
                sorted.push(entity.clone());
                continue;
            }
            let min = dependents
                .iter()
                .filter_map(|d| sorted.iter().position(|s| s == d))
                .fold(ceiling, usize::min);
            let at = min.min(sorted.len());
            sorted.insert(at, entity.clone());
        }
        sorted
    }

    /// Kahn ordering seeded in input order. Returns the ordered entities and
    /// the ones left over because they sit on a cycle.
    fn stable_topo_order(&self) -> (Vec<String>, Vec<String>) {
        let mut incoming: HashMap<&str, usize> = self
            .entities
            .iter()
            .map(|entity| {
                let count = self
                    .dependencies_of(entity)
                    .into_iter()
                    .filter(|target| self.entities.iter().any(|e| e == target))
                    .count();
                (entity.as_str(), count)
            })
            .collect();

        let mut queue: VecDeque<&str> = self
            .entities
            .iter()
            .map(String::as_str)
            .filter(|entity| incoming.get(entity) == Some(&0))
            .collect();
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                continue;
            }
            order.push(next.to_string());
            let mut released = BTreeSet::new();
            for child in self.dependents_of(next) {
                if released.insert(child.as_str()) {
                    if let Some(count) = incoming.get_mut(child.as_str()) {
                        if *count > 0 {
                            *count -= 1;
                            if *count == 0 {
                                queue.push_back(child.as_str());
                            }
                        }
                    }
                }
            }
        }

        let remainder = self
            .entities
            .iter()
            .filter(|entity| !visited.contains(entity.as_str()))
            .cloned()
            .collect();
        (order, remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::descriptor::FieldDescriptor;

    fn graph(entities: &[&str], relations: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for entity in entities {
            graph.add_entity(entity);
        }
        for (entity, target) in relations {
            graph.add_relation(entity, target);
        }
        graph
    }

    fn position(order: &[String], entity: &str) -> usize {
        order.iter().position(|e| e == entity).unwrap()
    }

    #[test]
    fn zones_come_before_countries_whatever_the_input_order() {
        for entities in [["country", "zone"], ["zone", "country"]] {
            let order = graph(&entities, &[("country", "zone")]).sort();
            assert_eq!(order, vec!["zone", "country"]);
        }
    }

    #[test]
    fn chains_and_fan_in_are_respected() {
        let order = graph(
            &["state", "address", "country", "zone", "customer"],
            &[
                ("address", "country"),
                ("address", "state"),
                ("address", "customer"),
                ("state", "country"),
                ("state", "zone"),
                ("country", "zone"),
            ],
        )
        .sort();
        assert_eq!(order.len(), 5);
        assert!(position(&order, "zone") < position(&order, "country"));
        assert!(position(&order, "country") < position(&order, "state"));
        assert!(position(&order, "state") < position(&order, "address"));
        assert!(position(&order, "customer") < position(&order, "address"));
    }

    #[test]
    fn self_relations_and_unknown_targets_are_ignored() {
        let order = graph(
            &["category", "product"],
            &[("category", "category"), ("product", "category"), ("product", "supplier")],
        )
        .sort();
        assert_eq!(order, vec!["category", "product"]);
    }

    #[test]
    fn cycles_still_yield_every_entity_once() {
        let order = graph(&["a", "b", "c"], &[("a", "b"), ("b", "a"), ("c", "a")]).sort();
        assert_eq!(order.len(), 3);
        for entity in ["a", "b", "c"] {
            assert_eq!(order.iter().filter(|e| *e == entity).count(), 1);
        }
    }

    #[test]
    fn dependencies_are_read_from_relation_fields() {
        let country = EntityFields {
            fields: vec![
                FieldDescriptor::relation("id_zone", "zone"),
                FieldDescriptor::new("iso_code"),
            ],
            ..EntityFields::default()
        };
        let graph = DependencyGraph::from_fields([("country", Some(&country)), ("zone", None)]);
        assert_eq!(graph.dependents_of("zone"), ["country"]);
        assert_eq!(graph.dependencies_of("country"), BTreeSet::from(["zone"]));
        assert_eq!(graph.sort(), vec!["zone", "country"]);
    }
}
