//! Property tests for the writer and the graph

use proptest::prelude::*;
use rsxml::{ProjectGraph, SchemaRules};
use std::collections::BTreeSet;
use std::sync::Arc;

const FIXTURE: &str = include_str!("fixtures/project.rs.xml");

fn rules() -> Arc<SchemaRules> {
    Arc::new(SchemaRules::riverscapes_v2())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn added_datasets_survive_a_round_trip(names in prop::collection::vec("[a-z][a-z0-9_]{0,8}", 1..8)) {
        let mut graph = ProjectGraph::parse(FIXTURE, rules()).unwrap();
        let mut added = BTreeSet::new();
        for name in &names {
            if graph.node_of(name).is_none() {
                graph.add_dataset(name).unwrap();
                added.insert(name.clone());
            }
        }
        graph.reresolve().unwrap();
        let out = graph.write();

        let reparsed = ProjectGraph::parse(&out, rules()).unwrap();
        let ids: Vec<&str> = reparsed.identifiers().collect();
        for name in &added {
            prop_assert!(ids.contains(&name.as_str()));
        }
        prop_assert_eq!(reparsed.summary().unwrap(), graph.summary().unwrap());
        prop_assert!(reparsed.validate().is_empty());
    }

    #[test]
    fn text_values_are_escaped_and_restored(name in "[ -~]{0,24}", meta in "[ -~]{1,24}") {
        let mut graph = ProjectGraph::parse(FIXTURE, rules()).unwrap();
        graph.dataset_mut("dem").unwrap().set_name(&name).unwrap();
        graph.set_meta("dem", "note", &meta).unwrap();
        let out = graph.write();

        roxmltree::Document::parse(&out).unwrap();
        let reparsed = ProjectGraph::parse(&out, rules()).unwrap();
        let dem = reparsed.dataset("dem").unwrap();
        let expected_name = name.trim();
        prop_assert_eq!(dem.name().unwrap_or_default(), expected_name);
        let stored = reparsed.meta("dem").unwrap().last().map(|e| e.value());
        prop_assert_eq!(stored, Some(meta.clone()));
    }

    #[test]
    fn attribute_values_are_escaped_and_restored(guid in "[ -~]{0,24}") {
        let mut graph = ProjectGraph::parse(FIXTURE, rules()).unwrap();
        graph.dataset_mut("hillshade").unwrap().set_guid(&guid).unwrap();
        let out = graph.write();

        let reparsed = ProjectGraph::parse(&out, rules()).unwrap();
        prop_assert_eq!(reparsed.dataset("hillshade").unwrap().guid(), Some(guid.as_str()));
        let rewritten = reparsed.write();
        prop_assert_eq!(rewritten, out);
    }
}
