//! Integration tests for parsing and resolving project documents

use rsxml::{resolve, Document, Error, ProjectGraph, Role, SchemaRules};
use std::sync::Arc;

fn rules() -> Arc<SchemaRules> {
    Arc::new(SchemaRules::riverscapes_v2())
}

fn parse(xml: &str) -> rsxml::Result<ProjectGraph> {
    ProjectGraph::parse(xml, rules())
}

#[test]
fn minimal_project_resolves() {
    let graph = parse("<Project><Id>p</Id></Project>").unwrap();
    assert_eq!(graph.identifiers().count(), 0);
    assert!(graph.edges().unwrap().is_empty());
    assert_eq!(graph.project().unwrap().id().as_deref(), Some("p"));
}

#[test]
fn identifiers_are_indexed_in_document_order() {
    let graph = parse(
        r#"<Project><Id>p</Id>
             <Dataset id="b"/><Dataset id="a"/>
             <Realization id="r"><Outputs><Output ref="a"/></Outputs></Realization>
           </Project>"#,
    )
    .unwrap();
    assert_eq!(graph.identifiers().collect::<Vec<_>>(), vec!["b", "a", "r"]);

    let edges = graph.edges().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!((edges[0].source.as_str(), edges[0].target.as_str()), ("r", "a"));
    assert_eq!(edges[0].role, Role::Output);
}

#[test]
fn duplicate_identifier_names_both_paths() {
    let err = parse(r#"<Project><Id>p</Id><Dataset id="x"/><Realization id="x"/></Project>"#).unwrap_err();
    match err {
        Error::DuplicateIdentifier { id, first, second } => {
            assert_eq!(id, "x");
            assert_eq!(first, "/Project/Dataset");
            assert_eq!(second, "/Project/Realization");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn dangling_reference_is_reported() {
    let err = parse(
        r#"<Project><Id>p</Id><Realization id="r"><Inputs><Input ref="missing"/></Inputs></Realization></Project>"#,
    )
    .unwrap_err();
    match err {
        Error::DanglingReference { source_id, target, role } => {
            assert_eq!(source_id, "r");
            assert_eq!(target, "missing");
            assert_eq!(role, Role::Input);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn lineage_cycle_is_named() {
    let err = parse(
        r#"<Project><Id>p</Id>
             <Dataset id="a"><DerivedFrom ref="b"/></Dataset>
             <Dataset id="b"><DerivedFrom ref="c"/></Dataset>
             <Dataset id="c"><DerivedFrom ref="a"/></Dataset>
           </Project>"#,
    )
    .unwrap_err();
    match &err {
        Error::CyclicLineage { cycle } => assert_eq!(cycle, &vec!["a", "b", "c", "a"]),
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("a -> b -> c -> a"));
}

#[test]
fn realization_loop_through_datasets_is_a_cycle() {
    // r1 reads d1 and writes d2; r2 reads d2 and writes d1
    let err = parse(
        r#"<Project><Id>p</Id><Dataset id="d1"/><Dataset id="d2"/>
             <Realization id="r1"><Inputs><Input ref="d1"/></Inputs><Outputs><Output ref="d2"/></Outputs></Realization>
             <Realization id="r2"><Inputs><Input ref="d2"/></Inputs><Outputs><Output ref="d1"/></Outputs></Realization>
           </Project>"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::CyclicLineage { .. }));
}

#[test]
fn related_links_may_loop() {
    let graph = parse(
        r#"<Project><Id>p</Id>
             <Dataset id="a"><RelatedTo ref="b"/></Dataset>
             <Dataset id="b"><RelatedTo ref="a"/></Dataset>
           </Project>"#,
    )
    .unwrap();
    assert_eq!(graph.related_to("a").unwrap(), vec!["b"]);
}

#[test]
fn resolving_twice_gives_the_same_graph() {
    let xml = include_str!("fixtures/project.rs.xml");
    let first = resolve(Document::parse(xml).unwrap(), rules()).unwrap();
    let mut second = parse(xml).unwrap();
    second.reresolve().unwrap();

    assert_eq!(first.edges().unwrap(), second.edges().unwrap());
    assert_eq!(first.summary().unwrap(), second.summary().unwrap());
}

#[test]
fn foreign_namespace_elements_are_not_modeled() {
    let graph = parse(
        r#"<Project xmlns:ext="urn:other"><Id>p</Id>
             <ext:Dataset id="shadow"><ext:Input ref="nowhere"/></ext:Dataset>
             <Dataset id="real"/>
           </Project>"#,
    )
    .unwrap();
    assert_eq!(graph.identifiers().collect::<Vec<_>>(), vec!["real"]);
}

#[test]
fn newer_schema_version_is_refused() {
    let xml = r#"<Project xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
        xsi:noNamespaceSchemaLocation="https://xml.riverscapes.net/Projects/XSD/V3/RiverscapesProject.xsd">
        <Id>p</Id></Project>"#;
    match parse(xml).unwrap_err() {
        Error::UnsupportedSchemaVersion { found, supported } => {
            assert_eq!(found, 3);
            assert_eq!(supported, 2);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn malformed_input_produces_no_document() {
    for xml in ["", "<Project>", "<Project><Id>p</Project>", "<a/><b/>", "text<Project/>"] {
        assert!(
            matches!(Document::parse(xml), Err(Error::MalformedXml(_))),
            "{:?} should be malformed",
            xml
        );
    }
}

#[test]
fn loaded_fixture_has_expected_lineage() {
    let graph = parse(include_str!("fixtures/project.rs.xml")).unwrap();
    assert_eq!(graph.upstream_of("vbet_network").unwrap(), vec!["vbet_run", "dem", "hillshade"]);
    assert_eq!(graph.downstream_of("dem").unwrap(), vec!["hillshade", "vbet_run", "vbet_network"]);

    let bounds = graph.project().unwrap().bounds().unwrap().unwrap();
    assert_eq!(bounds.centroid.lat, 45.2);
    assert_eq!(graph.meta_value::<i64>(rsxml::MetaOwner::Project, "HUC").unwrap(), Some(17060104));
}

#[test]
fn prefixed_schema_elements_are_refused() {
    let xml = r#"<rs:Project xmlns:rs="https://xml.riverscapes.net/Projects/XSD/V2"><rs:Id>p</rs:Id><rs:Dataset id="d1"/></rs:Project>"#;
    assert!(matches!(parse(xml), Err(Error::SchemaViolation { .. })));

    let inner = r#"<Project xmlns:rs="https://xml.riverscapes.net/Projects/XSD/V2"><Id>p</Id><rs:MetaData/></Project>"#;
    match parse(inner).unwrap_err() {
        Error::SchemaViolation { path, .. } => assert_eq!(path, "/Project/rs:MetaData"),
        other => panic!("unexpected error: {}", other),
    }

    // the default namespace form is accepted
    let plain = r#"<Project xmlns="https://xml.riverscapes.net/Projects/XSD/V2"><Id>p</Id><Dataset id="d1"/></Project>"#;
    assert_eq!(parse(plain).unwrap().project().unwrap().id().as_deref(), Some("p"));
}

#[test]
fn extension_wrappers_do_not_collide_with_identifiers() {
    let graph = parse(
        r#"<Project xmlns:ext="urn:x"><Id>p</Id><ext:Wrap><Dataset id="d1"/></ext:Wrap><Dataset id="d1"/></Project>"#,
    )
    .unwrap();
    assert_eq!(graph.identifiers().collect::<Vec<_>>(), vec!["d1"]);
    assert!(graph.validate().is_empty());
}
