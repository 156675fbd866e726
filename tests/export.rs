#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use anyhow::Result;
use seedloader_lib::export::Exporter;
use seedloader_lib::import::{DescriptorConfig, FieldDescriptor, FixtureLoader, SeedDocument};
use util::{column, SeedTree};

fn populated() -> Result<SeedTree> {
    let tree = SeedTree::standard();
    let mut loader = FixtureLoader::new(tree.config(), tree.open());
    let report = loader.populate_from_xml_files()?;
    assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);
    Ok(tree)
}

#[test]
fn exported_rows_use_symbolic_ids_and_relations() -> Result<()> {
    let tree = populated()?;
    let mut exporter = Exporter::new(tree.config(), tree.open());

    let summaries =
        exporter.generate_entity_files(&["country".to_string(), "zone".to_string()])?;
    assert!(exporter.errors().is_empty(), "unexpected errors: {:?}", exporter.errors());
    let exported: Vec<(&str, usize, usize)> = summaries
        .iter()
        .map(|s| (s.entity.as_str(), s.nodes, s.languages))
        .collect();
    assert_eq!(exported, vec![("zone", 2, 0), ("country", 3, 2)]);

    let zone = SeedDocument::parse("zone", &tree.read("data/zone.xml"))?;
    let ids: Vec<&str> = zone.rows.iter().map(|row| row.id.as_str()).collect();
    assert_eq!(ids, vec!["Europe", "Asia"]);
    assert_eq!(zone.row("Asia").unwrap().get("name"), Some("Asia"));
    assert!(zone.fields.is_some(), "fields block is kept");

    let country = SeedDocument::parse("country", &tree.read("data/country.xml"))?;
    let relations: Vec<(&str, &str)> = country
        .rows
        .iter()
        .map(|row| (row.id.as_str(), row.get("id_zone").unwrap_or_default()))
        .collect();
    assert_eq!(
        relations,
        vec![("FR", "Europe"), ("JP", "Asia"), ("XX", "3")],
        "dangling references keep their raw value"
    );

    let french = SeedDocument::parse("country", &tree.read("langs/fr/data/country.xml"))?;
    assert_eq!(french.row("JP").unwrap().get("name"), Some("Japon"));
    assert_eq!(french.row("FR").unwrap().get("name"), Some("France"));
    Ok(())
}

#[test]
fn exported_tree_loads_into_a_fresh_store() -> Result<()> {
    let tree = populated()?;
    let mut exporter = Exporter::new(tree.config(), tree.open());
    exporter.generate_all_entity_files()?;
    assert!(exporter.errors().is_empty(), "unexpected errors: {:?}", exporter.errors());

    let tags = SeedDocument::parse("tag", &tree.read("langs/en/data/tag.xml"))?;
    let music = tags.rows.iter().find(|row| row.get("name") == Some("music")).unwrap();
    assert_eq!(music.get("products"), Some("demo_5,demo_7"));

    let mut config = tree.config();
    config.database = tree.path("fresh.sqlite3");
    tree.create_store(&config.database);
    let db = seedloader_lib::Database::open(&config.database, "ps_")?;
    let mut loader = FixtureLoader::new(config, db);
    let report = loader.populate_from_xml_files()?;
    assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);

    let db = loader.database();
    assert_eq!(
        column(
            db,
            "SELECT c.iso_code || ':' || z.name FROM ps_country c \
             JOIN ps_zone z ON z.id_zone = c.id_zone ORDER BY c.id_country",
        ),
        vec!["FR:Europe", "JP:Asia"],
        "the dangling zone of XX does not join"
    );
    assert_eq!(column(db, "SELECT COUNT(*) FROM ps_product_tag"), vec!["3"]);
    Ok(())
}

#[test]
fn schema_generation_replaces_only_the_fields_block() -> Result<()> {
    let tree = populated()?;
    let mut exporter = Exporter::new(tree.config(), tree.open());
    let descriptor = DescriptorConfig {
        id: Some("name".to_string()),
        ordersql: Some("a.name".to_string()),
        ..DescriptorConfig::default()
    };
    exporter.generate_entity_schema(
        "zone",
        &[FieldDescriptor::new("name"), FieldDescriptor::relation("id_parent", "zone")],
        &descriptor,
    )?;

    let zone = SeedDocument::parse("zone", &tree.read("data/zone.xml"))?;
    let fields = zone.fields.unwrap();
    assert_eq!(fields.config.ordersql.as_deref(), Some("a.name"));
    assert_eq!(fields.fields.len(), 2);
    assert_eq!(fields.relations().collect::<Vec<_>>(), vec![("id_parent", "zone")]);
    assert_eq!(zone.rows.len(), 2, "rows survive a schema rewrite");

    exporter.generate_entity_schema("currency", &[FieldDescriptor::new("iso_code")], &DescriptorConfig::default())?;
    assert!(exporter.entity_exists("currency"));
    assert_eq!(exporter.entity_info("currency").fields.len(), 1);
    Ok(())
}

#[test]
fn broken_entity_sql_is_reported_not_fatal() -> Result<()> {
    let tree = populated()?;
    tree.write(
        "data/zone.xml",
        r#"<entity_zone>
             <fields sql="a.missing_column = 1"><field name="name"/></fields>
             <entities/>
           </entity_zone>"#,
    );
    let mut exporter = Exporter::new(tree.config(), tree.open());
    let summary = exporter.generate_entity_content("zone")?;
    assert_eq!(summary.nodes, 0);
    assert_eq!(exporter.errors().len(), 1);
    assert!(
        exporter.errors()[0].starts_with("SQL error on query SELECT"),
        "unexpected message: {}",
        exporter.errors()[0]
    );
    Ok(())
}
